//! Service container for dependency injection

use crate::adapters::{
    BroadcastNotifier, HttpWebhookProvider, MemoryJobStore, MemoryTargetFactory,
    MockWebhookProvider, PgTargetFactory, PostgresJobStore,
};
use crate::config::{IndexerConfig, ProviderKind, StorageBackend};
use crate::core::{IndexerResult, JobStore, TargetDatabaseFactory, WebhookProvider};
use crate::domain::processors::ProcessorRegistry;
use crate::metrics::Metrics;
use crate::services::{JobService, RateLimiter, Scheduler, WebhookReceiver, WebhookRegistrar};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Service container managing all dependencies
pub struct ServiceContainer {
    /// Configuration
    pub config: IndexerConfig,

    /// Jobs, webhooks and delivery logs
    pub store: Arc<dyn JobStore>,
    pub provider: Arc<dyn WebhookProvider>,
    pub targets: Arc<dyn TargetDatabaseFactory>,

    pub limiter: Arc<RateLimiter>,
    pub notifier: Arc<BroadcastNotifier>,
    pub metrics: Arc<Metrics>,
    pub processors: Arc<ProcessorRegistry>,

    pub registrar: Arc<WebhookRegistrar>,
    pub jobs: Arc<JobService>,
    pub receiver: Arc<WebhookReceiver>,
    pub scheduler: Arc<Scheduler>,
}

impl ServiceContainer {
    /// Initialize the service container with the adapters the config selects
    pub async fn new(config: IndexerConfig) -> IndexerResult<Self> {
        info!("Initializing service container");

        let (store, targets): (Arc<dyn JobStore>, Arc<dyn TargetDatabaseFactory>) =
            match config.storage.backend {
                StorageBackend::Postgres => (
                    Arc::new(PostgresJobStore::new(&config.database).await?),
                    Arc::new(PgTargetFactory::new(config.target.clone())),
                ),
                StorageBackend::Memory => {
                    warn!("Using in-memory job store; state is lost on restart");
                    (
                        Arc::new(MemoryJobStore::new()),
                        Arc::new(MemoryTargetFactory::new()),
                    )
                }
            };
        info!(backend = ?config.storage.backend, "Job store initialized");

        let provider: Arc<dyn WebhookProvider> = match config.provider.kind {
            ProviderKind::Http => Arc::new(HttpWebhookProvider::new(&config.provider)?),
            ProviderKind::Mock => {
                warn!("Using mock webhook provider; no real subscriptions are created");
                Arc::new(MockWebhookProvider::new())
            }
        };
        info!(kind = ?config.provider.kind, "Webhook provider initialized");

        Self::with_adapters(config, store, provider, targets)
    }

    /// Wire services around already constructed adapters
    pub fn with_adapters(
        config: IndexerConfig,
        store: Arc<dyn JobStore>,
        provider: Arc<dyn WebhookProvider>,
        targets: Arc<dyn TargetDatabaseFactory>,
    ) -> IndexerResult<Self> {
        let limiter = Arc::new(RateLimiter::new(&config.rate_limits));
        let notifier = Arc::new(BroadcastNotifier::new());
        let metrics = Arc::new(Metrics::new()?);
        let processors = Arc::new(ProcessorRegistry::new());

        let registrar = Arc::new(WebhookRegistrar::new(
            store.clone(),
            provider.clone(),
            limiter.clone(),
            &config.server.public_base_url,
            Duration::from_millis(config.provider.rate_limit_wait_ms),
        ));
        let jobs = Arc::new(JobService::new(
            store.clone(),
            registrar.clone(),
            notifier.clone(),
            metrics.clone(),
            config.scheduler.clone(),
        ));
        let receiver = Arc::new(WebhookReceiver::new(
            store.clone(),
            jobs.clone(),
            limiter.clone(),
            processors.clone(),
            targets.clone(),
            metrics.clone(),
            config.delivery.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            jobs.clone(),
            metrics.clone(),
            config.scheduler.clone(),
        ));

        info!("Services initialized");

        Ok(Self {
            config,
            store,
            provider,
            targets,
            limiter,
            notifier,
            metrics,
            processors,
            registrar,
            jobs,
            receiver,
            scheduler,
        })
    }

    /// Perform health check on all services
    pub async fn health_check(&self) -> IndexerResult<()> {
        info!("Performing health check");
        self.store.health_check().await?;
        info!("All services healthy");
        Ok(())
    }
}
