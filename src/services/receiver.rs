//! Inbound webhook deliveries
//!
//! The delivery URL names the job, which resolves the job's active webhook.
//! The request is authenticated against that webhook's secret before any of
//! the body is parsed: either an HMAC-SHA256 `x-signature` over the raw body,
//! or the secret itself in `Authorization`, which is what the provider sends
//! when the secret is registered as its auth header. Processing failures
//! surface as errors so the provider redelivers; the target writes are
//! idempotent, so redelivery never duplicates rows.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::jobs::JobService;
use super::rate_limiter::{RateLimiter, DELIVERY_SERVICE};
use super::signature;
use crate::config::DeliveryConfig;
use crate::core::{
    DeliveryStatus, IndexerError, IndexerResult, IndexingJob, JobStatus, JobStore, StorageError,
    TargetDatabaseFactory, Webhook, WebhookLog,
};
use crate::domain::models::{decode_events, parse_delivery, ChainEvent};
use crate::domain::processors::{DispatchSummary, ProcessorRegistry};
use crate::metrics::Metrics;

/// Request data the receiver needs, lifted out of the HTTP layer
#[derive(Debug, Clone, Copy)]
pub struct InboundDelivery<'a> {
    /// Job id from the delivery URL
    pub job_id: Uuid,
    /// Optional `x-webhook-id` header; must name the job's subscription when present
    pub webhook_id: Option<&'a str>,
    /// `x-signature` header
    pub signature: Option<&'a str>,
    /// `Authorization` header
    pub authorization: Option<&'a str>,
    /// `x-delivery-attempt` header, 1-based
    pub attempt: Option<i32>,
    pub body: &'a [u8],
}

/// What happened to an accepted delivery
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Processed {
        events: usize,
        inserted: u64,
        skipped: u64,
        ignored: usize,
    },
    /// Job not running; acknowledged without processing
    Dropped { status: JobStatus },
}

pub struct WebhookReceiver {
    store: Arc<dyn JobStore>,
    jobs: Arc<JobService>,
    limiter: Arc<RateLimiter>,
    processors: Arc<ProcessorRegistry>,
    targets: Arc<dyn TargetDatabaseFactory>,
    metrics: Arc<Metrics>,
    settings: DeliveryConfig,
}

impl WebhookReceiver {
    pub fn new(
        store: Arc<dyn JobStore>,
        jobs: Arc<JobService>,
        limiter: Arc<RateLimiter>,
        processors: Arc<ProcessorRegistry>,
        targets: Arc<dyn TargetDatabaseFactory>,
        metrics: Arc<Metrics>,
        settings: DeliveryConfig,
    ) -> Self {
        Self {
            store,
            jobs,
            limiter,
            processors,
            targets,
            metrics,
            settings,
        }
    }

    pub async fn handle_delivery(&self, delivery: InboundDelivery<'_>) -> IndexerResult<DeliveryOutcome> {
        let named = delivery.webhook_id.map(str::trim).filter(|id| !id.is_empty());
        let webhook = self
            .store
            .active_webhook_for_job(delivery.job_id)
            .await?
            .filter(|webhook| named.map_or(true, |id| id == webhook.subscription_id))
            .ok_or_else(|| IndexerError::not_found(format!("webhook for job {}", delivery.job_id)))?;
        let subscription_id = webhook.subscription_id.as_str();

        // Buckets exist only for known webhooks
        if !self.limiter.check_limit(DELIVERY_SERVICE, subscription_id).await {
            return Err(IndexerError::RateLimited(format!(
                "too many deliveries for webhook {}",
                subscription_id
            )));
        }

        authenticate(&webhook, &delivery)?;

        let envelopes = parse_delivery(delivery.body)?;
        if let Some(mismatch) = envelopes.iter().find(|e| e.webhook_id != subscription_id) {
            return Err(IndexerError::validation(format!(
                "webhookId {} does not match the job's webhook",
                mismatch.webhook_id
            )));
        }
        let raw: Vec<Value> = envelopes.into_iter().flat_map(|e| e.events).collect();
        let events = decode_events(&raw)?;

        let job = self
            .store
            .get_job(webhook.job_id)
            .await?
            .ok_or_else(|| IndexerError::not_found(format!("job {}", webhook.job_id)))?;
        if matches!(job.status, JobStatus::Initializing | JobStatus::Pending | JobStatus::Failed) {
            // Left unacknowledged so the provider redelivers once the job restarts
            info!(
                job_id = %job.id,
                status = %job.status,
                events = events.len(),
                "Job not started, refusing delivery"
            );
            self.metrics.delivery_skipped();
            return Err(IndexerError::Unavailable(format!("job {} is {}", job.id, job.status)));
        }
        if job.status != JobStatus::Running {
            info!(
                job_id = %job.id,
                status = %job.status,
                events = events.len(),
                "Job not running, dropping delivery"
            );
            self.metrics.delivery_skipped();
            return Ok(DeliveryOutcome::Dropped { status: job.status });
        }

        let attempt = delivery.attempt.unwrap_or(1).max(1);
        let payload: Value = serde_json::from_slice(delivery.body)?;
        let timeout = Duration::from_secs(self.settings.processing_timeout_secs);

        let result = match tokio::time::timeout(timeout, self.process(&job, &events)).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout(timeout).into()),
        };

        match result {
            Ok(summary) => {
                self.record(&webhook, DeliveryStatus::Success, attempt, payload, summary.processed, None)
                    .await;
                self.metrics.delivery(DeliveryStatus::Success);
                for (category, written) in &summary.per_category {
                    self.metrics.events_written(*category, written.inserted);
                }

                if let Some(slot) = events.iter().map(ChainEvent::slot).max() {
                    if let Err(e) = self.jobs.record_progress(job.id, slot, events.len()).await {
                        warn!(job_id = %job.id, "Failed to record progress: {}", e);
                    }
                }

                let total = summary.total();
                debug!(
                    job_id = %job.id,
                    events = events.len(),
                    inserted = total.inserted,
                    skipped = total.skipped,
                    "Delivery processed"
                );
                Ok(DeliveryOutcome::Processed {
                    events: events.len(),
                    inserted: total.inserted,
                    skipped: total.skipped,
                    ignored: summary.ignored,
                })
            }
            Err(e) => {
                let status = if attempt < self.settings.max_attempts {
                    DeliveryStatus::Retrying
                } else {
                    DeliveryStatus::Failed
                };
                error!(job_id = %job.id, attempt, status = status.as_str(), "Delivery processing failed: {}", e);
                self.record(&webhook, status, attempt, payload, 0, Some(e.to_string()))
                    .await;
                self.metrics.delivery(status);
                Err(e)
            }
        }
    }

    async fn process(&self, job: &IndexingJob, events: &[ChainEvent]) -> IndexerResult<DispatchSummary> {
        let connection = self
            .store
            .get_connection(job.connection_id)
            .await?
            .ok_or_else(|| {
                IndexerError::Internal(format!(
                    "job {} references missing connection {}",
                    job.id, job.connection_id
                ))
            })?;
        let target = self.targets.connect(&connection).await?;
        self.processors
            .dispatch(&job.config.categories, events, target.as_ref())
            .await
    }

    /// Append the delivery log; a logging failure never fails the delivery
    async fn record(
        &self,
        webhook: &Webhook,
        status: DeliveryStatus,
        attempt: i32,
        payload: Value,
        events_processed: usize,
        error: Option<String>,
    ) {
        let log = WebhookLog {
            id: Uuid::new_v4(),
            webhook_id: webhook.id,
            status,
            attempt,
            payload,
            events_processed: i32::try_from(events_processed).unwrap_or(i32::MAX),
            error,
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.record_delivery(&log).await {
            warn!(webhook_id = %webhook.id, "Failed to record delivery log: {}", e);
        }
    }
}

/// Accept an HMAC signature over the body or the shared secret as a token
fn authenticate(webhook: &Webhook, delivery: &InboundDelivery<'_>) -> IndexerResult<()> {
    if let Some(provided) = delivery.signature {
        return signature::verify(&webhook.secret, delivery.body, provided);
    }
    match delivery.authorization {
        Some(token) => {
            let token = token.trim();
            let token = token.strip_prefix("Bearer ").unwrap_or(token);
            signature::verify_token(&webhook.secret, token)
        }
        None => Err(IndexerError::Auth(
            "missing x-signature or authorization header".to_string(),
        )),
    }
}
