//! HTTP API: job management, webhook delivery intake and live updates

mod handlers;
mod responses;
mod routes;
mod websocket;

pub use handlers::{
    CallerId, DELIVERY_ATTEMPT_HEADER, SIGNATURE_HEADER, USER_ID_HEADER, WEBHOOK_ID_HEADER,
};
pub use responses::ErrorResponse;
pub use routes::*;
pub use websocket::JobEvent;

use crate::adapters::BroadcastNotifier;
use crate::config::ServerConfig;
use crate::core::JobStore;
use crate::infrastructure::ServiceContainer;
use crate::metrics::Metrics;
use crate::services::{JobService, Scheduler, WebhookReceiver, WebhookRegistrar};
use anyhow::Result;
use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    routing::get,
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

/// Start the API server
pub async fn start_server(
    state: ApiState,
    config: &ServerConfig,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = create_app(state, config);

    let listener = TcpListener::bind(&config.bind_address).await?;
    info!("API server listening on {}", config.bind_address);

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(handle)
}

/// Start the metrics server
pub async fn start_metrics_server(
    metrics: Arc<Metrics>,
    port: u16,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Metrics server listening on {}", addr);

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Metrics server error: {}", e);
        }
    });

    Ok(handle)
}

/// Build the main API application
pub fn create_app(state: ApiState, config: &ServerConfig) -> Router {
    let cors = if config.enable_cors {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    };

    Router::new()
        .merge(create_job_routes())
        .merge(create_webhook_routes())
        .merge(create_ops_routes())
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(DefaultBodyLimit::max(config.max_request_size_mb * 1024 * 1024))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs))),
        )
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> Result<String, StatusCode> {
    metrics.render().map_err(|e| {
        tracing::error!("Failed to render metrics: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// Shared API state
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn JobStore>,
    pub jobs: Arc<JobService>,
    pub registrar: Arc<WebhookRegistrar>,
    pub receiver: Arc<WebhookReceiver>,
    pub scheduler: Arc<Scheduler>,
    pub notifier: Arc<BroadcastNotifier>,
    pub cron_secret: Option<String>,
}

impl ApiState {
    pub fn new(container: &ServiceContainer) -> Self {
        Self {
            store: container.store.clone(),
            jobs: container.jobs.clone(),
            registrar: container.registrar.clone(),
            receiver: container.receiver.clone(),
            scheduler: container.scheduler.clone(),
            notifier: container.notifier.clone(),
            cron_secret: container.config.scheduler.cron_secret.clone(),
        }
    }
}
