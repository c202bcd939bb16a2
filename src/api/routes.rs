//! API route definitions

use super::{handlers::*, websocket::job_updates_socket, ApiState};
use axum::{
    routing::{get, post},
    Router,
};

/// Job management routes, scoped to the calling user
pub fn create_job_routes() -> Router<ApiState> {
    Router::new()
        .route("/api/jobs", post(create_job).get(list_jobs))
        .route("/api/jobs/:id", get(get_job).delete(delete_job))
        .route("/api/jobs/:id/action", post(job_action))
        .route("/api/jobs/:id/retry", post(retry_job))
        .route("/api/jobs/:id/logs", get(job_logs))
}

/// Provider-facing delivery and webhook maintenance routes
pub fn create_webhook_routes() -> Router<ApiState> {
    Router::new()
        .route("/api/webhooks/reconcile", post(reconcile_webhooks))
        .route("/api/webhooks/:job_id", post(receive_delivery))
}

/// Scheduler trigger and live job updates
pub fn create_ops_routes() -> Router<ApiState> {
    Router::new()
        .route("/api/cron/tick", post(cron_tick))
        .route("/ws/jobs", get(job_updates_socket))
}
