//! API response types

use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};

use crate::core::{IndexerError, IndexingJob, WebhookLog};
use crate::services::DeliveryOutcome;

/// Response for the jobs list
#[derive(Debug, Serialize)]
pub struct JobsResponse {
    pub jobs: Vec<IndexingJob>,
    pub total: usize,
}

/// Response for a job's delivery logs
#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub logs: Vec<WebhookLog>,
    pub total: usize,
}

/// Acknowledgement sent back to the provider
#[derive(Debug, Serialize)]
pub struct DeliveryResponse {
    pub success: bool,
    #[serde(flatten)]
    pub outcome: DeliveryOutcome,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
    pub timestamp: i64,
}

impl IntoResponse for IndexerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::debug!("Request rejected: {}", self);
        }

        let body = ErrorResponse {
            error: self.public_message(),
            code: status.as_u16(),
            timestamp: chrono::Utc::now().timestamp(),
        };
        (status, Json(body)).into_response()
    }
}
