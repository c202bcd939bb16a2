//! API request handlers

use super::{responses::*, ApiState};
use crate::core::{IndexerError, IndexingJob, NewJob};
use crate::services::{
    signature, InboundDelivery, JobAction, JobStatusView, ReconcileReport, TickReport,
};
use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequestParts, Path, Query, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode},
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

/// Header carrying the authenticated caller, set by the upstream gateway
pub const USER_ID_HEADER: &str = "x-user-id";
pub const WEBHOOK_ID_HEADER: &str = "x-webhook-id";
pub const SIGNATURE_HEADER: &str = "x-signature";
pub const DELIVERY_ATTEMPT_HEADER: &str = "x-delivery-attempt";

const DEFAULT_LOG_LIMIT: i64 = 50;

/// The user a request acts for
#[derive(Debug, Clone)]
pub struct CallerId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for CallerId
where
    S: Send + Sync,
{
    type Rejection = IndexerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| CallerId(id.to_string()))
            .ok_or_else(|| IndexerError::Auth("missing x-user-id header".to_string()))
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

#[derive(Deserialize)]
pub struct ActionRequest {
    pub action: JobAction,
}

#[derive(Deserialize)]
pub struct LogsQuery {
    pub limit: Option<i64>,
}

/// Health check handler
pub async fn health(State(state): State<ApiState>) -> (StatusCode, Json<Value>) {
    let (status, code) = match state.store.health_check().await {
        Ok(()) => ("healthy", StatusCode::OK),
        Err(e) => {
            tracing::warn!("Health check failed: {}", e);
            ("degraded", StatusCode::SERVICE_UNAVAILABLE)
        }
    };
    (
        code,
        Json(json!({
            "status": status,
            "timestamp": chrono::Utc::now().timestamp(),
            "service": "webhook-indexer"
        })),
    )
}

/// Create a job for one of the caller's connections
pub async fn create_job(
    State(state): State<ApiState>,
    CallerId(user_id): CallerId,
    Json(request): Json<NewJob>,
) -> Result<(StatusCode, Json<IndexingJob>), IndexerError> {
    let job = state.jobs.create_job(&user_id, request).await?;

    // Start in the background; the response does not wait on the provider
    let jobs = state.jobs.clone();
    let job_id = job.id;
    tokio::spawn(async move {
        if let Err(e) = jobs.start_job(job_id).await {
            tracing::warn!(job_id = %job_id, "Initial start failed: {}", e);
        }
    });

    Ok((StatusCode::CREATED, Json(job)))
}

pub async fn list_jobs(
    State(state): State<ApiState>,
    CallerId(user_id): CallerId,
) -> Result<Json<JobsResponse>, IndexerError> {
    let jobs = state.jobs.list_jobs(&user_id).await?;
    Ok(Json(JobsResponse {
        total: jobs.len(),
        jobs,
    }))
}

pub async fn get_job(
    State(state): State<ApiState>,
    CallerId(user_id): CallerId,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusView>, IndexerError> {
    Ok(Json(state.jobs.get_job_status(job_id, &user_id).await?))
}

/// Pause, resume, cancel or retry a job
pub async fn job_action(
    State(state): State<ApiState>,
    CallerId(user_id): CallerId,
    Path(job_id): Path<Uuid>,
    Json(request): Json<ActionRequest>,
) -> Result<Json<IndexingJob>, IndexerError> {
    let job = state
        .jobs
        .update_job_status(job_id, &user_id, request.action)
        .await?;
    Ok(Json(job))
}

pub async fn retry_job(
    State(state): State<ApiState>,
    CallerId(user_id): CallerId,
    Path(job_id): Path<Uuid>,
) -> Result<Json<IndexingJob>, IndexerError> {
    Ok(Json(state.jobs.retry_job(job_id, &user_id).await?))
}

pub async fn delete_job(
    State(state): State<ApiState>,
    CallerId(user_id): CallerId,
    Path(job_id): Path<Uuid>,
) -> Result<StatusCode, IndexerError> {
    state.jobs.delete_job(job_id, &user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn job_logs(
    State(state): State<ApiState>,
    CallerId(user_id): CallerId,
    Path(job_id): Path<Uuid>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<LogsResponse>, IndexerError> {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    let logs = state.jobs.job_logs(job_id, &user_id, limit).await?;
    Ok(Json(LogsResponse {
        total: logs.len(),
        logs,
    }))
}

/// Sync the caller's upstream subscriptions with local records
pub async fn reconcile_webhooks(
    State(state): State<ApiState>,
    CallerId(user_id): CallerId,
) -> Result<Json<ReconcileReport>, IndexerError> {
    Ok(Json(state.registrar.reconcile(&user_id).await?))
}

/// Delivery endpoint the provider posts events to
pub async fn receive_delivery(
    State(state): State<ApiState>,
    Path(job_id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<DeliveryResponse>, IndexerError> {
    let delivery = InboundDelivery {
        job_id,
        webhook_id: header(&headers, WEBHOOK_ID_HEADER),
        signature: header(&headers, SIGNATURE_HEADER),
        authorization: header(&headers, AUTHORIZATION.as_str()),
        attempt: header(&headers, DELIVERY_ATTEMPT_HEADER).and_then(|v| v.trim().parse().ok()),
        body: &body,
    };
    let outcome = state.receiver.handle_delivery(delivery).await?;
    Ok(Json(DeliveryResponse {
        success: true,
        outcome,
    }))
}

/// Externally triggered scheduler tick, guarded by a bearer secret
pub async fn cron_tick(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<TickReport>, IndexerError> {
    let Some(secret) = state.cron_secret.as_deref() else {
        return Err(IndexerError::not_found("cron endpoint is disabled"));
    };
    let provided = header(&headers, AUTHORIZATION.as_str())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| IndexerError::Auth("missing cron secret".to_string()))?;
    signature::verify_token(secret, provided)
        .map_err(|_| IndexerError::Auth("invalid cron secret".to_string()))?;

    Ok(Json(state.scheduler.run_tick().await?))
}
