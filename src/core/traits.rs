//! Core trait abstractions (Ports in Hexagonal Architecture)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::error::{IndexerResult, UpstreamError};
use super::types::*;
use crate::domain::models::{WriteBatch, WriteSummary};

/// Job store port - single source of truth for jobs, webhooks and delivery logs
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a freshly created job
    async fn insert_job(&self, job: &IndexingJob) -> IndexerResult<()>;

    /// Get a job by id
    async fn get_job(&self, id: Uuid) -> IndexerResult<Option<IndexingJob>>;

    /// All jobs owned by a user, newest first
    async fn list_jobs_for_user(&self, user_id: &str) -> IndexerResult<Vec<IndexingJob>>;

    /// Apply `changes` only if the job's current status is one of `expected`
    async fn update_job(
        &self,
        id: Uuid,
        expected: &[JobStatus],
        changes: JobChanges,
    ) -> IndexerResult<JobUpdate>;

    /// Remove a job together with its webhooks and logs
    ///
    /// Webhooks listed in `keep_webhooks` stay behind as tombstones so a later
    /// reconcile can still recognise their upstream subscriptions.
    async fn delete_job(&self, id: Uuid, keep_webhooks: &[Uuid]) -> IndexerResult<bool>;

    /// Pending jobs due at `now`, oldest first
    async fn due_pending_jobs(&self, now: DateTime<Utc>, limit: usize) -> IndexerResult<Vec<IndexingJob>>;

    /// Move jobs in `statuses` not updated since `stale_before` back to pending
    async fn reset_stale_jobs(
        &self,
        statuses: &[JobStatus],
        stale_before: DateTime<Utc>,
    ) -> IndexerResult<Vec<IndexingJob>>;

    /// Insert an active webhook unless the job already has one
    async fn insert_active_webhook(&self, webhook: &Webhook) -> IndexerResult<WebhookInsert>;

    async fn get_webhook(&self, id: Uuid) -> IndexerResult<Option<Webhook>>;

    async fn active_webhook_for_job(&self, job_id: Uuid) -> IndexerResult<Option<Webhook>>;

    async fn webhooks_for_job(&self, job_id: Uuid) -> IndexerResult<Vec<Webhook>>;

    async fn webhooks_for_user(&self, user_id: &str) -> IndexerResult<Vec<Webhook>>;

    async fn set_webhook_status(&self, id: Uuid, status: WebhookStatus) -> IndexerResult<bool>;

    /// Append a delivery log and touch the webhook's `updated_at` atomically
    async fn record_delivery(&self, log: &WebhookLog) -> IndexerResult<()>;

    /// Most recent delivery logs of a webhook
    async fn webhook_logs(&self, webhook_id: Uuid, limit: i64) -> IndexerResult<Vec<WebhookLog>>;

    async fn get_connection(&self, id: Uuid) -> IndexerResult<Option<DatabaseConnection>>;

    /// Health check
    async fn health_check(&self) -> IndexerResult<()>;
}

/// Subscription request sent to the upstream provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionRequest {
    pub webhook_url: String,
    pub account_addresses: Vec<String>,
    pub program_ids: Vec<String>,
    pub transaction_types: Vec<String>,
    /// Secret the provider signs deliveries with
    pub secret: String,
}

/// Subscription as reported by the upstream provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subscription {
    pub id: String,
    pub webhook_url: String,
    #[serde(default)]
    pub account_addresses: Vec<String>,
    #[serde(default)]
    pub transaction_types: Vec<String>,
}

/// Upstream webhook provider port
#[async_trait]
pub trait WebhookProvider: Send + Sync {
    async fn create_subscription(&self, request: &SubscriptionRequest) -> Result<Subscription, UpstreamError>;

    async fn list_subscriptions(&self) -> Result<Vec<Subscription>, UpstreamError>;

    /// Fails with `UpstreamError::SubscriptionNotFound` when the id is unknown upstream
    async fn delete_subscription(&self, subscription_id: &str) -> Result<(), UpstreamError>;
}

/// A user's target database
#[async_trait]
pub trait TargetDatabase: Send + Sync {
    /// Create the category tables if they do not exist
    async fn ensure_schema(&self) -> IndexerResult<()>;

    /// Insert all rows in one transaction, ignoring rows whose natural key exists
    async fn write_batch(&self, batch: &WriteBatch) -> IndexerResult<WriteSummary>;
}

/// Hands out pooled handles to target databases
#[async_trait]
pub trait TargetDatabaseFactory: Send + Sync {
    async fn connect(&self, connection: &DatabaseConnection) -> IndexerResult<Arc<dyn TargetDatabase>>;
}

/// Job change pushed to dashboards
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobNotification {
    pub job_id: Uuid,
    pub user_id: String,
    pub status: JobStatus,
    pub progress: i16,
    pub error_message: Option<String>,
    pub timestamp: i64,
}

impl JobNotification {
    pub fn from_job(job: &IndexingJob) -> Self {
        Self {
            job_id: job.id,
            user_id: job.user_id.clone(),
            status: job.status,
            progress: job.progress,
            error_message: job.error_message.clone(),
            timestamp: Utc::now().timestamp(),
        }
    }
}

/// Push-notification port
pub trait Notifier: Send + Sync {
    fn publish(&self, notification: JobNotification);
}
