//! Job lifecycle: creation, start, user actions and crash recovery
//!
//! Every status change goes through `JobStore::update_job` with the set of
//! statuses the change is legal from, so two racing callers can never both
//! win the same transition.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::registrar::WebhookRegistrar;
use crate::config::SchedulerConfig;
use crate::core::{
    ConnectionStatus, IndexerError, IndexerResult, IndexingJob, JobChanges, JobNotification,
    JobStatus, JobStore, JobUpdate, NewJob, Notifier, Webhook, WebhookLog, WebhookRef,
    WebhookStatus,
};
use crate::metrics::Metrics;

/// Upper bound on delivery logs returned for a job
pub const MAX_LOG_PAGE: i64 = 200;

/// User-initiated status change
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobAction {
    Pause,
    Resume,
    Cancel,
    Retry,
}

/// Result of trying to start a job
#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    Started(IndexingJob),
    /// Job was not in a startable status, nothing changed
    Skipped(JobStatus),
    /// Webhook registration failed and the job is now `failed`
    Failed(String),
}

/// Job with its webhooks, as shown to the owner
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    #[serde(flatten)]
    pub job: IndexingJob,
    pub webhooks: Vec<Webhook>,
}

pub struct JobService {
    store: Arc<dyn JobStore>,
    registrar: Arc<WebhookRegistrar>,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<Metrics>,
    scheduler: SchedulerConfig,
}

impl JobService {
    pub fn new(
        store: Arc<dyn JobStore>,
        registrar: Arc<WebhookRegistrar>,
        notifier: Arc<dyn Notifier>,
        metrics: Arc<Metrics>,
        scheduler: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            registrar,
            notifier,
            metrics,
            scheduler,
        }
    }

    fn announce(&self, job: &IndexingJob) {
        self.metrics.job_transition(job.status);
        self.notifier.publish(JobNotification::from_job(job));
    }

    /// Load a job and check it belongs to `user_id`
    ///
    /// Jobs of other users look exactly like missing ones.
    async fn owned_job(&self, job_id: Uuid, user_id: &str) -> IndexerResult<IndexingJob> {
        match self.store.get_job(job_id).await? {
            Some(job) if job.user_id == user_id => Ok(job),
            _ => Err(IndexerError::not_found(format!("job {}", job_id))),
        }
    }

    pub async fn create_job(&self, user_id: &str, request: NewJob) -> IndexerResult<IndexingJob> {
        if request.categories.is_empty() {
            return Err(IndexerError::validation("at least one category must be enabled"));
        }
        if let Some(end_slot) = request.filters.end_slot {
            if end_slot < 0 {
                return Err(IndexerError::validation("endSlot must be non-negative"));
            }
        }

        let connection = match self.store.get_connection(request.connection_id).await? {
            Some(connection) if connection.user_id == user_id => connection,
            _ => {
                return Err(IndexerError::not_found(format!(
                    "connection {}",
                    request.connection_id
                )))
            }
        };
        if connection.status == ConnectionStatus::Error {
            return Err(IndexerError::validation(format!(
                "connection {} is in error state",
                connection.id
            )));
        }

        let job = IndexingJob::new(user_id, request);
        self.store.insert_job(&job).await?;
        info!(job_id = %job.id, user_id, connection_id = %job.connection_id, "Created indexing job");
        self.announce(&job);
        Ok(job)
    }

    /// Move a startable job to running and register its webhook
    ///
    /// A registration failure marks the job failed and schedules the next
    /// attempt with exponential backoff.
    pub async fn start_job(&self, job_id: Uuid) -> IndexerResult<StartOutcome> {
        let claim = JobChanges {
            status: Some(JobStatus::Running),
            error_message: Some(None),
            ..JobChanges::default()
        };
        let job = match self.store.update_job(job_id, JobStatus::STARTABLE, claim).await? {
            JobUpdate::Updated(job) => job,
            JobUpdate::StatusMismatch(status) => return Ok(StartOutcome::Skipped(status)),
            JobUpdate::Missing => return Err(IndexerError::not_found(format!("job {}", job_id))),
        };
        self.announce(&job);

        match self.registrar.create(&job).await {
            Ok(webhook) => self.attach_webhook(job, webhook).await,
            Err(e) => {
                let message = e.to_string();
                error!(job_id = %job_id, retry_count = job.retry_count, "Failed to start job: {}", message);
                self.fail_running_job(&job, &message).await?;
                Ok(StartOutcome::Failed(message))
            }
        }
    }

    async fn attach_webhook(&self, job: IndexingJob, webhook: Webhook) -> IndexerResult<StartOutcome> {
        let mut config = job.config.clone();
        config.webhook = Some(WebhookRef {
            id: webhook.id,
            subscription_id: webhook.subscription_id.clone(),
        });
        let changes = JobChanges {
            config: Some(config),
            retry_count: Some(0),
            next_retry_at: Some(None),
            ..JobChanges::default()
        };

        match self.store.update_job(job.id, &[JobStatus::Running], changes).await? {
            JobUpdate::Updated(job) => {
                info!(job_id = %job.id, webhook_id = %webhook.id, "Job started");
                Ok(StartOutcome::Started(job))
            }
            JobUpdate::StatusMismatch(status) => {
                // Cancelled or paused while registering; the fresh webhook is orphaned
                warn!(job_id = %job.id, %status, "Job changed during start, removing webhook");
                if let Err(e) = self.registrar.delete(webhook.id).await {
                    warn!(webhook_id = %webhook.id, "Failed to remove webhook: {}", e);
                }
                Ok(StartOutcome::Skipped(status))
            }
            JobUpdate::Missing => {
                if let Err(e) = self.registrar.delete(webhook.id).await {
                    warn!(webhook_id = %webhook.id, "Failed to remove webhook: {}", e);
                }
                Err(IndexerError::not_found(format!("job {}", job.id)))
            }
        }
    }

    async fn fail_running_job(&self, job: &IndexingJob, message: &str) -> IndexerResult<()> {
        let delay = chrono::Duration::from_std(self.scheduler.retry_delay(job.retry_count))
            .unwrap_or_else(|_| chrono::Duration::seconds(self.scheduler.retry_max_secs as i64));
        let changes = JobChanges {
            status: Some(JobStatus::Failed),
            error_message: Some(Some(message.to_string())),
            retry_count: Some(job.retry_count.saturating_add(1)),
            next_retry_at: Some(Some(Utc::now() + delay)),
            ..JobChanges::default()
        };
        if let Some(failed) = self
            .store
            .update_job(job.id, &[JobStatus::Running], changes)
            .await?
            .updated()
        {
            self.announce(&failed);
        }
        Ok(())
    }

    /// Apply a user action to one of the user's jobs
    pub async fn update_job_status(
        &self,
        job_id: Uuid,
        user_id: &str,
        action: JobAction,
    ) -> IndexerResult<IndexingJob> {
        match action {
            JobAction::Pause => self.transition(job_id, user_id, JobStatus::Running, JobStatus::Paused).await,
            JobAction::Resume => self.resume_job(job_id, user_id).await,
            JobAction::Cancel => self.cancel_job(job_id, user_id).await,
            JobAction::Retry => self.retry_job(job_id, user_id).await,
        }
    }

    async fn transition(
        &self,
        job_id: Uuid,
        user_id: &str,
        from: JobStatus,
        to: JobStatus,
    ) -> IndexerResult<IndexingJob> {
        let job = self.owned_job(job_id, user_id).await?;
        if job.status != from {
            return Err(IndexerError::Conflict(format!(
                "cannot move job from {} to {}",
                job.status, to
            )));
        }
        self.apply(job_id, &[from], JobChanges::status(to)).await
    }

    async fn apply(
        &self,
        job_id: Uuid,
        expected: &[JobStatus],
        changes: JobChanges,
    ) -> IndexerResult<IndexingJob> {
        let target = changes.status;
        match self.store.update_job(job_id, expected, changes).await? {
            JobUpdate::Updated(job) => {
                info!(job_id = %job_id, status = %job.status, "Job status updated");
                self.announce(&job);
                Ok(job)
            }
            JobUpdate::StatusMismatch(current) => Err(IndexerError::Conflict(format!(
                "job is {}{}",
                current,
                target.map(|t| format!(", cannot move to {}", t)).unwrap_or_default()
            ))),
            JobUpdate::Missing => Err(IndexerError::not_found(format!("job {}", job_id))),
        }
    }

    /// Resume a paused job, re-registering its webhook if it was lost
    async fn resume_job(&self, job_id: Uuid, user_id: &str) -> IndexerResult<IndexingJob> {
        let job = self
            .transition(job_id, user_id, JobStatus::Paused, JobStatus::Running)
            .await?;
        if self.store.active_webhook_for_job(job_id).await?.is_some() {
            return Ok(job);
        }

        match self.registrar.create(&job).await {
            Ok(webhook) => match self.attach_webhook(job, webhook).await? {
                StartOutcome::Started(job) => Ok(job),
                _ => self.owned_job(job_id, user_id).await,
            },
            Err(e) => {
                let message = e.to_string();
                error!(job_id = %job_id, "Failed to re-register webhook on resume: {}", message);
                self.fail_running_job(&job, &message).await?;
                self.owned_job(job_id, user_id).await
            }
        }
    }

    /// Put a failed job back in the queue
    ///
    /// `next_retry_at` is kept so the scheduler still honors the backoff.
    pub async fn retry_job(&self, job_id: Uuid, user_id: &str) -> IndexerResult<IndexingJob> {
        let job = self.owned_job(job_id, user_id).await?;
        if job.status != JobStatus::Failed {
            return Err(IndexerError::Conflict(format!("only failed jobs can be retried, job is {}", job.status)));
        }
        let changes = JobChanges {
            status: Some(JobStatus::Pending),
            error_message: Some(None),
            ..JobChanges::default()
        };
        self.apply(job_id, &[JobStatus::Failed], changes).await
    }

    /// Cancel a job and tear down its webhooks
    pub async fn cancel_job(&self, job_id: Uuid, user_id: &str) -> IndexerResult<IndexingJob> {
        let job = self.owned_job(job_id, user_id).await?;
        if job.status == JobStatus::Cancelled {
            return Ok(job);
        }
        if !job.status.can_transition_to(JobStatus::Cancelled) {
            return Err(IndexerError::Conflict(format!("cannot cancel a {} job", job.status)));
        }

        let mut config = job.config.clone();
        config.webhook = None;
        let changes = JobChanges {
            status: Some(JobStatus::Cancelled),
            config: Some(config),
            next_retry_at: Some(None),
            ..JobChanges::default()
        };
        let cancelled = self
            .apply(job_id, &JobStatus::sources_of(JobStatus::Cancelled), changes)
            .await?;
        if let Err(e) = self.release_webhooks(job_id, false).await {
            warn!(job_id = %job_id, "Failed to release webhooks: {}", e);
        }
        Ok(cancelled)
    }

    /// Delete a job, its webhooks and their logs
    ///
    /// Webhooks whose upstream subscription could not be confirmed gone are
    /// kept as tombstones for `reconcile`.
    pub async fn delete_job(&self, job_id: Uuid, user_id: &str) -> IndexerResult<()> {
        self.owned_job(job_id, user_id).await?;
        let lingering = self.release_webhooks(job_id, true).await?;
        if !self.store.delete_job(job_id, &lingering).await? {
            return Err(IndexerError::not_found(format!("job {}", job_id)));
        }
        if !lingering.is_empty() {
            warn!(job_id = %job_id, tombstones = lingering.len(), "Deleted job with subscriptions left upstream");
        }
        info!(job_id = %job_id, user_id, "Deleted job");
        Ok(())
    }

    /// Best-effort removal of every live webhook of a job
    ///
    /// With `recheck_deleted`, subscriptions of webhooks already marked
    /// `deleted` are deleted upstream again. Returns the webhooks whose
    /// upstream subscription may still exist.
    async fn release_webhooks(&self, job_id: Uuid, recheck_deleted: bool) -> IndexerResult<Vec<Uuid>> {
        let webhooks = self.store.webhooks_for_job(job_id).await?;
        let mut lingering = Vec::new();
        for webhook in &webhooks {
            if webhook.status == WebhookStatus::Deleted {
                if recheck_deleted && !self.registrar.delete_upstream(&webhook.subscription_id).await {
                    lingering.push(webhook.id);
                }
                continue;
            }
            match self.registrar.delete(webhook.id).await {
                Ok(true) => {}
                Ok(false) => lingering.push(webhook.id),
                Err(e) => {
                    warn!(job_id = %job_id, webhook_id = %webhook.id, "Failed to release webhook: {}", e);
                    lingering.push(webhook.id);
                }
            }
        }
        Ok(lingering)
    }

    pub async fn get_job_status(&self, job_id: Uuid, user_id: &str) -> IndexerResult<JobStatusView> {
        let job = self.owned_job(job_id, user_id).await?;
        let webhooks = self.store.webhooks_for_job(job_id).await?;
        Ok(JobStatusView { job, webhooks })
    }

    pub async fn list_jobs(&self, user_id: &str) -> IndexerResult<Vec<IndexingJob>> {
        self.store.list_jobs_for_user(user_id).await
    }

    /// Delivery logs across all of a job's webhooks, newest first
    pub async fn job_logs(&self, job_id: Uuid, user_id: &str, limit: i64) -> IndexerResult<Vec<WebhookLog>> {
        self.owned_job(job_id, user_id).await?;
        let limit = limit.clamp(1, MAX_LOG_PAGE);

        let mut logs = Vec::new();
        for webhook in self.store.webhooks_for_job(job_id).await? {
            logs.extend(self.store.webhook_logs(webhook.id, limit).await?);
        }
        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        logs.truncate(limit as usize);
        Ok(logs)
    }

    /// Record a processed delivery against a running job
    ///
    /// Completes the job and releases its webhook once the end slot is reached.
    pub async fn record_progress(&self, job_id: Uuid, slot: i64, events: usize) -> IndexerResult<Option<IndexingJob>> {
        let events = i32::try_from(events).unwrap_or(i32::MAX);
        let changes = JobChanges::checkpoint(slot, events, Utc::now());
        let Some(job) = self
            .store
            .update_job(job_id, &[JobStatus::Running], changes)
            .await?
            .updated()
        else {
            return Ok(None);
        };

        if job.status == JobStatus::Completed {
            info!(job_id = %job_id, slot, "Job reached its end slot");
            self.announce(&job);
            if let Err(e) = self.release_webhooks(job_id, false).await {
                warn!(job_id = %job_id, "Failed to release webhooks: {}", e);
            }
        }
        Ok(Some(job))
    }

    /// Reset jobs a crashed process left initializing or running
    pub async fn recover_interrupted_jobs(&self) -> IndexerResult<Vec<IndexingJob>> {
        let stale_after = chrono::Duration::from_std(self.scheduler.stale_after())
            .unwrap_or_else(|_| chrono::Duration::seconds(600));
        let cutoff = Utc::now() - stale_after;

        let recovered = self
            .store
            .reset_stale_jobs(JobStatus::INTERRUPTIBLE, cutoff)
            .await?;
        for job in &recovered {
            warn!(job_id = %job.id, "Recovered interrupted job, back to pending");
            self.announce(job);
        }
        Ok(recovered)
    }
}
