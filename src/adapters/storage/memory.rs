//! In-memory job store for development and tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::core::{
    DatabaseConnection, IndexerResult, IndexingJob, JobChanges, JobStatus, JobStore, JobUpdate,
    Webhook, WebhookInsert, WebhookLog, WebhookStatus,
};

#[derive(Default)]
struct State {
    jobs: HashMap<Uuid, IndexingJob>,
    webhooks: HashMap<Uuid, Webhook>,
    logs: Vec<WebhookLog>,
    connections: HashMap<Uuid, DatabaseConnection>,
}

/// Job store backed by process-local maps
///
/// A single lock guards all maps, so every operation is atomic.
#[derive(Default)]
pub struct MemoryJobStore {
    state: RwLock<State>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a target connection; connections are managed outside this service
    pub async fn insert_connection(&self, connection: DatabaseConnection) {
        self.state
            .write()
            .await
            .connections
            .insert(connection.id, connection);
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert_job(&self, job: &IndexingJob) -> IndexerResult<()> {
        self.state.write().await.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> IndexerResult<Option<IndexingJob>> {
        Ok(self.state.read().await.jobs.get(&id).cloned())
    }

    async fn list_jobs_for_user(&self, user_id: &str) -> IndexerResult<Vec<IndexingJob>> {
        let state = self.state.read().await;
        let mut jobs: Vec<IndexingJob> = state
            .jobs
            .values()
            .filter(|job| job.user_id == user_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn update_job(
        &self,
        id: Uuid,
        expected: &[JobStatus],
        changes: JobChanges,
    ) -> IndexerResult<JobUpdate> {
        let mut state = self.state.write().await;
        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(JobUpdate::Missing);
        };
        if !expected.contains(&job.status) {
            return Ok(JobUpdate::StatusMismatch(job.status));
        }
        changes.apply(job, Utc::now());
        Ok(JobUpdate::Updated(job.clone()))
    }

    async fn delete_job(&self, id: Uuid, keep_webhooks: &[Uuid]) -> IndexerResult<bool> {
        let mut state = self.state.write().await;
        if state.jobs.remove(&id).is_none() {
            return Ok(false);
        }
        let webhook_ids: Vec<Uuid> = state
            .webhooks
            .values()
            .filter(|w| w.job_id == id)
            .map(|w| w.id)
            .collect();
        for webhook_id in webhook_ids.iter().filter(|w| !keep_webhooks.contains(w)) {
            state.webhooks.remove(webhook_id);
        }
        state.logs.retain(|log| !webhook_ids.contains(&log.webhook_id));
        Ok(true)
    }

    async fn due_pending_jobs(&self, now: DateTime<Utc>, limit: usize) -> IndexerResult<Vec<IndexingJob>> {
        let state = self.state.read().await;
        let mut due: Vec<IndexingJob> = state
            .jobs
            .values()
            .filter(|job| job.is_due(now))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        due.truncate(limit);
        Ok(due)
    }

    async fn reset_stale_jobs(
        &self,
        statuses: &[JobStatus],
        stale_before: DateTime<Utc>,
    ) -> IndexerResult<Vec<IndexingJob>> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let mut reset = Vec::new();
        for job in state.jobs.values_mut() {
            if statuses.contains(&job.status) && job.updated_at < stale_before {
                job.status = JobStatus::Pending;
                job.updated_at = now;
                reset.push(job.clone());
            }
        }
        Ok(reset)
    }

    async fn insert_active_webhook(&self, webhook: &Webhook) -> IndexerResult<WebhookInsert> {
        let mut state = self.state.write().await;
        if let Some(existing) = state
            .webhooks
            .values()
            .find(|w| w.job_id == webhook.job_id && w.status == WebhookStatus::Active)
        {
            return Ok(WebhookInsert::Existing(existing.clone()));
        }
        let mut inserted = webhook.clone();
        inserted.status = WebhookStatus::Active;
        state.webhooks.insert(inserted.id, inserted.clone());
        Ok(WebhookInsert::Inserted(inserted))
    }

    async fn get_webhook(&self, id: Uuid) -> IndexerResult<Option<Webhook>> {
        Ok(self.state.read().await.webhooks.get(&id).cloned())
    }

    async fn active_webhook_for_job(&self, job_id: Uuid) -> IndexerResult<Option<Webhook>> {
        let state = self.state.read().await;
        Ok(state
            .webhooks
            .values()
            .find(|w| w.job_id == job_id && w.status == WebhookStatus::Active)
            .cloned())
    }

    async fn webhooks_for_job(&self, job_id: Uuid) -> IndexerResult<Vec<Webhook>> {
        let state = self.state.read().await;
        let mut webhooks: Vec<Webhook> = state
            .webhooks
            .values()
            .filter(|w| w.job_id == job_id)
            .cloned()
            .collect();
        webhooks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(webhooks)
    }

    async fn webhooks_for_user(&self, user_id: &str) -> IndexerResult<Vec<Webhook>> {
        let state = self.state.read().await;
        let mut webhooks: Vec<Webhook> = state
            .webhooks
            .values()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect();
        webhooks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(webhooks)
    }

    async fn set_webhook_status(&self, id: Uuid, status: WebhookStatus) -> IndexerResult<bool> {
        let mut state = self.state.write().await;
        match state.webhooks.get_mut(&id) {
            Some(webhook) => {
                webhook.status = status;
                webhook.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_delivery(&self, log: &WebhookLog) -> IndexerResult<()> {
        let mut state = self.state.write().await;
        if let Some(webhook) = state.webhooks.get_mut(&log.webhook_id) {
            webhook.updated_at = log.created_at;
        }
        state.logs.push(log.clone());
        Ok(())
    }

    async fn webhook_logs(&self, webhook_id: Uuid, limit: i64) -> IndexerResult<Vec<WebhookLog>> {
        let state = self.state.read().await;
        let mut logs: Vec<WebhookLog> = state
            .logs
            .iter()
            .filter(|log| log.webhook_id == webhook_id)
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        logs.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(logs)
    }

    async fn get_connection(&self, id: Uuid) -> IndexerResult<Option<DatabaseConnection>> {
        Ok(self.state.read().await.connections.get(&id).cloned())
    }

    async fn health_check(&self) -> IndexerResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Categories, JobFilters, NewJob};

    fn job(created_offset_secs: i64) -> IndexingJob {
        let mut job = IndexingJob::new(
            "user-1",
            NewJob {
                connection_id: Uuid::new_v4(),
                job_type: None,
                categories: Categories {
                    transactions: true,
                    ..Categories::default()
                },
                filters: JobFilters::default(),
            },
        );
        job.status = JobStatus::Pending;
        job.created_at += chrono::Duration::seconds(created_offset_secs);
        job
    }

    #[tokio::test]
    async fn compare_and_set_rejects_unexpected_status() {
        let store = MemoryJobStore::new();
        let job = job(0);
        store.insert_job(&job).await.unwrap();

        let first = store
            .update_job(job.id, JobStatus::STARTABLE, JobChanges::status(JobStatus::Running))
            .await
            .unwrap();
        assert!(matches!(first, JobUpdate::Updated(ref j) if j.status == JobStatus::Running));

        let second = store
            .update_job(job.id, JobStatus::STARTABLE, JobChanges::status(JobStatus::Running))
            .await
            .unwrap();
        assert!(matches!(second, JobUpdate::StatusMismatch(JobStatus::Running)));

        let missing = store
            .update_job(Uuid::new_v4(), &[JobStatus::Pending], JobChanges::default())
            .await
            .unwrap();
        assert!(matches!(missing, JobUpdate::Missing));
    }

    #[tokio::test]
    async fn due_jobs_are_oldest_first_and_respect_backoff() {
        let store = MemoryJobStore::new();
        let newer = job(10);
        let older = job(0);
        let mut backing_off = job(-10);
        backing_off.next_retry_at = Some(Utc::now() + chrono::Duration::minutes(5));
        for j in [&newer, &older, &backing_off] {
            store.insert_job(j).await.unwrap();
        }

        let due = store.due_pending_jobs(Utc::now(), 10).await.unwrap();
        let ids: Vec<Uuid> = due.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![older.id, newer.id]);

        let limited = store.due_pending_jobs(Utc::now(), 1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, older.id);
    }

    #[tokio::test]
    async fn second_active_webhook_for_a_job_returns_the_first() {
        let store = MemoryJobStore::new();
        let job_id = Uuid::new_v4();
        let now = Utc::now();
        let webhook = |subscription: &str| Webhook {
            id: Uuid::new_v4(),
            user_id: "user-1".to_string(),
            job_id,
            subscription_id: subscription.to_string(),
            url: "http://localhost/api/webhooks".to_string(),
            secret: "s".to_string(),
            status: WebhookStatus::Active,
            filters: JobFilters::default(),
            created_at: now,
            updated_at: now,
        };

        let first = webhook("sub-1");
        assert!(matches!(
            store.insert_active_webhook(&first).await.unwrap(),
            WebhookInsert::Inserted(_)
        ));
        match store.insert_active_webhook(&webhook("sub-2")).await.unwrap() {
            WebhookInsert::Existing(existing) => assert_eq!(existing.id, first.id),
            other => panic!("expected existing webhook, got {:?}", other),
        }
    }
}
