//! Job state machine driven through JobService

mod common;

use anyhow::Result;
use chrono::Utc;
use common::*;
use webhook_indexer::core::{
    Categories, ConnectionStatus, IndexerError, JobStatus, JobStore, WebhookStatus,
};
use webhook_indexer::services::{JobAction, StartOutcome};

#[tokio::test]
async fn create_then_start_registers_one_webhook() -> Result<()> {
    let h = harness().await?;
    let job = h.container.jobs.create_job(USER, transactions_job(h.connection_id)).await?;
    assert_eq!(job.status, JobStatus::Initializing);
    assert_eq!(job.progress, 0);

    let started = match h.container.jobs.start_job(job.id).await? {
        StartOutcome::Started(job) => job,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(started.status, JobStatus::Running);

    let webhook = h.store.active_webhook_for_job(job.id).await?.expect("active webhook");
    assert_eq!(webhook.url, format!("http://indexer.test/api/webhooks/{}", job.id));
    assert_eq!(started.config.webhook.as_ref().map(|w| w.id), Some(webhook.id));
    assert!(h.provider.contains(&webhook.subscription_id));
    assert_eq!(h.provider.create_calls(), 1);

    // Starting a running job is a no-op
    let again = h.container.jobs.start_job(job.id).await?;
    assert_eq!(again, StartOutcome::Skipped(JobStatus::Running));
    assert_eq!(h.provider.create_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn create_rejects_bad_requests() -> Result<()> {
    let h = harness().await?;
    let jobs = &h.container.jobs;

    let mut no_categories = transactions_job(h.connection_id);
    no_categories.categories = Categories::default();
    assert!(matches!(
        jobs.create_job(USER, no_categories).await,
        Err(IndexerError::Validation(_))
    ));

    let mut negative_end = transactions_job(h.connection_id);
    negative_end.filters.end_slot = Some(-1);
    assert!(matches!(
        jobs.create_job(USER, negative_end).await,
        Err(IndexerError::Validation(_))
    ));

    // Someone else's connection looks like a missing one
    assert!(matches!(
        jobs.create_job(OTHER_USER, transactions_job(h.connection_id)).await,
        Err(IndexerError::NotFound(_))
    ));

    let broken = add_connection(&h.store, USER, ConnectionStatus::Error).await;
    assert!(matches!(
        jobs.create_job(USER, transactions_job(broken)).await,
        Err(IndexerError::Validation(_))
    ));

    assert!(jobs.list_jobs(USER).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn pause_resume_and_cancel() -> Result<()> {
    let h = harness().await?;
    let jobs = &h.container.jobs;
    let (job, webhook) = h.running_job().await?;

    let paused = jobs.update_job_status(job.id, USER, JobAction::Pause).await?;
    assert_eq!(paused.status, JobStatus::Paused);

    // Pausing twice is a conflict, not a silent success
    assert!(matches!(
        jobs.update_job_status(job.id, USER, JobAction::Pause).await,
        Err(IndexerError::Conflict(_))
    ));

    let resumed = jobs.update_job_status(job.id, USER, JobAction::Resume).await?;
    assert_eq!(resumed.status, JobStatus::Running);
    // Webhook survived the pause, so no new subscription
    assert_eq!(h.provider.create_calls(), 1);

    let cancelled = jobs.update_job_status(job.id, USER, JobAction::Cancel).await?;
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(cancelled.config.webhook.is_none());
    assert!(!h.provider.contains(&webhook.subscription_id));
    let stored = h.store.get_webhook(webhook.id).await?.expect("webhook kept");
    assert_eq!(stored.status, WebhookStatus::Deleted);

    // Cancel is idempotent, resume of a cancelled job is not allowed
    assert_eq!(jobs.cancel_job(job.id, USER).await?.status, JobStatus::Cancelled);
    assert!(matches!(
        jobs.update_job_status(job.id, USER, JobAction::Resume).await,
        Err(IndexerError::Conflict(_))
    ));
    Ok(())
}

#[tokio::test]
async fn resume_reregisters_a_lost_webhook() -> Result<()> {
    let h = harness().await?;
    let jobs = &h.container.jobs;
    let (job, webhook) = h.running_job().await?;

    jobs.update_job_status(job.id, USER, JobAction::Pause).await?;
    h.store.set_webhook_status(webhook.id, WebhookStatus::Error).await?;

    let resumed = jobs.update_job_status(job.id, USER, JobAction::Resume).await?;
    assert_eq!(resumed.status, JobStatus::Running);
    let fresh = h.store.active_webhook_for_job(job.id).await?.expect("new webhook");
    assert_ne!(fresh.id, webhook.id);
    assert_eq!(resumed.config.webhook.map(|w| w.id), Some(fresh.id));
    assert_eq!(h.provider.create_calls(), 2);
    Ok(())
}

#[tokio::test]
async fn cancel_survives_upstream_failure() -> Result<()> {
    let h = harness().await?;
    let (job, webhook) = h.running_job().await?;

    h.provider.fail_deletes(true);
    let cancelled = h.container.jobs.cancel_job(job.id, USER).await?;
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    let stored = h.store.get_webhook(webhook.id).await?.expect("webhook kept");
    assert_eq!(stored.status, WebhookStatus::Deleted);
    // Left for reconcile to clean up
    assert!(h.provider.contains(&webhook.subscription_id));
    Ok(())
}

#[tokio::test]
async fn registrar_failure_fails_job_with_backoff() -> Result<()> {
    let h = harness().await?;
    let jobs = &h.container.jobs;
    h.provider.fail_creates(true);

    let job = jobs.create_job(USER, transactions_job(h.connection_id)).await?;
    let before = Utc::now();
    let outcome = jobs.start_job(job.id).await?;
    assert!(matches!(outcome, StartOutcome::Failed(_)));

    let failed = h.job(job.id).await?;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.retry_count, 1);
    assert!(failed.error_message.is_some());
    let next = failed.next_retry_at.expect("backoff scheduled");
    assert!(next >= before + chrono::Duration::seconds(29));
    assert!(h.store.active_webhook_for_job(job.id).await?.is_none());

    // Retry queues the job but keeps the backoff
    let retried = jobs.retry_job(job.id, USER).await?;
    assert_eq!(retried.status, JobStatus::Pending);
    assert!(retried.error_message.is_none());
    assert_eq!(retried.next_retry_at, Some(next));

    // Retrying a job that is not failed is a conflict
    assert!(matches!(
        jobs.update_job_status(job.id, USER, JobAction::Retry).await,
        Err(IndexerError::Conflict(_))
    ));

    h.provider.fail_creates(false);
    assert!(matches!(jobs.start_job(job.id).await?, StartOutcome::Started(_)));
    let running = h.job(job.id).await?;
    assert_eq!(running.retry_count, 0);
    assert!(running.next_retry_at.is_none());
    Ok(())
}

#[tokio::test]
async fn other_users_see_not_found() -> Result<()> {
    let h = harness().await?;
    let jobs = &h.container.jobs;
    let (job, _) = h.running_job().await?;

    assert!(matches!(jobs.get_job_status(job.id, OTHER_USER).await, Err(IndexerError::NotFound(_))));
    assert!(matches!(
        jobs.update_job_status(job.id, OTHER_USER, JobAction::Pause).await,
        Err(IndexerError::NotFound(_))
    ));
    assert!(matches!(jobs.cancel_job(job.id, OTHER_USER).await, Err(IndexerError::NotFound(_))));
    assert!(matches!(jobs.delete_job(job.id, OTHER_USER).await, Err(IndexerError::NotFound(_))));
    assert!(matches!(jobs.job_logs(job.id, OTHER_USER, 10).await, Err(IndexerError::NotFound(_))));
    assert!(jobs.list_jobs(OTHER_USER).await?.is_empty());

    assert_eq!(h.job(job.id).await?.status, JobStatus::Running);
    Ok(())
}

#[tokio::test]
async fn delete_removes_job_and_subscription() -> Result<()> {
    let h = harness().await?;
    let jobs = &h.container.jobs;
    let (job, webhook) = h.running_job().await?;

    let view = jobs.get_job_status(job.id, USER).await?;
    assert_eq!(view.webhooks.len(), 1);

    jobs.delete_job(job.id, USER).await?;
    assert!(h.store.get_job(job.id).await?.is_none());
    assert!(h.store.webhooks_for_job(job.id).await?.is_empty());
    assert!(!h.provider.contains(&webhook.subscription_id));
    assert!(matches!(jobs.get_job_status(job.id, USER).await, Err(IndexerError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn notifications_follow_transitions() -> Result<()> {
    let h = harness().await?;
    let mut updates = h.container.notifier.subscribe();

    let (job, _) = h.running_job().await?;
    h.container.jobs.update_job_status(job.id, USER, JobAction::Pause).await?;

    let mut seen = Vec::new();
    while let Ok(update) = updates.try_recv() {
        assert_eq!(update.job_id, job.id);
        assert_eq!(update.user_id, USER);
        seen.push(update.status);
    }
    assert_eq!(
        seen,
        vec![JobStatus::Initializing, JobStatus::Running, JobStatus::Paused]
    );
    Ok(())
}
