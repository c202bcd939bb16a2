//! Upstream webhook subscription management

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::rate_limiter::{RateLimiter, PROVIDER_SERVICE};
use super::signature::generate_secret;
use crate::core::{
    IndexerError, IndexerResult, IndexingJob, JobStore, SubscriptionRequest, UpstreamError, Webhook,
    WebhookInsert, WebhookProvider, WebhookStatus,
};

/// Bucket key for all outbound provider calls
const PROVIDER_KEY: &str = "api";

/// Path deliveries are posted to, relative to the public base URL
pub const DELIVERY_PATH: &str = "/api/webhooks";

/// Summary of a reconciliation pass
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub checked: usize,
    /// Orphaned upstream subscriptions removed
    pub deleted: Vec<String>,
    /// Orphans whose deletion failed
    pub failed: Vec<String>,
    /// Local active webhooks missing upstream, now marked `error`
    pub marked_error: Vec<Uuid>,
}

pub struct WebhookRegistrar {
    store: Arc<dyn JobStore>,
    provider: Arc<dyn WebhookProvider>,
    limiter: Arc<RateLimiter>,
    public_base_url: String,
    rate_limit_wait: Duration,
}

impl WebhookRegistrar {
    pub fn new(
        store: Arc<dyn JobStore>,
        provider: Arc<dyn WebhookProvider>,
        limiter: Arc<RateLimiter>,
        public_base_url: &str,
        rate_limit_wait: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            limiter,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            rate_limit_wait,
        }
    }

    /// URL the provider delivers a job's events to
    pub fn delivery_url(&self, job_id: Uuid) -> String {
        format!("{}{}/{}", self.public_base_url, DELIVERY_PATH, job_id)
    }

    /// Job id encoded in one of our delivery URLs
    pub fn job_id_from_url(&self, url: &str) -> Option<Uuid> {
        let prefix = format!("{}{}/", self.public_base_url, DELIVERY_PATH);
        let rest = url.strip_prefix(&prefix)?;
        let id = rest.split(['?', '/']).next()?;
        Uuid::parse_str(id).ok()
    }

    async fn acquire_outbound(&self) -> Result<(), UpstreamError> {
        if self
            .limiter
            .wait_for_token(PROVIDER_SERVICE, PROVIDER_KEY, self.rate_limit_wait)
            .await
        {
            Ok(())
        } else {
            Err(UpstreamError::Throttled(self.rate_limit_wait))
        }
    }

    /// Ensure the job has an active webhook, creating the subscription if needed
    ///
    /// Calling this again for the same job returns the existing record.
    pub async fn create(&self, job: &IndexingJob) -> IndexerResult<Webhook> {
        if let Some(existing) = self.store.active_webhook_for_job(job.id).await? {
            debug!(job_id = %job.id, webhook_id = %existing.id, "Job already has an active webhook");
            return Ok(existing);
        }

        let filters = &job.config.filters;
        let secret = generate_secret();
        let request = SubscriptionRequest {
            webhook_url: self.delivery_url(job.id),
            account_addresses: filters.account_addresses.clone(),
            program_ids: filters.program_ids.clone(),
            transaction_types: filters.transaction_types.clone(),
            secret: secret.clone(),
        };

        self.acquire_outbound().await?;
        let subscription = self.provider.create_subscription(&request).await?;
        info!(job_id = %job.id, subscription_id = %subscription.id, "Created upstream subscription");

        let now = Utc::now();
        let webhook = Webhook {
            id: Uuid::new_v4(),
            user_id: job.user_id.clone(),
            job_id: job.id,
            subscription_id: subscription.id.clone(),
            url: request.webhook_url,
            secret,
            status: WebhookStatus::Active,
            filters: filters.clone(),
            created_at: now,
            updated_at: now,
        };

        match self.store.insert_active_webhook(&webhook).await {
            Ok(WebhookInsert::Inserted(webhook)) => Ok(webhook),
            Ok(WebhookInsert::Existing(existing)) => {
                // A concurrent create won; drop the subscription we just made
                warn!(
                    job_id = %job.id,
                    subscription_id = %subscription.id,
                    "Concurrent webhook creation detected, removing duplicate subscription"
                );
                self.delete_upstream(&subscription.id).await;
                Ok(existing)
            }
            Err(e) => {
                self.delete_upstream(&subscription.id).await;
                Err(e)
            }
        }
    }

    /// Best-effort upstream delete; returns whether the subscription is gone
    pub async fn delete_upstream(&self, subscription_id: &str) -> bool {
        if let Err(e) = self.acquire_outbound().await {
            warn!(subscription_id, "Skipping upstream delete: {}", e);
            return false;
        }
        match self.provider.delete_subscription(subscription_id).await {
            Ok(()) => true,
            Err(UpstreamError::SubscriptionNotFound(_)) => {
                debug!(subscription_id, "Subscription already gone upstream");
                true
            }
            Err(e) => {
                warn!(subscription_id, "Failed to delete upstream subscription: {}", e);
                false
            }
        }
    }

    /// Delete a webhook upstream and mark it `deleted` locally
    ///
    /// The local record is marked even when the upstream call fails.
    /// Returns whether the upstream subscription is confirmed gone.
    pub async fn delete(&self, webhook_id: Uuid) -> IndexerResult<bool> {
        let webhook = self
            .store
            .get_webhook(webhook_id)
            .await?
            .ok_or_else(|| IndexerError::not_found(format!("webhook {}", webhook_id)))?;

        if webhook.status == WebhookStatus::Deleted {
            return Ok(true);
        }

        let upstream_gone = self.delete_upstream(&webhook.subscription_id).await;
        self.store
            .set_webhook_status(webhook_id, WebhookStatus::Deleted)
            .await?;
        info!(
            webhook_id = %webhook_id,
            job_id = %webhook.job_id,
            upstream_gone,
            "Webhook marked deleted"
        );
        Ok(upstream_gone)
    }

    /// Bring upstream subscriptions and local records for a user back in line
    pub async fn reconcile(&self, user_id: &str) -> IndexerResult<ReconcileReport> {
        self.acquire_outbound().await?;
        let upstream = self.provider.list_subscriptions().await?;
        let local = self.store.webhooks_for_user(user_id).await?;
        let job_ids: HashSet<Uuid> = self
            .store
            .list_jobs_for_user(user_id)
            .await?
            .into_iter()
            .map(|job| job.id)
            .collect();

        let active: HashSet<&str> = local
            .iter()
            .filter(|w| w.status == WebhookStatus::Active)
            .map(|w| w.subscription_id.as_str())
            .collect();
        let known: HashSet<&str> = local.iter().map(|w| w.subscription_id.as_str()).collect();

        let mut report = ReconcileReport {
            checked: upstream.len(),
            ..ReconcileReport::default()
        };

        for subscription in &upstream {
            let owned = known.contains(subscription.id.as_str())
                || self
                    .job_id_from_url(&subscription.webhook_url)
                    .map_or(false, |id| job_ids.contains(&id));
            if !owned || active.contains(subscription.id.as_str()) {
                continue;
            }

            if self.delete_upstream(&subscription.id).await {
                info!(user_id, subscription_id = %subscription.id, "Deleted orphaned subscription");
                report.deleted.push(subscription.id.clone());
            } else {
                report.failed.push(subscription.id.clone());
            }
        }

        let upstream_ids: HashSet<&str> = upstream.iter().map(|s| s.id.as_str()).collect();
        for webhook in local.iter().filter(|w| w.status == WebhookStatus::Active) {
            if upstream_ids.contains(webhook.subscription_id.as_str()) {
                continue;
            }
            match self.store.set_webhook_status(webhook.id, WebhookStatus::Error).await {
                Ok(_) => {
                    warn!(
                        webhook_id = %webhook.id,
                        subscription_id = %webhook.subscription_id,
                        "Active webhook missing upstream, marked error"
                    );
                    report.marked_error.push(webhook.id);
                }
                Err(e) => warn!(webhook_id = %webhook.id, "Failed to mark webhook error: {}", e),
            }
        }

        Ok(report)
    }
}
