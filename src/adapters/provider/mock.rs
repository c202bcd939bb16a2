//! In-memory webhook provider for development and tests

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::core::{Subscription, SubscriptionRequest, UpstreamError, WebhookProvider};

/// Provider that keeps subscriptions in a map
///
/// Creates and deletes can be made to fail to exercise error paths.
#[derive(Default)]
pub struct MockWebhookProvider {
    subscriptions: Mutex<BTreeMap<String, Subscription>>,
    next_id: AtomicUsize,
    create_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    fail_creates: AtomicBool,
    fail_deletes: AtomicBool,
}

impl MockWebhookProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Put a subscription upstream without going through `create_subscription`
    pub fn seed(&self, subscription: Subscription) {
        if let Ok(mut subs) = self.subscriptions.lock() {
            subs.insert(subscription.id.clone(), subscription);
        }
    }

    pub fn contains(&self, subscription_id: &str) -> bool {
        self.subscriptions
            .lock()
            .map(|subs| subs.contains_key(subscription_id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.lock().map(|subs| subs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_err() -> UpstreamError {
        UpstreamError::Request("mock provider lock poisoned".to_string())
    }
}

#[async_trait]
impl WebhookProvider for MockWebhookProvider {
    async fn create_subscription(&self, request: &SubscriptionRequest) -> Result<Subscription, UpstreamError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(UpstreamError::Status {
                status: 503,
                message: "provider unavailable".to_string(),
            });
        }

        let id = format!("mock-sub-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let mut accounts = request.account_addresses.clone();
        accounts.extend(request.program_ids.iter().cloned());
        let subscription = Subscription {
            id: id.clone(),
            webhook_url: request.webhook_url.clone(),
            account_addresses: accounts,
            transaction_types: request.transaction_types.clone(),
        };
        self.subscriptions
            .lock()
            .map_err(|_| Self::lock_err())?
            .insert(id, subscription.clone());
        Ok(subscription)
    }

    async fn list_subscriptions(&self) -> Result<Vec<Subscription>, UpstreamError> {
        Ok(self
            .subscriptions
            .lock()
            .map_err(|_| Self::lock_err())?
            .values()
            .cloned()
            .collect())
    }

    async fn delete_subscription(&self, subscription_id: &str) -> Result<(), UpstreamError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(UpstreamError::Status {
                status: 503,
                message: "provider unavailable".to_string(),
            });
        }
        match self
            .subscriptions
            .lock()
            .map_err(|_| Self::lock_err())?
            .remove(subscription_id)
        {
            Some(_) => Ok(()),
            None => Err(UpstreamError::SubscriptionNotFound(subscription_id.to_string())),
        }
    }
}
