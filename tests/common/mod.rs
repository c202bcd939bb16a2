//! Shared setup for integration tests: in-memory adapters behind a real container

#![allow(dead_code)]

use anyhow::Result;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;
use webhook_indexer::adapters::{MemoryJobStore, MemoryTargetFactory, MockWebhookProvider};
use webhook_indexer::core::{
    Categories, ConnectionStatus, DatabaseConnection, IndexingJob, JobFilters, JobStore, NewJob,
    Webhook,
};
use webhook_indexer::services::{signature, InboundDelivery, StartOutcome};
use webhook_indexer::{IndexerConfig, ServiceContainer};

pub const USER: &str = "user-1";
pub const OTHER_USER: &str = "user-2";

pub struct TestHarness {
    pub container: ServiceContainer,
    pub store: Arc<MemoryJobStore>,
    pub provider: Arc<MockWebhookProvider>,
    pub targets: Arc<MemoryTargetFactory>,
    /// Connection owned by `USER`
    pub connection_id: Uuid,
}

pub fn test_config() -> IndexerConfig {
    let mut config = IndexerConfig::development();
    config.server.public_base_url = "http://indexer.test".to_string();
    config.scheduler.enabled = false;
    config
}

pub async fn harness() -> Result<TestHarness> {
    harness_with(test_config()).await
}

pub async fn harness_with(config: IndexerConfig) -> Result<TestHarness> {
    let store = Arc::new(MemoryJobStore::new());
    let provider = Arc::new(MockWebhookProvider::new());
    let targets = Arc::new(MemoryTargetFactory::new());

    let connection_id = add_connection(&store, USER, ConnectionStatus::Active).await;

    let container =
        ServiceContainer::with_adapters(config, store.clone(), provider.clone(), targets.clone())?;

    Ok(TestHarness {
        container,
        store,
        provider,
        targets,
        connection_id,
    })
}

pub async fn add_connection(store: &MemoryJobStore, user_id: &str, status: ConnectionStatus) -> Uuid {
    let now = Utc::now();
    let connection = DatabaseConnection {
        id: Uuid::new_v4(),
        user_id: user_id.to_string(),
        name: "analytics".to_string(),
        host: "db.internal".to_string(),
        port: 5432,
        database: "chain".to_string(),
        username: "indexer".to_string(),
        password: "secret".to_string(),
        ssl: true,
        status,
        created_at: now,
        updated_at: now,
    };
    let id = connection.id;
    store.insert_connection(connection).await;
    id
}

pub fn transactions_job(connection_id: Uuid) -> NewJob {
    NewJob {
        connection_id,
        job_type: None,
        categories: Categories {
            transactions: true,
            ..Categories::default()
        },
        filters: JobFilters {
            account_addresses: vec![key(40)],
            ..JobFilters::default()
        },
    }
}

impl TestHarness {
    /// Create a transactions job for `USER` and start it
    pub async fn running_job(&self) -> Result<(IndexingJob, Webhook)> {
        self.running_job_with(transactions_job(self.connection_id)).await
    }

    pub async fn running_job_with(&self, request: NewJob) -> Result<(IndexingJob, Webhook)> {
        let jobs = &self.container.jobs;
        let job = jobs.create_job(USER, request).await?;
        let job = match jobs.start_job(job.id).await? {
            StartOutcome::Started(job) => job,
            other => anyhow::bail!("job did not start: {:?}", other),
        };
        let webhook = self
            .store
            .active_webhook_for_job(job.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("no active webhook"))?;
        Ok((job, webhook))
    }

    pub async fn job(&self, id: Uuid) -> Result<IndexingJob> {
        self.store
            .get_job(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("job {} missing", id))
    }
}

/// Base58 signature-shaped string
pub fn sig(n: u8) -> String {
    bs58::encode([n; 64]).into_string()
}

/// Base58 pubkey-shaped string
pub fn key(n: u8) -> String {
    bs58::encode([n; 32]).into_string()
}

pub fn transaction_event(sig_seed: u8, slot: i64) -> Value {
    json!({
        "category": "transaction",
        "signature": sig(sig_seed),
        "slot": slot,
        "timestamp": 1_700_000_000 + slot,
        "type": "TRANSFER",
        "fee": 5000,
        "feePayer": key(1),
        "instructions": [
            { "programId": key(2), "accounts": [key(3), key(4)] },
            { "programId": key(5), "accounts": [key(6)] }
        ]
    })
}

pub fn token_transfer_event(sig_seed: u8, slot: i64) -> Value {
    json!({
        "category": "token_transfer",
        "signature": sig(sig_seed),
        "slot": slot,
        "timestamp": 1_700_000_000 + slot,
        "transfers": [
            { "mint": key(9), "fromUserAccount": key(10), "toUserAccount": key(11), "tokenAmount": "2.5" }
        ]
    })
}

pub fn delivery_body(subscription_id: &str, events: Vec<Value>) -> Vec<u8> {
    serde_json::to_vec(&json!({ "webhookId": subscription_id, "events": events }))
        .unwrap_or_default()
}

pub fn sign(webhook: &Webhook, body: &[u8]) -> String {
    signature::sign(&webhook.secret, body).unwrap_or_default()
}

/// Delivery exactly as the provider would send it
pub fn signed_delivery<'a>(webhook: &'a Webhook, body: &'a [u8], signature: &'a str) -> InboundDelivery<'a> {
    InboundDelivery {
        job_id: webhook.job_id,
        webhook_id: Some(&webhook.subscription_id),
        signature: Some(signature),
        authorization: None,
        attempt: Some(1),
        body,
    }
}

/// Delivery authenticated with the webhook secret as an auth header, without
/// a signature or subscription header
pub fn token_delivery<'a>(webhook: &'a Webhook, body: &'a [u8], token: &'a str) -> InboundDelivery<'a> {
    InboundDelivery {
        job_id: webhook.job_id,
        webhook_id: None,
        signature: None,
        authorization: Some(token),
        attempt: None,
        body,
    }
}
