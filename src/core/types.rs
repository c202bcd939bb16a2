//! Core domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::error::IndexerError;

/// Maximum number of checkpoints retained in a job's config
pub const MAX_CHECKPOINTS: usize = 20;

/// Lifecycle status of an indexing job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Initializing,
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Initializing => "initializing",
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// States `start_job` may pick a job up from
    pub const STARTABLE: &'static [JobStatus] = &[JobStatus::Initializing, JobStatus::Pending];

    /// States a crashed process can leave behind
    pub const INTERRUPTIBLE: &'static [JobStatus] = &[JobStatus::Initializing, JobStatus::Running];

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Initializing, Pending | Running | Failed | Cancelled) => true,
            (Pending, Running | Failed | Cancelled) => true,
            (Running, Completed | Failed | Paused | Cancelled | Pending) => true,
            (Paused, Running | Cancelled) => true,
            (Failed, Pending | Cancelled) => true,
            _ => false,
        }
    }

    /// Every state that may legally move to `next`
    pub fn sources_of(next: JobStatus) -> Vec<JobStatus> {
        ALL_STATUSES
            .iter()
            .copied()
            .filter(|s| s.can_transition_to(next))
            .collect()
    }
}

const ALL_STATUSES: [JobStatus; 7] = [
    JobStatus::Initializing,
    JobStatus::Pending,
    JobStatus::Running,
    JobStatus::Paused,
    JobStatus::Completed,
    JobStatus::Failed,
    JobStatus::Cancelled,
];

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Older rows use upper-case names and `active` for a running job.
        match s.to_ascii_lowercase().as_str() {
            "initializing" => Ok(JobStatus::Initializing),
            "pending" => Ok(JobStatus::Pending),
            "running" | "active" => Ok(JobStatus::Running),
            "paused" => Ok(JobStatus::Paused),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" | "canceled" => Ok(JobStatus::Cancelled),
            other => Err(IndexerError::Validation(format!("unknown job status: {}", other))),
        }
    }
}

/// Status of a webhook subscription record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Active,
    Deleted,
    Error,
}

impl WebhookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookStatus::Active => "active",
            WebhookStatus::Deleted => "deleted",
            WebhookStatus::Error => "error",
        }
    }
}

impl FromStr for WebhookStatus {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(WebhookStatus::Active),
            "deleted" => Ok(WebhookStatus::Deleted),
            "error" => Ok(WebhookStatus::Error),
            other => Err(IndexerError::Validation(format!("unknown webhook status: {}", other))),
        }
    }
}

/// Outcome recorded for one delivery
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Success,
    Failed,
    Retrying,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Success => "success",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Retrying => "retrying",
        }
    }
}

impl FromStr for DeliveryStatus {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "success" => Ok(DeliveryStatus::Success),
            "failed" => Ok(DeliveryStatus::Failed),
            "retrying" => Ok(DeliveryStatus::Retrying),
            other => Err(IndexerError::Validation(format!("unknown delivery status: {}", other))),
        }
    }
}

/// Status of a user's target database connection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Pending,
    Active,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Pending => "pending",
            ConnectionStatus::Active => "active",
            ConnectionStatus::Error => "error",
        }
    }
}

impl FromStr for ConnectionStatus {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(ConnectionStatus::Pending),
            "active" => Ok(ConnectionStatus::Active),
            "error" => Ok(ConnectionStatus::Error),
            other => Err(IndexerError::Validation(format!("unknown connection status: {}", other))),
        }
    }
}

/// Event categories a job can index
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Transactions,
    NftEvents,
    TokenTransfers,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Transactions => "transactions",
            EventCategory::NftEvents => "nft_events",
            EventCategory::TokenTransfers => "token_transfers",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category selection of a job
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Categories {
    pub transactions: bool,
    pub nft_events: bool,
    pub token_transfers: bool,
}

impl Categories {
    pub fn enabled(&self) -> Vec<EventCategory> {
        let mut out = Vec::new();
        if self.transactions {
            out.push(EventCategory::Transactions);
        }
        if self.nft_events {
            out.push(EventCategory::NftEvents);
        }
        if self.token_transfers {
            out.push(EventCategory::TokenTransfers);
        }
        out
    }

    pub fn contains(&self, category: EventCategory) -> bool {
        match category {
            EventCategory::Transactions => self.transactions,
            EventCategory::NftEvents => self.nft_events,
            EventCategory::TokenTransfers => self.token_transfers,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.enabled().is_empty()
    }
}

/// Filters pushed to the upstream subscription
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct JobFilters {
    pub account_addresses: Vec<String>,
    pub program_ids: Vec<String>,
    pub transaction_types: Vec<String>,
    /// Job completes once deliveries reach this slot
    pub end_slot: Option<i64>,
}

/// Reference from a job to its live webhook
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookRef {
    pub id: Uuid,
    pub subscription_id: String,
}

/// Progress marker appended after each processed delivery
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checkpoint {
    pub slot: i64,
    pub events: i32,
    pub at: DateTime<Utc>,
}

/// Job config blob persisted as JSON
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct JobConfig {
    pub categories: Categories,
    pub filters: JobFilters,
    pub webhook: Option<WebhookRef>,
    pub first_processed_block: Option<i64>,
    pub last_processed_block: Option<i64>,
    pub checkpoints: Vec<Checkpoint>,
}

impl JobConfig {
    /// Record a processed delivery reaching `slot`
    pub fn advance(&mut self, slot: i64, events: i32, at: DateTime<Utc>) {
        if self.first_processed_block.is_none() {
            self.first_processed_block = Some(slot);
        }
        self.last_processed_block = Some(self.last_processed_block.map_or(slot, |s| s.max(slot)));
        self.checkpoints.push(Checkpoint { slot, events, at });
        if self.checkpoints.len() > MAX_CHECKPOINTS {
            let excess = self.checkpoints.len() - MAX_CHECKPOINTS;
            self.checkpoints.drain(..excess);
        }
    }

    /// Percentage towards `end_slot`, when the job is bounded
    pub fn progress(&self) -> Option<i16> {
        let end = self.filters.end_slot?;
        let first = self.first_processed_block?;
        let last = self.last_processed_block?;
        if last >= end {
            return Some(100);
        }
        if end <= first {
            return Some(100);
        }
        let pct = (i128::from(last) - i128::from(first)) * 100 / (i128::from(end) - i128::from(first));
        Some(pct.clamp(0, 99) as i16)
    }

    pub fn reached_end(&self) -> bool {
        match (self.filters.end_slot, self.last_processed_block) {
            (Some(end), Some(last)) => last >= end,
            _ => false,
        }
    }
}

/// An indexing job row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IndexingJob {
    pub id: Uuid,
    pub user_id: String,
    pub connection_id: Uuid,
    pub job_type: String,
    pub status: JobStatus,
    pub progress: i16,
    pub config: JobConfig,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IndexingJob {
    pub fn new(user_id: &str, request: NewJob) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            connection_id: request.connection_id,
            job_type: request.job_type.unwrap_or_else(|| "realtime".to_string()),
            status: JobStatus::Initializing,
            progress: 0,
            config: JobConfig {
                categories: request.categories,
                filters: request.filters,
                ..JobConfig::default()
            },
            error_message: None,
            retry_count: 0,
            next_retry_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the scheduler may pick this job up at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.next_retry_at.map_or(true, |at| at <= now)
    }
}

/// Request to create a job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewJob {
    pub connection_id: Uuid,
    #[serde(default)]
    pub job_type: Option<String>,
    pub categories: Categories,
    #[serde(default)]
    pub filters: JobFilters,
}

/// Field changes applied atomically together with a status check
#[derive(Debug, Clone, Default)]
pub struct JobChanges {
    pub status: Option<JobStatus>,
    pub progress: Option<i16>,
    pub error_message: Option<Option<String>>,
    pub retry_count: Option<i32>,
    pub next_retry_at: Option<Option<DateTime<Utc>>>,
    pub config: Option<JobConfig>,
    /// Advance the stored config by one processed delivery
    ///
    /// Applied against the locked row so concurrent deliveries don't lose
    /// checkpoints. A running job that reaches its end slot completes.
    pub checkpoint: Option<Checkpoint>,
}

impl JobChanges {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn checkpoint(slot: i64, events: i32, at: DateTime<Utc>) -> Self {
        Self {
            checkpoint: Some(Checkpoint { slot, events, at }),
            ..Self::default()
        }
    }

    pub fn apply(self, job: &mut IndexingJob, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(progress) = self.progress {
            job.progress = progress.clamp(0, 100);
        }
        if let Some(error_message) = self.error_message {
            job.error_message = error_message;
        }
        if let Some(retry_count) = self.retry_count {
            job.retry_count = retry_count;
        }
        if let Some(next_retry_at) = self.next_retry_at {
            job.next_retry_at = next_retry_at;
        }
        if let Some(config) = self.config {
            job.config = config;
        }
        if let Some(checkpoint) = self.checkpoint {
            job.config.advance(checkpoint.slot, checkpoint.events, checkpoint.at);
            if let Some(progress) = job.config.progress() {
                job.progress = progress;
            }
            if job.status == JobStatus::Running && job.config.reached_end() {
                job.status = JobStatus::Completed;
                job.progress = 100;
            }
        }
        job.updated_at = now;
    }
}

/// Result of a compare-and-set job update
#[derive(Debug, Clone)]
pub enum JobUpdate {
    Updated(IndexingJob),
    StatusMismatch(JobStatus),
    Missing,
}

impl JobUpdate {
    pub fn updated(self) -> Option<IndexingJob> {
        match self {
            JobUpdate::Updated(job) => Some(job),
            _ => None,
        }
    }
}

/// A webhook subscription owned by a job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Webhook {
    pub id: Uuid,
    pub user_id: String,
    pub job_id: Uuid,
    pub subscription_id: String,
    pub url: String,
    #[serde(skip_serializing, default)]
    pub secret: String,
    pub status: WebhookStatus,
    pub filters: JobFilters,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of inserting an active webhook for a job
#[derive(Debug, Clone)]
pub enum WebhookInsert {
    Inserted(Webhook),
    /// Another active webhook for the same job won the race
    Existing(Webhook),
}

/// Append-only delivery audit record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookLog {
    pub id: Uuid,
    pub webhook_id: Uuid,
    pub status: DeliveryStatus,
    pub attempt: i32,
    pub payload: serde_json::Value,
    pub events_processed: i32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Target database credentials
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConnection {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub host: String,
    pub port: i32,
    pub database: String,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: String,
    pub ssl: bool,
    pub status: ConnectionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
