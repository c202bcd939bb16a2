//! Adapters implementing the core ports

pub mod notify;
pub mod provider;
pub mod storage;
pub mod target;

pub use notify::BroadcastNotifier;
pub use provider::{HttpWebhookProvider, MockWebhookProvider};
pub use storage::{MemoryJobStore, PostgresJobStore};
pub use target::{MemoryTarget, MemoryTargetFactory, PgTargetFactory};
