//! Core domain abstractions and types
//!
//! This module contains the foundational types, traits, and error definitions
//! that the services and adapters share. It is independent of any specific
//! infrastructure concerns.

pub mod error;
pub mod traits;
pub mod types;

// Re-export commonly used items
pub use error::{IndexerError, IndexerResult, StorageError, UpstreamError};
pub use traits::{
    JobNotification, JobStore, Notifier, Subscription, SubscriptionRequest, TargetDatabase,
    TargetDatabaseFactory, WebhookProvider,
};
pub use types::*;
