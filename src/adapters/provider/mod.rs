//! Upstream webhook provider adapters

pub mod http;
pub mod mock;

pub use http::HttpWebhookProvider;
pub use mock::MockWebhookProvider;
