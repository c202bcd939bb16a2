//! Application services: job lifecycle, webhook registration, delivery
//! handling and scheduling

pub mod jobs;
pub mod rate_limiter;
pub mod receiver;
pub mod registrar;
pub mod scheduler;
pub mod signature;

pub use jobs::{JobAction, JobService, JobStatusView, StartOutcome};
pub use rate_limiter::RateLimiter;
pub use receiver::{DeliveryOutcome, InboundDelivery, WebhookReceiver};
pub use registrar::{ReconcileReport, WebhookRegistrar};
pub use scheduler::{Scheduler, TickReport};
