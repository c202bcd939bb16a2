//! Infrastructure layer
//!
//! Service wiring shared by the binary and the integration tests

pub mod service_container;

pub use service_container::ServiceContainer;
