//! Domain layer - event models and category processors

pub mod models;
pub mod processors;

pub use models::*;
pub use processors::{EventProcessor, ProcessorRegistry};
