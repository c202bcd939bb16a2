//! Target database adapters

pub mod memory;
pub mod postgres;

pub use memory::{MemoryTarget, MemoryTargetFactory};
pub use postgres::{PgTarget, PgTargetFactory};
