//! Domain models for deliveries and target rows

pub mod events;
pub mod rows;

pub use events::*;
pub use rows::*;
