//! Hexagonal architecture ports (interfaces)

pub mod outbound;
pub mod store;

pub use outbound::*;
pub use store::*;
