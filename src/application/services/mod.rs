pub mod aggregate;
pub mod crypto;
pub mod render;
pub mod resilience;
pub mod schedule;
pub mod transport;
