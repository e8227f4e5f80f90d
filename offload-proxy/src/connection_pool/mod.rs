//! Reusable outbound connections.

pub mod pool;
