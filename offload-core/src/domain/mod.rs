//! Domain models: servers, their probes and the pool that holds them.

pub mod pool;
pub mod probe;
pub mod server;
