//! Offload Core functionality.
//!
//! This crate contains the server model, the probing abstraction, the server pool with its
//! selection strategies and the throughput monitor that backs local admission control.

pub mod domain;
pub mod error;
pub mod load_balancer;

pub use domain::pool::ServerPool;
pub use domain::probe::{ProbeOutcome, Prober};
pub use domain::server::{LivenessSample, ServerRecord, SharedServer, LOOPBACK_ADDRESS};
pub use error::CoreError;
pub use load_balancer::selector::{strategy_for, Algorithm, SelectionStrategy};
pub use load_balancer::throughput::ThroughputMonitor;
