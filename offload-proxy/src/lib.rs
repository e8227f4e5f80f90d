//! Offload Proxy
//!
//! The decision engine and everything around it: TCP probing, pooled outbound connections,
//! the bounded dispatcher, profile configuration and the HTTP front-end.

pub mod config;
pub mod connection_pool;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod health_check;
pub mod server;

pub use config::{ProfileConfig, Settings};
pub use dispatch::{DispatchResponse, Dispatcher, PendingDispatch, TaskDispatch};
pub use engine::{DecisionEngine, Submission};
pub use error::{OffloadError, Result};
