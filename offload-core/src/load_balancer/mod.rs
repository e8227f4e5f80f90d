//! Choosing where a task runs.

pub mod selector;
pub mod throughput;
