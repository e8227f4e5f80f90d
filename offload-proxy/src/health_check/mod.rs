//! Probing servers and keeping the pool in step with what is reachable.

pub mod discovery;
pub mod prober;
