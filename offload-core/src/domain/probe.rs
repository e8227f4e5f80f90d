//! Reachability probing.

use async_trait::async_trait;

/// Result of a single reachability check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProbeOutcome {
    /// The host answered after `latency_ms` milliseconds.
    Reachable {
        /// Round trip in milliseconds.
        latency_ms: f64,
    },
    /// The address could not be resolved.
    UnknownHost,
    /// No answer within the probe timeout.
    TimedOut,
    /// The host resolved but the network refused to route to it.
    Unreachable,
}

impl ProbeOutcome {
    /// The measured latency, if the host answered.
    pub fn latency_ms(&self) -> Option<f64> {
        match self {
            ProbeOutcome::Reachable { latency_ms } => Some(*latency_ms),
            _ => None,
        }
    }
}

/// Measures reachability and latency of a single address.
///
/// Implementations never fail: every failure mode is folded into a [`ProbeOutcome`].
/// They must be callable concurrently for different addresses.
#[async_trait]
pub trait Prober: Send + Sync + std::fmt::Debug {
    /// Probe `address` once.
    async fn probe(&self, address: &str) -> ProbeOutcome;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers from a fixed table. Addresses missing from the table are unknown hosts.
    #[derive(Debug, Default)]
    pub struct FixedProber {
        latencies: HashMap<String, Option<f64>>,
        calls: AtomicUsize,
    }

    impl FixedProber {
        pub fn new<'a>(entries: impl IntoIterator<Item = (&'a str, Option<f64>)>) -> Self {
            Self {
                latencies: entries
                    .into_iter()
                    .map(|(addr, latency)| (addr.to_string(), latency))
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl Prober for FixedProber {
        async fn probe(&self, address: &str) -> ProbeOutcome {
            self.calls.fetch_add(1, Ordering::Relaxed);
            match self.latencies.get(address) {
                Some(Some(latency_ms)) => ProbeOutcome::Reachable {
                    latency_ms: *latency_ms,
                },
                Some(None) => ProbeOutcome::TimedOut,
                None => ProbeOutcome::UnknownHost,
            }
        }
    }
}
