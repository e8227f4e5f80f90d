//! Server records and their liveness history.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crate::domain::probe::{ProbeOutcome, Prober};

/// Address of the local device. Its presence in a pool enables local execution.
pub const LOOPBACK_ADDRESS: &str = "127.0.0.1";

/// One timestamped reachability measurement for a server.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LivenessSample {
    /// Whether the server answered the probe.
    pub reachable: bool,
    /// Measured round trip in milliseconds, `0.0` when unreachable.
    pub latency_ms: f64,
    /// Wall-clock time the sample was taken.
    pub observed_at: DateTime<Utc>,
}

impl LivenessSample {
    /// A successful measurement taken now.
    pub fn reachable(latency_ms: f64) -> Self {
        Self {
            reachable: true,
            latency_ms,
            observed_at: Utc::now(),
        }
    }

    /// A failed measurement taken now.
    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            latency_ms: 0.0,
            observed_at: Utc::now(),
        }
    }
}

impl From<ProbeOutcome> for LivenessSample {
    fn from(outcome: ProbeOutcome) -> Self {
        match outcome {
            ProbeOutcome::Reachable { latency_ms } => Self::reachable(latency_ms),
            ProbeOutcome::UnknownHost | ProbeOutcome::TimedOut | ProbeOutcome::Unreachable => {
                Self::unreachable()
            }
        }
    }
}

/// A remote (or local) server that tasks can be offloaded to.
///
/// Two records are the same server when their addresses match, whatever their names.
#[derive(Debug)]
pub struct ServerRecord {
    /// Human readable label, e.g. the config key or the refresh source.
    pub name: String,
    /// IP address or hostname.
    pub address: String,
    history: Mutex<Vec<LivenessSample>>,
}

impl ServerRecord {
    /// Create a record with an empty history.
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Whether this record points at the local device.
    pub fn is_loopback(&self) -> bool {
        self.address == LOOPBACK_ADDRESS
    }

    /// Append a sample to the history.
    pub fn record_sample(&self, sample: LivenessSample) {
        self.history.lock().push(sample);
    }

    /// The most recent sample, if the server was ever probed.
    pub fn latest_sample(&self) -> Option<LivenessSample> {
        self.history.lock().last().copied()
    }

    /// A copy of the full history, oldest first.
    pub fn history(&self) -> Vec<LivenessSample> {
        self.history.lock().clone()
    }

    /// Probe the server now and append the result to its history.
    pub async fn test(&self, prober: &dyn Prober) -> LivenessSample {
        let outcome = prober.probe(&self.address).await;
        let sample = LivenessSample::from(outcome);
        debug!(server = %self, ?outcome, "probed server");
        self.record_sample(sample);
        sample
    }
}

impl PartialEq for ServerRecord {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for ServerRecord {}

impl Hash for ServerRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl fmt::Display for ServerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Server({}, {})", self.name, self.address)
    }
}

/// A thread-safe reference to a ServerRecord.
pub type SharedServer = Arc<ServerRecord>;
