//! TCP connect probes for server reachability.

use std::io::ErrorKind;
use std::time::Duration;

use async_trait::async_trait;
use offload_core::{ProbeOutcome, Prober};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::{self, Instant};

/// Default port a probe connects to.
pub const DEFAULT_PROBE_PORT: u16 = 80;

/// Default time a probe waits for resolution and connect together.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(1500);

/// Measures reachability by opening a TCP connection.
///
/// A refused connection still means the host answered, so it counts as reachable with the
/// measured round trip. Resolution failures and timeouts count as unreachable.
#[derive(Debug, Clone)]
pub struct TcpProber {
    port: u16,
    timeout: Duration,
}

impl TcpProber {
    /// Probe `port` on every address, giving up after `timeout`.
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }
}

impl Default for TcpProber {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_PORT, DEFAULT_PROBE_TIMEOUT)
    }
}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, address: &str) -> ProbeOutcome {
        let started = Instant::now();

        let target = match time::timeout(self.timeout, lookup_host((address, self.port))).await {
            Ok(Ok(mut addrs)) => addrs.next(),
            Ok(Err(_)) => None,
            Err(_) => return ProbeOutcome::TimedOut,
        };
        let Some(target) = target else {
            return ProbeOutcome::UnknownHost;
        };

        let remaining = self.timeout.saturating_sub(started.elapsed());
        let connect_started = Instant::now();
        match time::timeout(remaining, TcpStream::connect(target)).await {
            Ok(Ok(_stream)) => reachable(connect_started),
            Ok(Err(err)) if err.kind() == ErrorKind::ConnectionRefused => reachable(connect_started),
            Ok(Err(_)) => ProbeOutcome::Unreachable,
            Err(_) => ProbeOutcome::TimedOut,
        }
    }
}

fn reachable(connect_started: Instant) -> ProbeOutcome {
    ProbeOutcome::Reachable {
        latency_ms: connect_started.elapsed().as_secs_f64() * 1000.0,
    }
}
