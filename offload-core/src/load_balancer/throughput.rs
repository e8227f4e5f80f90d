//! Sliding-window dispatch counter used for local admission control.
//!
//! Every dispatch leaves one timestamp behind. The monitor answers how many of them fall
//! inside the last `window`, and whether that count is above the throughput the local
//! device is expected to sustain.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Default length of the counting window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

/// Default number of dispatches per window the local device is expected to handle.
pub const DEFAULT_EXPECTED_THROUGHPUT: usize = 10;

/// Records dispatch timestamps and counts them over a sliding window.
///
/// Timestamps are kept sorted so a window count is two binary searches. Dispatch workers
/// record concurrently through `&self`; the sequence sits behind its own mutex.
#[derive(Debug)]
pub struct ThroughputMonitor {
    timestamps: Mutex<Vec<Instant>>,
    window: Duration,
    expected_throughput: usize,
}

impl ThroughputMonitor {
    /// Create a monitor with the given window and saturation threshold.
    pub fn new(window: Duration, expected_throughput: usize) -> Self {
        Self {
            timestamps: Mutex::new(Vec::new()),
            window,
            expected_throughput,
        }
    }

    /// The configured window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Dispatches per window above which the local device counts as saturated.
    pub fn expected_throughput(&self) -> usize {
        self.expected_throughput
    }

    /// Record one dispatch at `now`.
    ///
    /// Workers may finish out of order, so the timestamp is inserted at its sorted position.
    /// Entries older than the configured window relative to `now` are dropped.
    pub fn record_dispatch(&self, now: Instant) {
        let mut timestamps = self.timestamps.lock();
        let at = timestamps.partition_point(|t| *t <= now);
        timestamps.insert(at, now);

        if let Some(cutoff) = now.checked_sub(self.window) {
            let stale = timestamps.partition_point(|t| *t < cutoff);
            timestamps.drain(..stale);
        }
    }

    /// Number of dispatches recorded in `[now - window, now)`.
    ///
    /// Only entries inside the configured window are retained, so a `window` longer than
    /// the configured one undercounts.
    pub fn count_in_window(&self, now: Instant, window: Duration) -> usize {
        let timestamps = self.timestamps.lock();
        let upper = timestamps.partition_point(|t| *t < now);
        let lower = match now.checked_sub(window) {
            Some(start) => timestamps.partition_point(|t| *t < start),
            None => 0,
        };
        upper.saturating_sub(lower)
    }

    /// Dispatches in the configured window ending now.
    pub fn throughput(&self) -> usize {
        self.count_in_window(Instant::now(), self.window)
    }

    /// Whether the window ending at `now` holds more dispatches than expected.
    pub fn is_saturated(&self, now: Instant) -> bool {
        self.count_in_window(now, self.window) > self.expected_throughput
    }

    /// Number of timestamps currently retained.
    pub fn retained(&self) -> usize {
        self.timestamps.lock().len()
    }
}

impl Default for ThroughputMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_EXPECTED_THROUGHPUT)
    }
}
