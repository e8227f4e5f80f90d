//! The offloading decision engine.
//!
//! The engine answers two questions for every task: may it run locally, and if not, which
//! remote server takes it. The first is admission control, gated on the throughput monitor;
//! the second is the configured selection strategy. The two never influence each other.

use std::collections::HashSet;
use std::sync::Arc;

use offload_core::{
    strategy_for, SelectionStrategy, ServerPool, ServerRecord, SharedServer, ThroughputMonitor,
    LOOPBACK_ADDRESS,
};
use serde::Deserialize;
use tokio::time::Instant;
use tracing::info;

use crate::config::ProfileConfig;
use crate::dispatch::{Dispatcher, PendingDispatch, TaskDispatch};
use crate::error::{OffloadError, Result};
use crate::health_check::prober::TcpProber;

/// Name given to servers targeted by an explicit address.
pub const USER_SPECIFIED: &str = "UserSpecific";

/// A submitted task: where it went and the handle to its answer.
#[derive(Debug)]
pub struct Submission {
    /// Address the task was dispatched to.
    pub address: String,
    /// Resolves to the remote answer.
    pub pending: PendingDispatch,
}

/// Chooses execution sites and dispatches tasks to them.
#[derive(Debug)]
pub struct DecisionEngine {
    pool: Arc<ServerPool>,
    monitor: Arc<ThroughputMonitor>,
    strategy: Arc<dyn SelectionStrategy>,
    admission_control: bool,
    dispatcher: Dispatcher,
}

impl DecisionEngine {
    /// Build an engine using the algorithm registered as `algorithm`.
    ///
    /// Fails with [`OffloadError::UnknownAlgorithm`] when the name is not registered.
    /// Admission control starts disabled.
    pub fn new(algorithm: &str, pool: ServerPool, dispatcher: Dispatcher) -> Result<Self> {
        let strategy = strategy_for(algorithm)?;
        info!(algorithm = strategy.name(), pool_size = pool.len(), "initialised decision engine");

        Ok(Self {
            pool: Arc::new(pool),
            monitor: Arc::new(ThroughputMonitor::default()),
            strategy,
            admission_control: false,
            dispatcher,
        })
    }

    /// Enable admission control with `monitor` deciding when the local device is saturated.
    pub fn with_admission_control(mut self, monitor: ThroughputMonitor) -> Self {
        self.monitor = Arc::new(monitor);
        self.admission_control = true;
        self
    }

    /// Build an engine from a configuration profile, probing over TCP.
    pub fn from_profile(profile: &ProfileConfig) -> Result<Self> {
        profile.validate()?;

        let prober = TcpProber::new(profile.probe.port, profile.probe.timeout());
        let pool = ServerPool::new(Arc::new(prober)).with_probe_concurrency(profile.probe.concurrency);
        pool.load_from_config(profile.servers.clone());

        let dispatcher = Dispatcher::new(profile.max_workers, profile.dispatch_timeout());
        let engine = Self::new(&profile.algorithm, pool, dispatcher)?;

        Ok(if profile.admission_control {
            engine.with_admission_control(ThroughputMonitor::new(
                profile.throughput_window(),
                profile.expected_throughput,
            ))
        } else {
            engine
        })
    }

    /// Name of the selection policy in use.
    pub fn algorithm(&self) -> &'static str {
        self.strategy.name()
    }

    /// Whether admission control is enabled.
    pub fn admission_control(&self) -> bool {
        self.admission_control
    }

    /// The live server pool.
    pub fn pool(&self) -> &ServerPool {
        &self.pool
    }

    /// The dispatch throughput monitor.
    pub fn monitor(&self) -> &ThroughputMonitor {
        &self.monitor
    }

    /// Pick the server the next task should run on, or `None` when nothing is eligible.
    pub async fn choose_server(&self) -> Option<SharedServer> {
        if !self.admission_control || !self.pool.contains(LOOPBACK_ADDRESS) {
            return self.select_from(&self.pool).await;
        }

        let now = Instant::now();
        if self.monitor.is_saturated(now) {
            info!(
                count = self.monitor.count_in_window(now, self.monitor.window()),
                expected = self.monitor.expected_throughput(),
                "local device saturated, offloading"
            );
            let remote = self.pool.without(LOOPBACK_ADDRESS);
            if remote.is_empty() {
                info!("no remote server to offload to");
                return None;
            }
            return self.select_from(&remote).await;
        }

        self.pool
            .snapshot()
            .iter()
            .find(|server| server.is_loopback())
            .cloned()
    }

    async fn select_from(&self, pool: &ServerPool) -> Option<SharedServer> {
        let chosen = self.strategy.select(pool).await;
        match &chosen {
            Some(server) => info!(%server, algorithm = self.strategy.name(), "chose server"),
            None => info!(algorithm = self.strategy.name(), "failed to choose server"),
        }
        chosen
    }

    /// Dispatch `task` on `port`, to `address` when given, else to the chosen server.
    ///
    /// Returns `None` when no server could be chosen. Transport failures surface when the
    /// pending handle is awaited.
    pub async fn submit_task(
        &self,
        task: &str,
        port: u16,
        address: Option<&str>,
    ) -> Option<Submission> {
        let server = match address {
            Some(address) => Arc::new(ServerRecord::new(USER_SPECIFIED, address)),
            None => match self.choose_server().await {
                Some(server) => server,
                None => {
                    info!(task, "failed to submit task, no server chosen");
                    return None;
                }
            },
        };

        let dispatch = TaskDispatch::new(server, task, port);
        info!(url = %dispatch.url(), "submitting task");

        let address = dispatch.server.address.clone();
        let monitor = self.monitor.clone();
        let pending = self
            .dispatcher
            .execute_with(dispatch, move || monitor.record_dispatch(Instant::now()));

        Some(Submission { address, pending })
    }

    /// Number of servers in the pool.
    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    /// Whether `address` is in the pool.
    pub fn pool_contains(&self, address: &str) -> bool {
        self.pool.contains(address)
    }

    /// The distinct addresses in the pool.
    pub fn pool_addresses(&self) -> HashSet<String> {
        self.pool.addresses()
    }

    /// Refresh the pool from a list of candidate addresses.
    pub async fn refresh_pool<S: AsRef<str> + Sync>(&self, addresses: &[S], label: &str) {
        self.pool.refresh(addresses, label).await;
    }

    /// Fetch candidate addresses from a discovery endpoint and refresh the pool with them.
    ///
    /// The endpoint answers `{"data": ["addr", ...]}`. Returns how many candidates it listed.
    pub async fn refresh_pool_from(&self, url: &str, label: &str) -> Result<usize> {
        let (status, body) = self.dispatcher.fetch(url).await?;
        if !status.is_success() {
            return Err(OffloadError::Transport(format!(
                "discovery endpoint {url} answered {status}"
            )));
        }

        let listing: ServerListing = serde_json::from_str(&body)?;
        self.refresh_pool(&listing.data, label).await;
        Ok(listing.data.len())
    }

    /// Dispatches recorded in the current throughput window.
    pub fn throughput(&self) -> usize {
        self.monitor.throughput()
    }
}

#[derive(Debug, Deserialize)]
struct ServerListing {
    data: Vec<String>,
}
