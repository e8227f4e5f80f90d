//! Selection strategies and the registry that maps policy names onto them.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::pool::ServerPool;
use crate::domain::server::SharedServer;
use crate::error::CoreError;

/// Picks one server out of a pool.
#[async_trait]
pub trait SelectionStrategy: Send + Sync + fmt::Debug {
    /// The canonical policy name.
    fn name(&self) -> &'static str;

    /// Choose a member of `pool`, or `None` when nothing is eligible.
    async fn select(&self, pool: &ServerPool) -> Option<SharedServer>;
}

/// Uniform random choice over the members.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSelection;

#[async_trait]
impl SelectionStrategy for RandomSelection {
    fn name(&self) -> &'static str {
        Algorithm::Random.name()
    }

    async fn select(&self, pool: &ServerPool) -> Option<SharedServer> {
        pool.select_random()
    }
}

/// Probe every member and take the fastest responder.
#[derive(Debug, Default, Clone, Copy)]
pub struct MinLatencySelection;

#[async_trait]
impl SelectionStrategy for MinLatencySelection {
    fn name(&self) -> &'static str {
        Algorithm::MinLatency.name()
    }

    async fn select(&self, pool: &ServerPool) -> Option<SharedServer> {
        pool.select_min_latency().await
    }
}

/// The registered selection policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// See [`RandomSelection`].
    Random,
    /// See [`MinLatencySelection`].
    MinLatency,
}

impl Algorithm {
    /// Every registered policy.
    pub const ALL: [Algorithm; 2] = [Algorithm::Random, Algorithm::MinLatency];

    /// The canonical name used in configuration.
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Random => "random",
            Algorithm::MinLatency => "min-latency",
        }
    }

    /// The strategy object implementing this policy.
    pub fn strategy(&self) -> Arc<dyn SelectionStrategy> {
        match self {
            Algorithm::Random => Arc::new(RandomSelection),
            Algorithm::MinLatency => Arc::new(MinLatencySelection),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = CoreError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.trim().to_ascii_lowercase().as_str() {
            "random" | "default" => Ok(Algorithm::Random),
            "min-latency" | "min_latency" | "minimum_ping_delay" | "min_ping" => {
                Ok(Algorithm::MinLatency)
            }
            _ => Err(CoreError::UnknownAlgorithm(name.to_string())),
        }
    }
}

/// Resolve a configured policy name to its strategy.
pub fn strategy_for(name: &str) -> Result<Arc<dyn SelectionStrategy>, CoreError> {
    let algorithm: Algorithm = name.parse()?;
    Ok(algorithm.strategy())
}
