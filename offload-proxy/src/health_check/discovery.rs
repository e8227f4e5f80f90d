//! Background refresh of the server pool from a discovery endpoint.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;
use tracing::{info, warn};

use crate::config::DiscoveryConfig;
use crate::engine::DecisionEngine;

/// Spawns a background Tokio task that periodically fetches the list of known servers
/// and refreshes the engine's pool with it.
pub fn spawn_discovery(engine: Arc<DecisionEngine>, config: DiscoveryConfig) -> JoinHandle<()> {
    let period = Duration::from_secs(config.interval_secs);

    tokio::spawn(async move {
        let mut interval = time::interval(period);
        info!(url = %config.url, ?period, "starting pool discovery");

        loop {
            interval.tick().await;

            match engine.refresh_pool_from(&config.url, &config.label).await {
                Ok(candidates) => info!(
                    candidates,
                    pool_size = engine.pool_size(),
                    "discovery refresh complete"
                ),
                Err(err) => warn!(url = %config.url, error = %err, "discovery refresh failed"),
            }
        }
    })
}
