//! Offload Proxy Engine
//!
//! Loads a configuration profile, builds the decision engine and serves offload requests.

use std::net::SocketAddr;
use std::sync::Arc;

use offload_proxy::config::{Settings, DEFAULT_PROFILE};
use offload_proxy::health_check::discovery::spawn_discovery;
use offload_proxy::{server, DecisionEngine};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// The primary entrypoint for the offload proxy.
///
/// Reads `OFFLOAD_CONFIG`, `OFFLOAD_PROFILE` and `OFFLOAD_LISTEN` from the environment.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Offload Proxy v{}", env!("CARGO_PKG_VERSION"));

    let settings = match std::env::var("OFFLOAD_CONFIG") {
        Ok(path) => Settings::load(&path)?,
        Err(_) => {
            tracing::warn!("OFFLOAD_CONFIG not set, using built-in defaults");
            Settings::default()
        }
    };
    let profile_name =
        std::env::var("OFFLOAD_PROFILE").unwrap_or_else(|_| DEFAULT_PROFILE.to_string());
    let profile = settings.profile(&profile_name)?;

    let engine = Arc::new(DecisionEngine::from_profile(profile)?);
    tracing::info!(
        profile = %profile_name,
        algorithm = engine.algorithm(),
        admission_control = engine.admission_control(),
        pool_size = engine.pool_size(),
        "decision engine ready"
    );

    if let Some(discovery) = profile.discovery.clone() {
        spawn_discovery(engine.clone(), discovery);
    }

    let addr: SocketAddr = std::env::var("OFFLOAD_LISTEN")
        .unwrap_or_else(|_| "0.0.0.0:8080".into())
        .parse()?;

    if let Err(e) = server::start_server(addr, engine).await {
        tracing::error!(error = %e, "server failed");
    }

    tracing::info!("Shutting down gracefully.");
    Ok(())
}
