//! Offload configuration.
//!
//! Settings are a set of named profiles. Each profile describes one engine: its servers,
//! the selection policy, admission control and the dispatch and probe limits.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{OffloadError, Result};

/// Name of the profile used when none is requested.
pub const DEFAULT_PROFILE: &str = "default";

/// All configured profiles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Profiles by name.
    pub profiles: BTreeMap<String, ProfileConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            profiles: BTreeMap::from([(DEFAULT_PROFILE.to_string(), ProfileConfig::default())]),
        }
    }
}

impl Settings {
    /// Load from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse from a JSON document.
    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Save to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Look up a profile by name.
    pub fn profile(&self, name: &str) -> Result<&ProfileConfig> {
        self.profiles
            .get(name)
            .ok_or_else(|| OffloadError::UnknownProfile(name.to_string()))
    }
}

/// Configuration of one decision engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    /// Server name to address. Iterated in name order.
    pub servers: BTreeMap<String, String>,
    /// Registered selection policy name.
    pub algorithm: String,
    /// Gate local execution on recent dispatch throughput.
    pub admission_control: bool,
    /// Length of the throughput window in seconds.
    pub throughput_window_secs: u64,
    /// Dispatches per window the local device is expected to handle.
    pub expected_throughput: usize,
    /// Dispatches allowed in flight at once.
    pub max_workers: usize,
    /// Per-dispatch timeout in milliseconds.
    pub dispatch_timeout_ms: u64,
    /// Reachability probe settings.
    pub probe: ProbeConfig,
    /// Optional periodic refresh from a discovery endpoint.
    pub discovery: Option<DiscoveryConfig>,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            servers: BTreeMap::from([
                ("LocalDevice".to_string(), "127.0.0.1".to_string()),
                ("vagrant-ubuntu".to_string(), "192.168.56.2".to_string()),
            ]),
            algorithm: "random".into(),
            admission_control: true,
            throughput_window_secs: 1,
            expected_throughput: 10,
            max_workers: 10,
            dispatch_timeout_ms: 5_000,
            probe: ProbeConfig::default(),
            discovery: None,
        }
    }
}

impl ProfileConfig {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(OffloadError::Config("max_workers must be at least 1".into()));
        }
        if self.throughput_window_secs == 0 {
            return Err(OffloadError::Config(
                "throughput_window_secs must be at least 1".into(),
            ));
        }
        if self.probe.concurrency == 0 {
            return Err(OffloadError::Config("probe.concurrency must be at least 1".into()));
        }
        if let Some(discovery) = &self.discovery {
            if discovery.interval_secs == 0 {
                return Err(OffloadError::Config(
                    "discovery.interval_secs must be at least 1".into(),
                ));
            }
        }
        Ok(())
    }

    /// The throughput window as a duration.
    pub fn throughput_window(&self) -> Duration {
        Duration::from_secs(self.throughput_window_secs)
    }

    /// The dispatch timeout as a duration.
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }
}

/// Reachability probe settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// TCP port probed on every server.
    pub port: u16,
    /// Give up on a probe after this many milliseconds.
    pub timeout_ms: u64,
    /// Probes in flight at once during a fan-out.
    pub concurrency: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            port: 80,
            timeout_ms: 1_500,
            concurrency: 16,
        }
    }
}

impl ProbeConfig {
    /// The probe timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Periodic pool refresh from an endpoint answering `{"data": [addresses]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Plain `http://` URL of the discovery endpoint.
    pub url: String,
    /// Seconds between refreshes.
    #[serde(default = "default_discovery_interval")]
    pub interval_secs: u64,
    /// Name given to servers added from this source.
    #[serde(default = "default_discovery_label")]
    pub label: String,
}

fn default_discovery_interval() -> u64 {
    30
}

fn default_discovery_label() -> String {
    "Discovered".into()
}
