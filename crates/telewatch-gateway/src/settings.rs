//! Gateway settings loader.
//!
//! Settings come from an optional YAML file; every field has a default so
//! the gateway starts without any configuration. CLI flags override file
//! values in `main`.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

/// Default HTTP bind address.
pub const DEFAULT_BIND: &str = "127.0.0.1:8080";
/// Default data directory for history, configurations and protocols.
pub const DEFAULT_DATA_DIR: &str = "data";
/// Default per-subscriber buffer of the live bus.
pub const DEFAULT_BUS_CAPACITY: usize = 2048;

/// Addresses of one channel's endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointSettings {
    /// Local address (`host:port`).
    pub local: String,
    /// Remote peer address (`host:port`).
    pub remote: String,
}

/// Runtime settings of the gateway process.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// HTTP bind address.
    pub bind: String,
    /// Root of all durable state.
    pub data_dir: PathBuf,
    /// Per-subscriber buffer of the live bus.
    pub bus_capacity: usize,
    /// Client (controlling station) endpoint addresses.
    pub client: EndpointSettings,
    /// Server (controlled station) endpoint addresses.
    pub server: EndpointSettings,
    /// Signal list document resolved against `data_dir` when relative.
    pub signal_list: Option<PathBuf>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            bus_capacity: DEFAULT_BUS_CAPACITY,
            client: EndpointSettings {
                local: "0.0.0.0:0".to_string(),
                remote: "127.0.0.1:2404".to_string(),
            },
            server: EndpointSettings {
                local: "0.0.0.0:2404".to_string(),
                remote: "127.0.0.1:0".to_string(),
            },
            signal_list: None,
        }
    }
}

impl GatewaySettings {
    /// Load settings from `path`, or the defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings file {}", path.display()))?;
        let settings: Self = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing settings file {}", path.display()))?;
        Ok(settings)
    }

    /// Signal list path resolved against the data directory.
    #[must_use]
    pub fn signal_list_path(&self) -> Option<PathBuf> {
        let path = self.signal_list.as_ref()?;
        if path.is_absolute() {
            Some(path.clone())
        } else {
            Some(self.data_dir.join(path))
        }
    }
}
