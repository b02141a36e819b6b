//! Pipeline configuration loaded from `<config-dir>/stations.yaml`.
//!
//! ```yaml
//! stations:
//!   - code: ABC
//!     ...
//! radiosonde:
//!   type: scc_netcdf
//!   directory: /data/soundings
//! scc:
//!   max_concurrent_uploads: 4
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use lidar_common::{StationConfig, StationRegistry};
use scc_client::{ClientConfig, DEFAULT_BASE_URL};
use scc_convert::RadiosondeSource;
use serde::Deserialize;
use tracing::{debug, info};

pub const CONFIG_FILE: &str = "stations.yaml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub stations: Vec<StationConfig>,
    #[serde(default)]
    pub radiosonde: RadiosondeSource,
    #[serde(default)]
    pub scc: SccSettings,
}

/// Remote service settings. Credentials never live here, they come from the
/// environment.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SccSettings {
    pub base_url: String,
    pub max_concurrent_uploads: usize,
    pub max_retries: u32,
    pub request_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub max_polls: u32,
}

impl Default for SccSettings {
    fn default() -> Self {
        let defaults = ClientConfig::default();
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            max_concurrent_uploads: defaults.max_concurrent_uploads,
            max_retries: defaults.max_retries,
            request_timeout_secs: defaults.request_timeout.as_secs(),
            poll_interval_secs: defaults.poll_interval.as_secs(),
            max_polls: defaults.max_polls,
        }
    }
}

impl SccSettings {
    /// Client configuration, with the base URL optionally overridden.
    pub fn client_config(&self, base_url: Option<&str>) -> ClientConfig {
        ClientConfig {
            base_url: base_url.unwrap_or(&self.base_url).to_string(),
            max_concurrent_uploads: self.max_concurrent_uploads,
            max_retries: self.max_retries,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            max_polls: self.max_polls,
            ..ClientConfig::default()
        }
    }
}

impl PipelineConfig {
    /// Load the configuration. A missing file yields the defaults and an
    /// empty station registry.
    pub fn load(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join(CONFIG_FILE);
        if !path.exists() {
            debug!(path = %path.display(), "No configuration file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: PipelineConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        info!(
            path = %path.display(),
            stations = config.stations.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn registry(&self) -> Result<StationRegistry> {
        StationRegistry::new(self.stations.clone()).context("Invalid station configuration")
    }
}
