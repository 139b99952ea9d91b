//! Fleet configuration and the node registry.
//!
//! The registry is a static list of node descriptors loaded once at
//! startup from a YAML file. Descriptors are never mutated afterwards.
//!
//! ```yaml
//! auditDbPath: /var/lib/fleet/fleet_audit.db
//! probeTimeoutSecs: 10
//! nodes:
//!   - name: Power-Drop
//!     healthAddress: https://ghost-powerdrop.onrender.com
//!     metricsStoreAddress: /var/lib/fleet/powerdrop.db
//!     platform: lovable
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_METRICS_TIMEOUT_SECS: u64 = 10;
const DATA_DIR_NAME: &str = ".fleet-controller";

/// Deployment platform a node runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Lovable,
    Shopify,
    Custom,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Lovable => "lovable",
            Platform::Shopify => "shopify",
            Platform::Custom => "custom",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One storefront node in the fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDescriptor {
    pub name: String,
    /// Base URL of the node's health endpoint.
    pub health_address: String,
    /// Path or `file:` URI of the node's metrics database.
    pub metrics_store_address: String,
    pub platform: Platform,
}

/// Top-level fleet configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetConfig {
    #[serde(default)]
    pub audit_db_path: Option<PathBuf>,
    #[serde(default)]
    pub probe_timeout_secs: Option<u64>,
    #[serde(default)]
    pub metrics_timeout_secs: Option<u64>,
    /// Cap on simultaneously running node tasks. Unbounded when absent.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    #[serde(default)]
    pub nodes: Vec<NodeDescriptor>,
}

impl FleetConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: FleetConfig = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate the config file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Resolve the config file location: explicit path, then `FLEET_CONFIG`,
    /// then `~/.fleet-controller/fleet.yaml`.
    pub fn locate(explicit: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
        if let Some(path) = explicit {
            return Ok(path);
        }
        if let Ok(path) = std::env::var("FLEET_CONFIG") {
            return Ok(PathBuf::from(path));
        }
        Ok(default_data_dir()?.join("fleet.yaml"))
    }

    /// Apply environment overrides. `FLEET_DB_URL` wins over `DATABASE_URL`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("FLEET_DB_URL").or_else(|| lookup("DATABASE_URL")) {
            self.audit_db_path = Some(PathBuf::from(url));
        }
    }

    /// Check every descriptor. A malformed registry is fatal at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();

        for (index, node) in self.nodes.iter().enumerate() {
            let invalid = |reason: &str| ConfigError::InvalidNode {
                index,
                name: node.name.clone(),
                reason: reason.to_string(),
            };

            if node.name.trim().is_empty() {
                return Err(invalid("name is empty"));
            }
            if !seen.insert(node.name.as_str()) {
                return Err(invalid("duplicate node name"));
            }
            if node.metrics_store_address.trim().is_empty() {
                return Err(invalid("metricsStoreAddress is empty"));
            }

            match reqwest::Url::parse(&node.health_address) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                Ok(url) => {
                    return Err(invalid(&format!(
                        "healthAddress has unsupported scheme '{}'",
                        url.scheme()
                    )))
                }
                Err(e) => return Err(invalid(&format!("healthAddress is not a URL: {}", e))),
            }
        }

        if self.max_concurrency == Some(0) {
            return Err(ConfigError::Invalid("maxConcurrency must be at least 1".into()));
        }
        if self.probe_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid("probeTimeoutSecs must be at least 1".into()));
        }
        if self.metrics_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid("metricsTimeoutSecs must be at least 1".into()));
        }

        Ok(())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.unwrap_or(DEFAULT_PROBE_TIMEOUT_SECS))
    }

    pub fn metrics_timeout(&self) -> Duration {
        Duration::from_secs(self.metrics_timeout_secs.unwrap_or(DEFAULT_METRICS_TIMEOUT_SECS))
    }

    /// Audit database location, defaulting to `~/.fleet-controller/fleet_audit.db`.
    pub fn audit_db_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.audit_db_path {
            Some(path) => Ok(path.clone()),
            None => Ok(default_data_dir()?.join("fleet_audit.db")),
        }
    }
}

fn default_data_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| home.join(DATA_DIR_NAME))
        .ok_or(ConfigError::NoHomeDir)
}
