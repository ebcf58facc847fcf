use crate::error::{Result, SyncError};
use crate::sync::catalog::DEFAULT_STALENESS;
use crate::sync::poller::DEFAULT_POLL_INTERVAL;
use crate::transport::DEFAULT_REQUEST_TIMEOUT;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level tracksync configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Active identity (account name)
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub catalog: CatalogSection,
    #[serde(default)]
    pub poller: PollerSection,
    #[serde(default)]
    pub storage: StorageSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    /// argv of the agent process; empty means no agent link
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSection {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_staleness_hours")]
    pub staleness_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerSection {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSection {
    /// Keyspace directory; defaults to the platform data dir
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_millis() as u64
}
fn default_channel_capacity() -> usize {
    256
}
fn default_staleness_hours() -> u64 {
    DEFAULT_STALENESS.as_secs() / SECS_PER_HOUR
}
fn default_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL.as_secs()
}

const SECS_PER_HOUR: u64 = 60 * 60;

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            request_timeout_ms: default_request_timeout_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for CatalogSection {
    fn default() -> Self {
        Self {
            url: None,
            staleness_hours: default_staleness_hours(),
        }
    }
}

impl Default for PollerSection {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

impl Config {
    /// Load config from a TOML file, or return defaults if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str::<Config>(&content)
                .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| SyncError::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.poller.interval_secs == 0 {
            return Err(SyncError::Config("poller.interval_secs must be > 0".into()));
        }
        if self.agent.request_timeout_ms == 0 {
            return Err(SyncError::Config(
                "agent.request_timeout_ms must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Default config file location.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tracksync")
            .join("config.toml")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.storage.path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("tracksync")
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.agent.request_timeout_ms)
    }

    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.catalog.staleness_hours.saturating_mul(SECS_PER_HOUR))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poller.interval_secs)
    }
}
