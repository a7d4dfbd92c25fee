use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::scheduler::{ResumeBehavior, ScheduleConfig};

const CONFIG_FILE_NAME: &str = "config.toml";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub poll: PollConfig,
}

/// Monitoring server connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the monitoring API
    pub base_url: String,
    /// API key sent as X-Api-Key
    pub api_key: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8181".to_string(),
            api_key: String::new(),
            timeout_secs: 10,
        }
    }
}

/// Polling schedule settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Activity poll period in milliseconds
    pub activity_interval_ms: u64,
    /// History poll period in milliseconds
    pub history_interval_ms: u64,
    /// History page length per poll
    pub history_page_length: usize,
    /// Suspend polling while the host reports hidden
    pub pause_when_hidden: bool,
    /// Resume action: "if-stale" or "immediate"
    pub resume_behavior: String,
    /// Age threshold for "if-stale" resumes, in milliseconds
    pub stale_after_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            activity_interval_ms: 10_000,
            history_interval_ms: 60_000,
            history_page_length: 25,
            pause_when_hidden: true,
            resume_behavior: "if-stale".to_string(),
            stale_after_ms: 30_000,
        }
    }
}

impl PollConfig {
    fn resume_behavior(&self) -> ResumeBehavior {
        match self.resume_behavior.as_str() {
            "immediate" => ResumeBehavior::ImmediateRefresh,
            // Anything else falls back to the conservative default.
            _ => ResumeBehavior::RefreshIfStale,
        }
    }

    fn schedule(&self, interval_ms: u64) -> ScheduleConfig {
        ScheduleConfig::every(Duration::from_millis(interval_ms))
            .pause_when_hidden(self.pause_when_hidden)
            .resume_behavior(self.resume_behavior())
            .stale_after(Duration::from_millis(self.stale_after_ms))
    }

    pub fn activity_schedule(&self) -> ScheduleConfig {
        self.schedule(self.activity_interval_ms)
    }

    pub fn history_schedule(&self) -> ScheduleConfig {
        self.schedule(self.history_interval_ms)
    }
}

impl Config {
    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("tidewatch");

        fs::create_dir_all(&config_dir)
            .context("Failed to create config directory")?;

        Ok(config_dir.join(CONFIG_FILE_NAME))
    }

    /// Load configuration from the default path, creating it on first run
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            Self::load_from(&path)
        } else {
            let config = Config::default();
            config.save_to(&path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(config)
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;

        Ok(())
    }
}
