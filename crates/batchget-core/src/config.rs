use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per transfer or size probe (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff (e.g. 0.25 = 250ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 0.25,
            max_delay_secs: 30,
        }
    }
}

/// Global configuration loaded from `~/.config/batchget/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchgetConfig {
    /// Worker threads given to a newly created job.
    pub threads_per_job: usize,
    /// Global bandwidth cap in bytes per second, split evenly across active
    /// transfers. 0 = unlimited.
    pub max_bytes_per_sec: u64,
    /// Journal flush cadence (the update cycle tick).
    pub tick_interval_ms: u64,
    /// How long a user stop waits for the worker to acknowledge.
    pub stop_wait_secs: u64,
    /// Default folder for new jobs; the CLI falls back to the current dir.
    pub download_dir: Option<PathBuf>,
    /// Database path; defaults to `$XDG_DATA_HOME/batchget/batchget.db`.
    pub database_path: Option<PathBuf>,
    /// Optional retry policy; if missing, built-in defaults are used.
    pub retry: Option<RetryConfig>,
}

impl Default for BatchgetConfig {
    fn default() -> Self {
        Self {
            threads_per_job: 3,
            max_bytes_per_sec: 0,
            tick_interval_ms: 1000,
            stop_wait_secs: 5,
            download_dir: None,
            database_path: None,
            retry: None,
        }
    }
}

impl BatchgetConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(10))
    }

    pub fn stop_wait(&self) -> Duration {
        Duration::from_secs(self.stop_wait_secs)
    }

    /// Configured database path, or the XDG data default.
    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(p) = &self.database_path {
            return Ok(p.clone());
        }
        let xdg_dirs = xdg::BaseDirectories::with_prefix("batchget")?;
        Ok(xdg_dirs.place_data_file("batchget.db")?)
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("batchget")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<BatchgetConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = BatchgetConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: BatchgetConfig = toml::from_str(&data)?;
    Ok(cfg)
}
