//! Configuration loading and persistence.
//!
//! Handles reading and writing the vws configuration file and applying
//! environment overrides on top of it.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_HOST, DEFAULT_MAX_LISTENERS, READY_TIMEOUT, REQUEST_TIMEOUT};

/// Name of the configuration file inside [`Config::config_dir`].
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Configuration for vws clients and the `vws` CLI.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// WebSocket endpoint used when a client is created without one.
    pub host: String,
    /// Milliseconds [`crate::Channel::ready`] waits for the socket to open.
    pub ready_timeout_ms: u64,
    /// Milliseconds a request callback waits for its reply.
    pub request_timeout_ms: u64,
    /// Listener cap per event and scope.
    pub max_listeners: usize,
    /// Default log filter (`error`, `warn`, `info`, `debug`, `trace`).
    pub log_level: String,
    /// Per-module log level overrides, keyed by module path.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub module_levels: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            ready_timeout_ms: duration_ms(READY_TIMEOUT),
            request_timeout_ms: duration_ms(REQUEST_TIMEOUT),
            max_listeners: DEFAULT_MAX_LISTENERS,
            log_level: "info".to_string(),
            module_levels: BTreeMap::new(),
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Config {
    /// Returns the configuration directory path.
    ///
    /// Directory selection priority:
    /// 1. `VWS_CONFIG_DIR` env var: explicit override
    /// 2. Default: platform config dir (Linux: ~/.config/vws)
    ///
    /// # Errors
    ///
    /// Returns an error if no platform config directory exists.
    pub fn config_dir() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("VWS_CONFIG_DIR") {
            return Ok(PathBuf::from(dir));
        }
        Ok(dirs::config_dir()
            .context("Could not determine config directory")?
            .join("vws"))
    }

    /// Full path of the configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration directory cannot be determined.
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from file, with environment variable overrides.
    ///
    /// A missing file yields the defaults. An unreadable or malformed file
    /// is logged and also yields the defaults.
    #[must_use]
    pub fn load() -> Self {
        let (config, warnings) = Self::load_with_warnings();
        for warning in warnings {
            log::warn!("{warning}");
        }
        config
    }

    /// Like [`Config::load`], but returns the problems it found instead of
    /// logging them.
    ///
    /// Used before a logger is installed, since the log level itself comes
    /// from the configuration.
    #[must_use]
    pub fn load_with_warnings() -> (Self, Vec<String>) {
        let mut warnings = Vec::new();
        let mut config = match Self::config_path() {
            Ok(path) if path.exists() => Self::load_from_file(&path).unwrap_or_else(|e| {
                warnings.push(format!("Ignoring config file {}: {e:#}", path.display()));
                Self::default()
            }),
            Ok(_) => Self::default(),
            Err(e) => {
                log::debug!("No config directory: {e:#}");
                Self::default()
            }
        };
        config.apply_overrides(|name| std::env::var(name).ok(), &mut warnings);
        (config, warnings)
    }

    /// Loads configuration from `path` without environment overrides.
    ///
    /// Missing fields take their default values.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Persists the configuration to `path` as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created or the
    /// file cannot be written.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Persists the configuration to the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be determined or written.
    pub fn save(&self) -> Result<()> {
        self.save_to_file(&Self::config_path()?)
    }

    /// Apply `VWS_*` overrides looked up through `var`.
    ///
    /// Unparseable numeric values are ignored and reported in `warnings`.
    fn apply_overrides(
        &mut self,
        var: impl Fn(&str) -> Option<String>,
        warnings: &mut Vec<String>,
    ) {
        if let Some(host) = var("VWS_HOST") {
            self.host = host;
        }

        if let Some(level) = var("VWS_LOG_LEVEL") {
            self.log_level = level;
        }

        let numbers = [
            override_number(&var, "VWS_READY_TIMEOUT_MS", &mut self.ready_timeout_ms),
            override_number(&var, "VWS_REQUEST_TIMEOUT_MS", &mut self.request_timeout_ms),
            override_number(&var, "VWS_MAX_LISTENERS", &mut self.max_listeners),
        ];
        warnings.extend(numbers.into_iter().flatten());
    }

    /// Readiness window as a [`Duration`].
    #[must_use]
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    /// Correlation window as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Parse `name` into `target` when set. Returns a warning for bad values.
fn override_number<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    target: &mut T,
) -> Option<String> {
    let raw = var(name)?;
    match raw.parse::<T>() {
        Ok(value) => {
            *target = value;
            None
        }
        Err(_) => Some(format!("Ignoring {name}={raw}: not a number")),
    }
}
