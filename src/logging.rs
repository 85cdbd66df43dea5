//! Logger installation for binaries embedding vws.
//!
//! The library only talks to the `log` facade. A binary calls [`init`] once
//! to route records through `env_logger`, with a default level and optional
//! per-module levels taken from [`Config`]. `RUST_LOG`, when set, wins over
//! both.

use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::{Context, Result};
use log::LevelFilter;

use crate::config::Config;

/// Level selection for [`init`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Level applied to every module without an override.
    pub default_level: String,
    /// Module path -> level.
    pub module_levels: BTreeMap<String, String>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            default_level: "info".to_string(),
            module_levels: BTreeMap::new(),
        }
    }
}

impl From<&Config> for LogSettings {
    fn from(config: &Config) -> Self {
        Self {
            default_level: config.log_level.clone(),
            module_levels: config.module_levels.clone(),
        }
    }
}

impl LogSettings {
    /// Build an `env_logger` filter string such as `info,vws::channel=debug`.
    ///
    /// Entries with unknown levels are left out and returned separately.
    #[must_use]
    pub fn filter_directives(&self) -> (String, Vec<String>) {
        let mut rejected = Vec::new();

        let default = match LevelFilter::from_str(&self.default_level) {
            Ok(level) => level,
            Err(_) => {
                rejected.push(format!("default level '{}'", self.default_level));
                LevelFilter::Info
            }
        };

        let mut parts = vec![default.to_string().to_lowercase()];
        for (module, level) in &self.module_levels {
            match LevelFilter::from_str(level) {
                Ok(level) => parts.push(format!("{module}={}", level.to_string().to_lowercase())),
                Err(_) => rejected.push(format!("{module}={level}")),
            }
        }

        (parts.join(","), rejected)
    }
}

/// Install `env_logger` as the global logger.
///
/// # Errors
///
/// Returns an error if a global logger is already installed.
pub fn init(settings: &LogSettings) -> Result<()> {
    let (directives, rejected) = settings.filter_directives();

    let env = env_logger::Env::default().default_filter_or(directives.as_str());
    env_logger::Builder::from_env(env)
        .format_timestamp_secs()
        .try_init()
        .context("Failed to install logger")?;

    for entry in rejected {
        log::warn!("Ignoring invalid log level {entry}");
    }
    Ok(())
}
