//! Configuration loading and persistence.
//!
//! `config.json` lives in the platform config directory (`mixer-chat/`),
//! or in `MIXER_CHAT_CONFIG_DIR` when set. Environment variables override
//! the file:
//!
//! | Variable                    | Field                    |
//! |-----------------------------|--------------------------|
//! | `MIXER_CHAT_BASE_PATH`      | `base_path`              |
//! | `MIXER_CHAT_TOKEN`          | `token`                  |
//! | `MIXER_CHAT_WORKERS`        | `worker_threads`         |
//! | `MIXER_CHAT_RECONNECT`      | `reconnect`              |
//! | `MIXER_CHAT_MAX_RECONNECTS` | `max_reconnect_attempts` |

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::fs;

use crate::chat::ReconnectPolicy;
use crate::constants;

const CONFIG_FILE: &str = "config.json";

/// Configuration for the chat client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// REST base path used for the chat lookup and message delete.
    pub base_path: String,
    /// OAuth bearer token. Optional; anonymous lookups work without it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Worker threads for the CLI runtime.
    pub worker_threads: usize,
    /// Whether a session replaces a connection that closed on its own.
    pub reconnect: bool,
    /// Consecutive failed reconnect attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_path: constants::DEFAULT_BASE_PATH.to_string(),
            token: None,
            worker_threads: constants::DEFAULT_WORKER_THREADS,
            reconnect: true,
            max_reconnect_attempts: 0,
        }
    }
}

impl Config {
    /// Returns the configuration directory, creating it if necessary.
    ///
    /// `MIXER_CHAT_CONFIG_DIR` takes precedence over the platform directory.
    pub fn config_dir() -> Result<PathBuf> {
        let dir = match std::env::var("MIXER_CHAT_CONFIG_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => dirs::config_dir()
                .context("Could not determine config directory")?
                .join("mixer-chat"),
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Load the configuration file (defaults when absent) and apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_dir()?)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load `config.json` from `dir` without environment overrides.
    ///
    /// A missing file yields the defaults; a malformed one is an error.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            log::debug!("[Config] No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from `lookup` (variable name → value).
    ///
    /// Values that do not parse are ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(base_path) = lookup("MIXER_CHAT_BASE_PATH") {
            self.base_path = base_path;
        }

        if let Some(token) = lookup("MIXER_CHAT_TOKEN") {
            self.token = (!token.is_empty()).then_some(token);
        }

        if let Some(workers) = lookup("MIXER_CHAT_WORKERS") {
            match workers.parse::<usize>() {
                Ok(n) if n > 0 => self.worker_threads = n,
                _ => log::warn!("[Config] Ignoring MIXER_CHAT_WORKERS={:?}", workers),
            }
        }

        if let Some(reconnect) = lookup("MIXER_CHAT_RECONNECT") {
            match parse_bool(&reconnect) {
                Some(enabled) => self.reconnect = enabled,
                None => log::warn!("[Config] Ignoring MIXER_CHAT_RECONNECT={:?}", reconnect),
            }
        }

        if let Some(max) = lookup("MIXER_CHAT_MAX_RECONNECTS") {
            match max.parse::<u32>() {
                Ok(n) => self.max_reconnect_attempts = n,
                Err(_) => log::warn!("[Config] Ignoring MIXER_CHAT_MAX_RECONNECTS={:?}", max),
            }
        }
    }

    /// Persist to `config.json` in [`Self::config_dir`].
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_dir()?)
    }

    /// Persist to `config.json` in `dir`. The file is owner-only on unix
    /// since it may hold the token.
    pub fn save_to(&self, dir: &Path) -> Result<()> {
        let path = dir.join(CONFIG_FILE);
        fs::write(&path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        #[cfg(unix)]
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Reconnect policy derived from this configuration.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            reconnect: self.reconnect,
            max_attempts: self.max_reconnect_attempts,
            ..ReconnectPolicy::default()
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
