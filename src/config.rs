//! Runtime configuration loaded from an optional YAML file

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::multiwatch::DEFAULT_WATCH_INTERVAL_SECS;
use crate::core::scrollback::DEFAULT_SCROLLBACK_LINES;
use crate::history::DEFAULT_HISTORY_CAPACITY;

/// Tunables for the engine. Every field has a default, so a missing or
/// partial config file is fine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Retained scrollback lines per tab
    #[serde(default = "default_scrollback_lines")]
    pub scrollback_lines: usize,
    /// In-memory command history entries
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Seconds between multiwatch command re-runs
    #[serde(default = "default_watch_interval_secs")]
    pub watch_interval_secs: u64,
    /// Upper bound on one poll pass, milliseconds
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u16,
    /// Sleep between control-loop iterations when nothing is pollable
    #[serde(default = "default_idle_sleep_ms")]
    pub idle_sleep_ms: u64,
    /// History file location; defaults to ~/.tabsh_history
    #[serde(default)]
    pub history_file: Option<PathBuf>,
}

fn default_scrollback_lines() -> usize {
    DEFAULT_SCROLLBACK_LINES
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

fn default_watch_interval_secs() -> u64 {
    DEFAULT_WATCH_INTERVAL_SECS
}

fn default_poll_timeout_ms() -> u16 {
    10
}

fn default_idle_sleep_ms() -> u64 {
    50
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scrollback_lines: default_scrollback_lines(),
            history_capacity: default_history_capacity(),
            watch_interval_secs: default_watch_interval_secs(),
            poll_timeout_ms: default_poll_timeout_ms(),
            idle_sleep_ms: default_idle_sleep_ms(),
            history_file: None,
        }
    }
}

impl Config {
    /// Default config file location: ~/.tabsh/config.yml
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".tabsh").join("config.yml"))
    }

    /// Load from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    /// Load the default config file if one exists, otherwise the defaults.
    /// A present-but-broken file is an error rather than a silent fallback.
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }
}
