// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration (`isled.toml`)

use isle_core::path as isle_path;
use isle_engine::{MachineConfig, UncachePolicy};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub machine: MachineSection,
    #[serde(default)]
    pub console: ConsoleSection,
    #[serde(default)]
    pub log: LogSection,
    /// `[[mount]]` entries building the boot tree.
    #[serde(default, rename = "mount")]
    pub mounts: Vec<Mount>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MachineSection {
    pub arena_size: usize,
    pub workers: usize,
    pub cache_budget: u64,
    pub walker_interval_ms: u64,
}

impl Default for MachineSection {
    fn default() -> Self {
        Self {
            arena_size: 8 * 1024 * 1024,
            workers: 4,
            cache_budget: 64 * 1024 * 1024,
            walker_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ConsoleSection {
    pub listen: String,
}

impl Default for ConsoleSection {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:9600".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LogSection {
    /// Log file directory; stderr when unset.
    pub dir: Option<PathBuf>,
}

/// One file attached to the boot tree.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Mount {
    /// Machine path, e.g. `/native` or `/sys/hello`.
    pub path: String,
    /// Driver name, e.g. `isle.syncdir`.
    pub driver: String,
    #[serde(default)]
    pub npath: Option<PathBuf>,
    #[serde(default)]
    pub param: Option<String>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;
        if self.machine.arena_size == 0 {
            return Err(ConfigError::Invalid("machine.arena_size must not be 0".into()));
        }
        if self.machine.workers == 0 {
            return Err(ConfigError::Invalid("machine.workers must not be 0".into()));
        }
        for mount in &self.mounts {
            let name = isle_path::basename(&mount.path);
            if !isle_path::validate_name(name) {
                return Err(ConfigError::Invalid(format!(
                    "mount path '{}' has no attachable name",
                    mount.path
                )));
            }
            if mount.driver.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "mount '{}' has an empty driver",
                    mount.path
                )));
            }
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.console
            .listen
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("bad listen address '{}'", self.console.listen)))
    }

    pub fn machine_config(&self) -> MachineConfig {
        MachineConfig {
            arena_size: self.machine.arena_size,
            workers: self.machine.workers,
            uncache: Some(UncachePolicy {
                budget: self.machine.cache_budget,
                period_ms: self.machine.walker_interval_ms,
            }),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
