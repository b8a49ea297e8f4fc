// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Process configuration, read from `Parcel.toml`.
//!
//! Precedence, lowest first: built-in defaults, the file,
//! [`SOURCE_MODE_ENV`], then whatever the caller applies after
//! [`ParcelConfig::load`] (a command-line flag, for instance).

use anyhow::{bail, Context, Result};
use parcel_agents::LoaderConfig;
use parcel_core::{ContentVersion, SourceMode};
use parcel_io::SourceConfig;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// The configuration file looked up when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "Parcel.toml";

/// Environment variable that overrides `[source].mode`.
pub const SOURCE_MODE_ENV: &str = "PARCEL_SOURCE_MODE";

/// The `[cache]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Where cached payloads and their sidecars live.
    pub directory: PathBuf,
    /// Size quota in bytes.
    pub quota_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("parcel/cache"),
            quota_bytes: 512 * 1024 * 1024,
        }
    }
}

/// Represents the structure of the `Parcel.toml` file.
///
/// Every field has a default, so an absent file or section is valid.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ParcelConfig {
    /// Where content comes from.
    pub source: SourceConfig,
    /// The on-disk cache.
    pub cache: CacheConfig,
    /// Loader tuning.
    pub loader: LoaderConfig,
    /// The patch history file.
    pub history_path: PathBuf,
    /// Version deployed on first start, when the history is still empty.
    pub initial_version: Option<ContentVersion>,
    /// Default `env_logger` filter; `RUST_LOG` takes precedence.
    pub log_filter: String,
}

impl Default for ParcelConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            cache: CacheConfig::default(),
            loader: LoaderConfig::default(),
            history_path: PathBuf::from("parcel/history.json"),
            initial_version: None,
            log_filter: "info".to_string(),
        }
    }
}

impl ParcelConfig {
    /// Loads the configuration at `path` and applies the environment
    /// override on top of it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Reads the configuration at `path` alone. If the file does not exist,
    /// the default configuration is returned.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("No '{}' found. Using default configuration.", path.display());
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file at '{}'", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("Failed to parse TOML from '{}'", path.display()))
    }

    /// Parses a configuration document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Applies [`SOURCE_MODE_ENV`] if it is set.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        let raw = std::env::var(SOURCE_MODE_ENV).ok();
        self.apply_source_mode_override(raw.as_deref())
            .with_context(|| format!("Invalid {SOURCE_MODE_ENV}"))
    }

    /// Replaces the source mode with `raw` when given.
    pub fn apply_source_mode_override(&mut self, raw: Option<&str>) -> Result<()> {
        let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
            return Ok(());
        };
        let Some(mode) = SourceMode::parse(raw) else {
            bail!("source mode '{raw}' is not one of simulated, local-server, remote");
        };
        if mode != self.source.mode {
            log::info!("Source mode overridden to {}", mode);
        }
        self.source.mode = mode;
        Ok(())
    }
}
