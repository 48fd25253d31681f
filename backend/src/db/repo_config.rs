//! Repository configuration file support.
//!
//! This module provides utilities for reading repository and summarizer
//! settings from TOML configuration files.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::factory::RepositoryType;
use super::repository::RepositoryError;
use crate::services::summarizer::SummarizerConfig;

/// Repository configuration from file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub repository: RepositorySettings,
    #[serde(default)]
    pub summary: SummarySettings,
}

/// Repository type settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositorySettings {
    #[serde(rename = "type")]
    pub repo_type: String,
}

/// Summary computation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarySettings {
    #[serde(default = "default_data_batch_size")]
    pub data_batch_size: usize,
    #[serde(default = "default_realtime_latency_hours")]
    pub realtime_latency_hours: i64,
    #[serde(default = "default_sweep_concurrency")]
    pub sweep_concurrency: usize,
}

impl Default for SummarySettings {
    fn default() -> Self {
        Self {
            data_batch_size: default_data_batch_size(),
            realtime_latency_hours: default_realtime_latency_hours(),
            sweep_concurrency: default_sweep_concurrency(),
        }
    }
}

fn default_data_batch_size() -> usize {
    SummarizerConfig::default().data_batch_size
}

fn default_realtime_latency_hours() -> i64 {
    SummarizerConfig::default().realtime_latency_hours
}

fn default_sweep_concurrency() -> usize {
    SummarizerConfig::default().sweep_concurrency
}

impl RepositoryConfig {
    /// Load repository configuration from a TOML file.
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    /// * `Ok(RepositoryConfig)` if successful
    /// * `Err(RepositoryError)` if file cannot be read or parsed
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            RepositoryError::configuration(format!("Failed to read config file: {}", e))
        })?;

        Self::from_toml_str(&content)
    }

    /// Parse repository configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, RepositoryError> {
        let config: RepositoryConfig = toml::from_str(content).map_err(|e| {
            RepositoryError::configuration(format!("Failed to parse config file: {}", e))
        })?;
        config.summarizer_config()?;
        Ok(config)
    }

    /// Load repository configuration from the default location.
    ///
    /// Searches for `repository.toml` in:
    /// 1. Current directory
    /// 2. `backend/` directory
    /// 3. Parent directory
    ///
    /// # Returns
    /// * `Ok(RepositoryConfig)` if found and parsed successfully
    /// * `Err(RepositoryError)` if no config file found or parse error
    pub fn from_default_location() -> Result<Self, RepositoryError> {
        let search_paths = [
            PathBuf::from("repository.toml"),
            PathBuf::from("backend/repository.toml"),
            PathBuf::from("../repository.toml"),
        ];

        for path in search_paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Err(RepositoryError::configuration(
            "No repository.toml found in standard locations",
        ))
    }

    /// Get the repository type from configuration.
    pub fn repository_type(&self) -> Result<RepositoryType, String> {
        RepositoryType::from_str(&self.repository.repo_type)
    }

    /// Summarizer settings described by the `[summary]` table.
    ///
    /// # Returns
    /// * `Err(RepositoryError)` if a setting is out of range
    pub fn summarizer_config(&self) -> Result<SummarizerConfig, RepositoryError> {
        let config = SummarizerConfig {
            data_batch_size: self.summary.data_batch_size,
            realtime_latency_hours: self.summary.realtime_latency_hours,
            sweep_concurrency: self.summary.sweep_concurrency,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Load the configuration file at `path`, or the default location if none
/// is given, and apply `SUMMARY_*` environment overrides.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<(RepositoryConfig, SummarizerConfig)> {
    let config = match path {
        Some(path) => RepositoryConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => RepositoryConfig::from_default_location()
            .context("loading repository.toml from the default locations")?,
    };
    let summarizer = config
        .summarizer_config()?
        .with_env_overrides()
        .context("applying SUMMARY_* environment overrides")?;
    Ok((config, summarizer))
}
