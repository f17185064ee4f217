// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Engine configuration.
//!
//! Supports both programmatic and file-based configuration.
//!
//! ```toml
//! ale_id = "dock-door-3"
//! include_spec_in_reports = false
//!
//! [tags]
//! max_count = 10000
//! lifetime_ms = 60000
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Middleware identifier stamped into every report.
    #[serde(default = "default_ale_id")]
    pub ale_id: String,

    /// Report envelope schema version.
    #[serde(default = "default_schema_version")]
    pub schema_version: String,

    /// Embed the cycle specification in reports unless the cycle overrides it.
    #[serde(default)]
    pub include_spec_in_reports: bool,

    /// Tag snapshot eviction policy.
    #[serde(default)]
    pub tags: TagsConfig,

    /// Thread name prefix for report workers.
    #[serde(default = "default_worker_name_prefix")]
    pub worker_name_prefix: String,
}

fn default_ale_id() -> String {
    "ale-cc".to_string()
}

fn default_schema_version() -> String {
    "1.1".to_string()
}

fn default_worker_name_prefix() -> String {
    "ale-cc-reports".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ale_id: default_ale_id(),
            schema_version: default_schema_version(),
            include_spec_in_reports: false,
            tags: TagsConfig::default(),
            worker_name_prefix: default_worker_name_prefix(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ale_id.trim().is_empty() {
            return Err(ConfigError::Invalid("ale_id must not be empty".into()));
        }
        if self.schema_version.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "schema_version must not be empty".into(),
            ));
        }
        if self.tags.max_count == Some(0) {
            return Err(ConfigError::Invalid(
                "tags.max_count must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Eviction policy of the tag snapshot container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagsConfig {
    /// Keep at most this many tags, evicting the oldest first.
    #[serde(default)]
    pub max_count: Option<usize>,

    /// Evict tags first seen longer ago than this (milliseconds).
    #[serde(default)]
    pub lifetime_ms: Option<u64>,
}

impl TagsConfig {
    /// Lifetime as a duration.
    pub fn lifetime(&self) -> Option<Duration> {
        self.lifetime_ms.map(Duration::from_millis)
    }
}
