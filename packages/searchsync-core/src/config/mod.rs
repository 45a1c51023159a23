//! Engine configuration (YAML + environment)
//!
//! ```yaml
//! version: 1
//! entities:
//!   - entityType: launch
//!     indexName: launches
//!     hasMany:
//!       - { property: releases, foreignKey: launchId, targetEntityType: release }
//! writer:
//!   removalMode: tombstone
//! opensearch:
//!   endpoint: https://search.example.com
//! ```
//!
//! Every section except `version` and `entities` is optional. Environment
//! overrides: `SEARCHSYNC_ENDPOINT`, `SEARCHSYNC_AUTH_TOKEN`.

pub mod error;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::{EntityConfig, RelationshipCatalog};

pub use error::{ConfigError, ConfigResult};

pub const SUPPORTED_VERSIONS: &[u32] = &[1];

pub const ENV_ENDPOINT: &str = "SEARCHSYNC_ENDPOINT";
pub const ENV_AUTH_TOKEN: &str = "SEARCHSYNC_AUTH_TOKEN";

/// OpenSearch's default `index.max_result_window`: `from + size` of a
/// search page may not exceed it
pub const MAX_RESULT_WINDOW: usize = 10_000;

/// Upper bound on `search.pageSize`
pub const MAX_PAGE_SIZE: usize = MAX_RESULT_WINDOW;

/// Top-level configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EngineConfig {
    pub version: u32,
    pub entities: Vec<EntityConfig>,
    #[serde(default)]
    pub record: RecordConfig,
    #[serde(default)]
    pub writer: WriterConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opensearch: Option<OpenSearchConfig>,
}

/// Where identity lives in change record images
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RecordConfig {
    pub id_attribute: String,
    pub entity_type_attribute: String,
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            id_attribute: "id".to_string(),
            entity_type_attribute: "entityType".to_string(),
        }
    }
}

/// How a Remove is applied to the entity's own document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovalMode {
    /// Keep a stub holding the Remove's marker so older Upserts stay rejected
    #[default]
    Tombstone,
    /// Hard-delete the document
    Delete,
}

/// Write fan-out and per-call limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct WriterConfig {
    pub removal_mode: RemovalMode,
    /// Records of one batch processed concurrently
    pub record_concurrency: usize,
    /// Cascade writes of one record applied concurrently
    pub task_concurrency: usize,
    pub request_timeout_ms: u64,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            removal_mode: RemovalMode::default(),
            record_concurrency: 4,
            task_concurrency: (num_cpus::get() * 3 / 4).max(1), // 75% of cores
            request_timeout_ms: 10_000,
        }
    }
}

impl WriterConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Fan-out search paging
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct SearchConfig {
    pub page_size: usize,
    /// Hard cap on documents one fan-out may touch; exceeding it fails the task
    pub max_fanout: usize,
    /// Appended to foreign-key fields in term queries (e.g. ".keyword")
    pub keyword_suffix: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_fanout: 9_900,
            keyword_suffix: String::new(),
        }
    }
}

/// OpenSearch connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OpenSearchConfig {
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

impl OpenSearchConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            auth_token: None,
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }

    /// Endpoint with a scheme and without a trailing slash
    pub fn base_url(&self) -> String {
        let endpoint = self.endpoint.trim_end_matches('/');
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("https://{}", endpoint)
        }
    }
}

impl EngineConfig {
    /// Configuration with defaults for everything but the catalog
    pub fn new(entities: Vec<EntityConfig>) -> Self {
        Self {
            version: 1,
            entities,
            record: RecordConfig::default(),
            writer: WriterConfig::default(),
            search: SearchConfig::default(),
            opensearch: None,
        }
    }

    /// Load from a YAML file, apply environment overrides and validate
    pub fn from_yaml(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml_str(&content)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse YAML without touching the environment or validating
    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Override settings from the environment (`lookup` is `std::env::var` in production)
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(endpoint) = lookup(ENV_ENDPOINT).filter(|v| !v.is_empty()) {
            match self.opensearch.as_mut() {
                Some(opensearch) => opensearch.endpoint = endpoint,
                None => self.opensearch = Some(OpenSearchConfig::new(endpoint)),
            }
        }
        if let Some(token) = lookup(ENV_AUTH_TOKEN).filter(|v| !v.is_empty()) {
            if let Some(opensearch) = self.opensearch.as_mut() {
                opensearch.auth_token = Some(token);
            }
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if !SUPPORTED_VERSIONS.contains(&self.version) {
            return Err(ConfigError::UnsupportedVersion {
                found: self.version,
                supported: SUPPORTED_VERSIONS.to_vec(),
            });
        }
        if self.record.id_attribute.is_empty() {
            return Err(ConfigError::Missing("record.idAttribute".to_string()));
        }
        if self.record.entity_type_attribute.is_empty() {
            return Err(ConfigError::Missing("record.entityTypeAttribute".to_string()));
        }
        if self.writer.record_concurrency == 0 {
            return Err(ConfigError::range(
                "writer.recordConcurrency",
                0,
                "At least one record must be processed at a time",
            ));
        }
        if self.writer.task_concurrency == 0 {
            return Err(ConfigError::range(
                "writer.taskConcurrency",
                0,
                "At least one write must be in flight",
            ));
        }
        if self.writer.request_timeout_ms == 0 {
            return Err(ConfigError::range(
                "writer.requestTimeoutMs",
                0,
                "A per-call timeout is required",
            ));
        }
        if self.search.page_size == 0 || self.search.page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::range(
                "search.pageSize",
                self.search.page_size,
                format!("Page size must be within 1..={}", MAX_PAGE_SIZE),
            ));
        }
        if self.search.max_fanout < self.search.page_size {
            return Err(ConfigError::range(
                "search.maxFanout",
                self.search.max_fanout,
                "Max fan-out must be at least one page",
            ));
        }
        // Paging up to max_fanout reads at most one page past it
        if self.search.max_fanout + self.search.page_size > MAX_RESULT_WINDOW {
            return Err(ConfigError::range(
                "search.maxFanout",
                self.search.max_fanout,
                format!(
                    "Max fan-out plus page size must stay within the {} hit result window",
                    MAX_RESULT_WINDOW
                ),
            ));
        }
        if let Some(opensearch) = &self.opensearch {
            if opensearch.endpoint.trim().is_empty() {
                return Err(ConfigError::Missing("opensearch.endpoint".to_string()));
            }
        }
        self.catalog().map(|_| ())
    }

    /// Build the relationship catalog declared by `entities`
    pub fn catalog(&self) -> ConfigResult<RelationshipCatalog> {
        RelationshipCatalog::new(self.entities.clone()).map_err(|e| ConfigError::Catalog(e.message))
    }
}
