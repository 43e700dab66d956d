// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Engagement Configuration Types
//
// Kubernetes-style manifest (apiVersion/kind/metadata/spec) describing:
// - The oracle endpoint and its call bounds
// - Learning thresholds and background task cadence
// - Storage backend selection
// - Network and observability settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::oracle::OracleOptions;
use crate::domain::repository::{PostgresConfig, StorageBackend};

pub const API_VERSION: &str = "kindred/v1";
pub const KIND: &str = "EngagementConfig";
pub const CONFIG_PATH_ENV: &str = "KINDRED_CONFIG_PATH";

/// Top-level engagement configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementConfigManifest {
    /// API version (must be "kindred/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "EngagementConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: EngagementConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngagementConfigSpec {
    #[serde(default)]
    pub oracle: OracleConfig,

    #[serde(default)]
    pub learning: LearningConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// "openai", "openai-compatible" or "ollama"
    #[serde(rename = "type")]
    pub provider_type: String,

    pub endpoint: String,

    /// API key (supports "env:VAR_NAME" for environment variables)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Upper bound on decision calls
    #[serde(default = "default_oracle_timeout_ms")]
    pub decision_timeout_ms: u64,

    /// Upper bound on outcome-scoring and content-summary calls
    #[serde(default = "default_oracle_timeout_ms")]
    pub scoring_timeout_ms: u64,
}

impl OracleConfig {
    pub fn decision_options(&self) -> OracleOptions {
        OracleOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            timeout_ms: self.decision_timeout_ms,
        }
    }

    pub fn scoring_options(&self) -> OracleOptions {
        OracleOptions {
            // scoring wants a stable answer
            temperature: 0.2,
            max_tokens: self.max_tokens,
            timeout_ms: self.scoring_timeout_ms,
        }
    }

    /// Resolve `env:VAR` indirection for the API key
    pub fn resolve_api_key(&self) -> anyhow::Result<Option<String>> {
        match self.api_key.as_deref() {
            None => Ok(None),
            Some(raw) => match raw.strip_prefix("env:") {
                Some(var) => std::env::var(var)
                    .map(Some)
                    .map_err(|_| anyhow::anyhow!("Environment variable '{}' not set for oracle api_key", var)),
                None => Ok(Some(raw.to_string())),
            },
        }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            provider_type: "ollama".to_string(),
            endpoint: "http://localhost:11434".to_string(),
            api_key: None,
            model: "llama3.2:latest".to_string(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            decision_timeout_ms: default_oracle_timeout_ms(),
            scoring_timeout_ms: default_oracle_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Minimum unextracted same-persona records before extraction runs
    #[serde(default = "default_extraction_min_records")]
    pub extraction_min_records: usize,

    /// How many of the most recent records (all personas) are considered
    #[serde(default = "default_extraction_window")]
    pub extraction_window: usize,

    #[serde(default = "default_success_threshold")]
    pub success_threshold: f64,

    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: f64,

    /// Successful samples each sub-extractor needs
    #[serde(default = "default_min_successful_samples")]
    pub min_successful_samples: usize,

    /// Minimum confidence for a pattern to be served to the decision engine
    #[serde(default = "default_pattern_confidence_threshold")]
    pub pattern_confidence_threshold: f64,

    #[serde(default = "default_max_relevant_patterns")]
    pub max_relevant_patterns: usize,

    /// Patterns embedded in a decision prompt
    #[serde(default = "default_decision_pattern_limit")]
    pub decision_pattern_limit: usize,

    /// Records pending longer than this are expired
    #[serde(default = "default_pending_ttl_hours")]
    pub pending_ttl_hours: u64,

    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,

    #[serde(default = "default_task_queue_capacity")]
    pub task_queue_capacity: usize,
}

impl LearningConfig {
    pub fn pending_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.pending_ttl_hours as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            extraction_min_records: default_extraction_min_records(),
            extraction_window: default_extraction_window(),
            success_threshold: default_success_threshold(),
            failure_threshold: default_failure_threshold(),
            min_successful_samples: default_min_successful_samples(),
            pattern_confidence_threshold: default_pattern_confidence_threshold(),
            max_relevant_patterns: default_max_relevant_patterns(),
            decision_pattern_limit: default_decision_pattern_limit(),
            pending_ttl_hours: default_pending_ttl_hours(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
            task_queue_capacity: default_task_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackendKind {
    #[default]
    InMemory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackendKind,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_string: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl StorageConfig {
    pub fn backend(&self) -> anyhow::Result<StorageBackend> {
        match self.backend {
            StorageBackendKind::InMemory => Ok(StorageBackend::InMemory),
            StorageBackendKind::Postgres => {
                let connection_string = self
                    .connection_string
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("spec.storage.connection_string is required for postgres"))?;
                Ok(StorageBackend::PostgreSQL(PostgresConfig {
                    connection_string,
                    max_connections: self.max_connections,
                }))
            }
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::InMemory,
            connection_string: None,
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_api_port(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

// Default value functions
fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    512
}

fn default_oracle_timeout_ms() -> u64 {
    5_000
}

fn default_extraction_min_records() -> usize {
    5
}

fn default_extraction_window() -> usize {
    25
}

fn default_success_threshold() -> f64 {
    0.7
}

fn default_failure_threshold() -> f64 {
    0.4
}

fn default_min_successful_samples() -> usize {
    3
}

fn default_pattern_confidence_threshold() -> f64 {
    0.6
}

fn default_max_relevant_patterns() -> usize {
    5
}

fn default_decision_pattern_limit() -> usize {
    3
}

fn default_pending_ttl_hours() -> u64 {
    24
}

fn default_sweep_interval_seconds() -> u64 {
    3600
}

fn default_task_queue_capacity() -> usize {
    256
}

fn default_max_connections() -> u32 {
    5
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for EngagementConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "kindred".to_string(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: EngagementConfigSpec::default(),
        }
    }
}

impl EngagementConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Candidate configuration paths in precedence order
    pub fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            paths.push(PathBuf::from(path));
        }
        paths.push(PathBuf::from("./kindred-config.yaml"));
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".kindred").join("config.yaml"));
        }
        #[cfg(unix)]
        paths.push(PathBuf::from("/etc/kindred/config.yaml"));
        #[cfg(windows)]
        paths.push(PathBuf::from("C:\\ProgramData\\Kindred\\config.yaml"));
        paths
    }

    /// Discover configuration file using precedence order
    /// 1. KINDRED_CONFIG_PATH environment variable
    /// 2. ./kindred-config.yaml (working directory)
    /// 3. ~/.kindred/config.yaml (user home)
    /// 4. /etc/kindred/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        Self::candidate_paths().into_iter().find(|p| p.exists())
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("KINDRED_ORACLE_ENDPOINT") {
            tracing::info!("Environment override: KINDRED_ORACLE_ENDPOINT");
            self.spec.oracle.endpoint = val;
        }

        if let Ok(val) = std::env::var("KINDRED_ORACLE_MODEL") {
            tracing::info!("Environment override: KINDRED_ORACLE_MODEL={}", val);
            self.spec.oracle.model = val;
        }

        if let Ok(val) = std::env::var("KINDRED_DATABASE_URL") {
            tracing::info!("Environment override: KINDRED_DATABASE_URL");
            self.spec.storage.backend = StorageBackendKind::Postgres;
            self.spec.storage.connection_string = Some(val);
        }

        if let Ok(val) = std::env::var("KINDRED_PORT") {
            match val.parse::<u16>() {
                Ok(port) => {
                    tracing::info!("Environment override: KINDRED_PORT={}", port);
                    self.spec.network.port = port;
                }
                Err(_) => {
                    tracing::warn!("Invalid value for KINDRED_PORT: '{}'. Ignoring.", val);
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!("Invalid apiVersion: '{}'. Must be '{}'", self.api_version, API_VERSION);
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let oracle = &self.spec.oracle;
        if !matches!(oracle.provider_type.as_str(), "openai" | "openai-compatible" | "ollama") {
            anyhow::bail!(
                "Unsupported oracle type: '{}'. Expected openai, openai-compatible or ollama",
                oracle.provider_type
            );
        }
        if oracle.endpoint.is_empty() {
            anyhow::bail!("spec.oracle.endpoint cannot be empty");
        }
        if oracle.model.is_empty() {
            anyhow::bail!("spec.oracle.model cannot be empty");
        }
        if oracle.decision_timeout_ms == 0 || oracle.scoring_timeout_ms == 0 {
            anyhow::bail!("Oracle timeouts must be greater than zero");
        }

        let learning = &self.spec.learning;
        for (name, value) in [
            ("success_threshold", learning.success_threshold),
            ("failure_threshold", learning.failure_threshold),
            ("pattern_confidence_threshold", learning.pattern_confidence_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("spec.learning.{} must be within [0, 1], got {}", name, value);
            }
        }
        if learning.failure_threshold > learning.success_threshold {
            anyhow::bail!("spec.learning.failure_threshold cannot exceed success_threshold");
        }
        if learning.extraction_window < learning.extraction_min_records {
            anyhow::bail!("spec.learning.extraction_window must be >= extraction_min_records");
        }
        if learning.task_queue_capacity == 0 {
            anyhow::bail!("spec.learning.task_queue_capacity must be greater than zero");
        }

        self.spec.storage.backend()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let manifest = EngagementConfigManifest::default();
        assert_eq!(manifest.api_version, "kindred/v1");
        assert_eq!(manifest.kind, "EngagementConfig");
        assert_eq!(manifest.spec.oracle.decision_timeout_ms, 5_000);
        assert_eq!(manifest.spec.learning.extraction_min_records, 5);
        assert_eq!(manifest.spec.learning.extraction_window, 25);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_minimal_yaml_fills_defaults() {
        let yaml = r#"
apiVersion: kindred/v1
kind: EngagementConfig
metadata:
  name: test
spec:
  oracle:
    type: openai
    endpoint: https://api.openai.com/v1
    api_key: env:OPENAI_API_KEY
    model: gpt-4o-mini
  learning:
    pending_ttl_hours: 48
"#;
        let manifest = EngagementConfigManifest::from_yaml_str(yaml).unwrap();
        assert_eq!(manifest.spec.oracle.provider_type, "openai");
        assert_eq!(manifest.spec.oracle.scoring_timeout_ms, 5_000);
        assert_eq!(manifest.spec.learning.pending_ttl_hours, 48);
        assert_eq!(manifest.spec.learning.success_threshold, 0.7);
        assert_eq!(manifest.spec.network.port, 8080);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut manifest = EngagementConfigManifest::default();

        manifest.api_version = "wrong/v1".to_string();
        assert!(manifest.validate().is_err());
        manifest.api_version = API_VERSION.to_string();

        manifest.spec.oracle.provider_type = "carrier-pigeon".to_string();
        assert!(manifest.validate().is_err());
        manifest.spec.oracle.provider_type = "ollama".to_string();

        manifest.spec.learning.success_threshold = 1.5;
        assert!(manifest.validate().is_err());
        manifest.spec.learning.success_threshold = 0.7;

        manifest.spec.storage.backend = StorageBackendKind::Postgres;
        assert!(manifest.validate().is_err());
        manifest.spec.storage.connection_string = Some("postgres://localhost/kindred".to_string());
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kindred-config.yaml");

        let mut manifest = EngagementConfigManifest::default();
        manifest.spec.network.port = 9999;
        manifest.to_yaml_file(&path).unwrap();

        let loaded = EngagementConfigManifest::load_or_default(Some(path)).unwrap();
        assert_eq!(loaded.spec.network.port, 9999);
    }

    #[test]
    fn test_explicit_missing_path_fails() {
        let result = EngagementConfigManifest::load_or_default(Some(PathBuf::from(
            "/definitely/not/here/kindred.yaml",
        )));
        assert!(result.is_err());
    }

    #[test]
    fn test_literal_api_key_resolves() {
        let mut oracle = OracleConfig::default();
        oracle.api_key = Some("sk-test".to_string());
        assert_eq!(oracle.resolve_api_key().unwrap().as_deref(), Some("sk-test"));
    }
}
