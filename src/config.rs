//! TOML configuration for autowebperf.
//!
//! Layered the usual way: an explicit path, else the `AWP_CONFIG` environment
//! variable, else `./awp.toml`, else compiled-in defaults.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Fatal configuration problems, raised before any pipeline work starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no data sources configured")]
    NoDataSources,

    #[error("data source '{0}' is listed more than once")]
    DuplicateDataSource(String),

    #[error("unknown connector '{0}'")]
    UnknownConnector(String),

    #[error("unknown gatherer '{0}'")]
    UnknownGatherer(String),

    #[error("unknown extension '{0}'")]
    UnknownExtension(String),

    #[error("missing environment variable '{name}' required by {component}")]
    MissingEnvVar { name: String, component: String },

    #[error("invalid {component} configuration: {reason}")]
    Invalid { component: String, reason: String },
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AwpConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub connector: ConnectorConfig,
    #[serde(default)]
    pub gatherers: BTreeMap<String, GathererConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AwpConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Try to load configuration from, in order:
    /// 1. The path specified by the `AWP_CONFIG` environment variable.
    /// 2. `./awp.toml`.
    /// 3. Fall back to compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var("AWP_CONFIG") {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "AWP_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local_path = Path::new("awp.toml");
        if local_path.exists() {
            match Self::load(local_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %local_path.display(),
                        error = %e,
                        "local config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// Check the invariants that do not depend on the plug-in registry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.data_sources.is_empty() {
            return Err(ConfigError::NoDataSources);
        }
        let mut seen = BTreeSet::new();
        for ds in &self.engine.data_sources {
            if !seen.insert(ds.as_str()) {
                return Err(ConfigError::DuplicateDataSource(ds.clone()));
            }
        }
        for (name, gatherer) in &self.gatherers {
            if gatherer.timeout_secs == 0 {
                return Err(ConfigError::Invalid {
                    component: format!("gatherer '{}'", name),
                    reason: "timeout_secs must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Settings for the gatherer serving `data_source`, or defaults.
    pub fn gatherer(&self, data_source: &str) -> GathererConfig {
        self.gatherers.get(data_source).cloned().unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Pipeline composition and write batching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Data sources in processing order; each names a registered gatherer.
    pub data_sources: Vec<String>,
    /// Registered connector name.
    pub connector: String,
    /// Registered extension names, invoked in this order.
    pub extensions: Vec<String>,
    /// Results accumulated before each write; 0 writes once at the end.
    pub batch_update_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_sources: vec!["webpagetest".to_string(), "psi".to_string()],
            connector: "sqlite".to_string(),
            extensions: Vec::new(),
            batch_update_buffer: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Storage backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// SQLite database file.
    pub path: PathBuf,
    /// Secrets handed to gatherers (API keys). Seeds the SQLite `env_vars`
    /// table and backs the in-memory connector.
    pub env_vars: BTreeMap<String, String>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/autowebperf.db"),
            env_vars: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Gatherers
// ---------------------------------------------------------------------------

/// Per-gatherer settings, keyed by data source name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GathererConfig {
    /// Override for the service endpoint.
    pub base_url: Option<String>,
    /// HTTP timeout for each request.
    pub timeout_secs: u64,
    /// Env var holding the API key; each gatherer has its own default.
    pub api_key_env: Option<String>,
}

impl Default for GathererConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: 60,
            api_key_env: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = AwpConfig::default();
        assert_eq!(cfg.engine.data_sources, vec!["webpagetest", "psi"]);
        assert_eq!(cfg.engine.connector, "sqlite");
        assert!(cfg.engine.extensions.is_empty());
        assert_eq!(cfg.engine.batch_update_buffer, 10);
        assert_eq!(cfg.connector.path, PathBuf::from("data/autowebperf.db"));
        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.logging.json);
        assert_eq!(cfg.gatherer("psi").timeout_secs, 60);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_parse_example_toml() {
        let toml_str = r#"
[engine]
data_sources = ["psi"]
connector = "memory"
extensions = ["budgets"]
batch_update_buffer = 0

[connector]
path = "/var/lib/awp/awp.db"

[connector.env_vars]
psiApiKey = "secret"

[gatherers.psi]
base_url = "http://localhost:9000/psi"
timeout_secs = 5

[logging]
level = "debug"
json = true
"#;
        let cfg: AwpConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.engine.data_sources, vec!["psi"]);
        assert_eq!(cfg.engine.connector, "memory");
        assert_eq!(cfg.engine.extensions, vec!["budgets"]);
        assert_eq!(cfg.engine.batch_update_buffer, 0);
        assert_eq!(cfg.connector.path, PathBuf::from("/var/lib/awp/awp.db"));
        assert_eq!(cfg.connector.env_vars["psiApiKey"], "secret");
        let psi = cfg.gatherer("psi");
        assert_eq!(psi.base_url.as_deref(), Some("http://localhost:9000/psi"));
        assert_eq!(psi.timeout_secs, 5);
        assert!(psi.api_key_env.is_none());
        assert_eq!(cfg.logging.level, "debug");
        assert!(cfg.logging.json);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let cfg: AwpConfig = toml::from_str("[engine]\nconnector = \"memory\"\n").unwrap();
        assert_eq!(cfg.engine.connector, "memory");
        assert_eq!(cfg.engine.data_sources, vec!["webpagetest", "psi"]);
        assert_eq!(cfg.engine.batch_update_buffer, 10);
    }

    #[test]
    fn test_validate_rejects_bad_data_sources() {
        let mut cfg = AwpConfig::default();
        cfg.engine.data_sources.clear();
        assert!(matches!(cfg.validate(), Err(ConfigError::NoDataSources)));

        cfg.engine.data_sources = vec!["psi".to_string(), "psi".to_string()];
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::DuplicateDataSource(ref ds)) if ds == "psi"
        ));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut cfg = AwpConfig::default();
        cfg.gatherers.insert(
            "psi".to_string(),
            GathererConfig {
                timeout_secs: 0,
                ..GathererConfig::default()
            },
        );
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_load_reports_missing_file() {
        let err = AwpConfig::load(Path::new("/nonexistent/awp.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }
}
