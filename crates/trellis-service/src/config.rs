use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use trellis_core::engine::EngineConfig;
use trellis_core::schema::SchemaLimits;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfigValues,
    pub schema_limits: SchemaLimitsConfig,
    pub schema: SchemaConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfigValues {
    pub max_depth: usize,
    pub max_concurrent_branches: usize,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchemaLimitsConfig {
    pub max_types: usize,
    pub max_relations_per_type: usize,
    pub max_permits_per_type: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Schema loaded at startup; the service starts with no types if unset.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl Default for EngineConfigValues {
    fn default() -> Self {
        let defaults = EngineConfig::default();
        Self {
            max_depth: defaults.max_depth,
            max_concurrent_branches: defaults.max_concurrent_branches,
            timeout_ms: None,
        }
    }
}

impl Default for SchemaLimitsConfig {
    fn default() -> Self {
        let defaults = SchemaLimits::default();
        Self {
            max_types: defaults.max_types,
            max_relations_per_type: defaults.max_relations_per_type,
            max_permits_per_type: defaults.max_permits_per_type,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Reads `config_path` (or starts from defaults), applies `TRELLIS_*`
    /// environment overrides and validates the result.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_path {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e.to_string()))?;
            toml::from_str::<AppConfig>(&contents)
                .map_err(|e| ConfigError::ParseToml(e.to_string()))?
        } else {
            AppConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TRELLIS_ENGINE_MAX_DEPTH")
            && let Ok(n) = v.parse()
        {
            self.engine.max_depth = n;
        }
        if let Ok(v) = std::env::var("TRELLIS_ENGINE_MAX_CONCURRENT_BRANCHES")
            && let Ok(n) = v.parse()
        {
            self.engine.max_concurrent_branches = n;
        }
        if let Ok(v) = std::env::var("TRELLIS_ENGINE_TIMEOUT_MS")
            && let Ok(n) = v.parse()
        {
            self.engine.timeout_ms = Some(n);
        }
        if let Ok(v) = std::env::var("TRELLIS_SCHEMA_PATH") {
            self.schema.path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("TRELLIS_LOG_LEVEL") {
            self.log.level = v;
        }
        if let Ok(v) = std::env::var("TRELLIS_LOG_FORMAT") {
            match v.as_str() {
                "json" => self.log.format = LogFormat::Json,
                "pretty" => self.log.format = LogFormat::Pretty,
                _ => {}
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.max_depth == 0 {
            return Err(ConfigError::Validation(
                "engine.max_depth must be non-zero".to_string(),
            ));
        }
        if self.engine.max_concurrent_branches == 0 {
            return Err(ConfigError::Validation(
                "engine.max_concurrent_branches must be non-zero".to_string(),
            ));
        }
        if self.engine.timeout_ms == Some(0) {
            return Err(ConfigError::Validation(
                "engine.timeout_ms must be non-zero when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_depth: self.engine.max_depth,
            max_concurrent_branches: self.engine.max_concurrent_branches,
            timeout: self.engine.timeout_ms.map(Duration::from_millis),
        }
    }

    pub fn to_schema_limits(&self) -> SchemaLimits {
        SchemaLimits {
            max_types: self.schema_limits.max_types,
            max_relations_per_type: self.schema_limits.max_relations_per_type,
            max_permits_per_type: self.schema_limits.max_permits_per_type,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{0}': {1}")]
    ReadFile(String, String),

    #[error("failed to parse TOML config: {0}")]
    ParseToml(String),

    #[error("config validation failed: {0}")]
    Validation(String),
}
