//! Engine configuration.
//!
//! Runtime knobs for the orchestration engine: the environment default
//! provider consulted by resolution, storage and trace locations, and AI
//! call tuning. Values come from defaults, environment variables, or the
//! builder methods.

use crate::error::ConfigError;
use crate::resolver::Provider;
use std::path::PathBuf;

/// Configuration for the orchestration engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    // Resolution settings
    /// Provider used when neither the payload nor the user names one.
    pub default_provider: Provider,

    // Storage settings
    /// PostgreSQL connection URL; the in-memory store is used when absent.
    pub database_url: Option<String>,

    // Trace settings
    /// Directory JSONL trace files are written under.
    pub trace_dir: PathBuf,

    // AI call settings
    /// Sampling temperature for pipeline AI calls.
    pub temperature: f64,
    /// Token budget for generated artifacts.
    pub max_tokens: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_provider: Provider::OpenAi,
            database_url: None,
            trace_dir: PathBuf::from("./traces"),
            temperature: 0.2,
            max_tokens: 4000,
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `TASKFORGE_DEFAULT_PROVIDER`: environment default provider (default: openai)
    /// - `DATABASE_URL`: PostgreSQL connection URL (optional)
    /// - `TASKFORGE_TRACE_DIR`: trace file directory (default: ./traces)
    /// - `TASKFORGE_TEMPERATURE`: AI sampling temperature (default: 0.2)
    /// - `TASKFORGE_MAX_TOKENS`: AI generation token budget (default: 4000)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("TASKFORGE_DEFAULT_PROVIDER") {
            config.default_provider =
                val.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "TASKFORGE_DEFAULT_PROVIDER".to_string(),
                    message: format!("unknown provider '{val}'"),
                })?;
        }

        if let Ok(val) = std::env::var("DATABASE_URL") {
            config.database_url = Some(val);
        }

        if let Ok(val) = std::env::var("TASKFORGE_TRACE_DIR") {
            config.trace_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("TASKFORGE_TEMPERATURE") {
            config.temperature = parse_env_value(&val, "TASKFORGE_TEMPERATURE")?;
        }

        if let Ok(val) = std::env::var("TASKFORGE_MAX_TOKENS") {
            config.max_tokens = parse_env_value(&val, "TASKFORGE_MAX_TOKENS")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidValue {
                key: "TASKFORGE_TEMPERATURE".to_string(),
                message: "temperature must be between 0.0 and 2.0".to_string(),
            });
        }

        if self.max_tokens == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TASKFORGE_MAX_TOKENS".to_string(),
                message: "max_tokens must be greater than 0".to_string(),
            });
        }

        if let Some(url) = &self.database_url {
            if url.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "DATABASE_URL".to_string(),
                    message: "database URL cannot be empty".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Builder method to set the environment default provider.
    pub fn with_default_provider(mut self, provider: Provider) -> Self {
        self.default_provider = provider;
        self
    }

    /// Builder method to set the database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// Builder method to set the trace directory.
    pub fn with_trace_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.trace_dir = dir.into();
        self
    }

    /// Builder method to set the AI temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Builder method to set the AI token budget.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{value}'"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();

        assert_eq!(config.default_provider, Provider::OpenAi);
        assert!(config.database_url.is_none());
        assert_eq!(config.trace_dir, PathBuf::from("./traces"));
        assert!((config.temperature - 0.2).abs() < f64::EPSILON);
        assert_eq!(config.max_tokens, 4000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::new()
            .with_default_provider(Provider::Anthropic)
            .with_database_url("postgres://test/taskforge")
            .with_trace_dir("/tmp/traces")
            .with_temperature(0.7)
            .with_max_tokens(2000);

        assert_eq!(config.default_provider, Provider::Anthropic);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://test/taskforge")
        );
        assert_eq!(config.trace_dir, PathBuf::from("/tmp/traces"));
        assert!((config.temperature - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.max_tokens, 2000);
    }

    #[test]
    fn test_validation_invalid_temperature() {
        let config = EngineConfig::new().with_temperature(3.0);
        let result = config.validate();

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("temperature"));
    }

    #[test]
    fn test_validation_zero_max_tokens() {
        let config = EngineConfig::new().with_max_tokens(0);
        let result = config.validate();

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("max_tokens"));
    }

    #[test]
    fn test_validation_empty_database_url() {
        let config = EngineConfig::new().with_database_url("");
        let result = config.validate();

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn test_parse_env_value() {
        let parsed: u32 = parse_env_value("4000", "TEST").unwrap();
        assert_eq!(parsed, 4000);

        let result: Result<u32, _> = parse_env_value("not a number", "TEST");
        assert!(result.is_err());
    }
}
