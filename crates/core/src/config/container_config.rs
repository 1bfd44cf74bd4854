use crate::config::{ConfigError, ConfigValidator, LogLevelValidator, RangeValidator};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;

/// Prefix shared by every environment variable the container reads
pub const ENV_PREFIX: &str = "BEANSTALK_";

/// Priority given to observers that do not declare one
pub const DEFAULT_OBSERVER_PRIORITY: i32 = 2500;

/// Environment enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Testing,
    Production,
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "testing" | "test" => Ok(Environment::Testing),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(ConfigError::invalid_value(
                "environment",
                s,
                "development, testing, or production",
            )),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let env_str = match self {
            Environment::Development => "development",
            Environment::Testing => "testing",
            Environment::Production => "production",
        };
        write!(f, "{}", env_str)
    }
}

impl Environment {
    /// Check if environment is production
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Container runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    pub environment: Environment,
    /// Worker threads of the runtime owned by the container for async observers.
    /// Unused when the container is built inside a running tokio runtime.
    pub async_workers: usize,
    pub default_observer_priority: i32,
    /// Create every singleton during `build()` instead of on first use
    pub eager_singletons: bool,
    pub log_level: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            async_workers: 4,
            default_observer_priority: DEFAULT_OBSERVER_PRIORITY,
            eager_singletons: false,
            log_level: "info".to_string(),
        }
    }
}

impl ContainerConfig {
    /// Configuration used by tests: small worker pool, quiet logging
    pub fn testing() -> Self {
        Self {
            environment: Environment::Testing,
            async_workers: 2,
            log_level: "warn".to_string(),
            ..Self::default()
        }
    }

    /// Load configuration from `BEANSTALK_*` environment variables,
    /// falling back to defaults for anything unset
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(environment) = read_env("ENV")? {
            config.environment = environment;
        }
        if let Some(workers) = read_env("ASYNC_WORKERS")? {
            config.async_workers = workers;
        }
        if let Some(priority) = read_env("OBSERVER_PRIORITY")? {
            config.default_observer_priority = priority;
        }
        if let Some(eager) = read_env("EAGER_SINGLETONS")? {
            config.eager_singletons = eager;
        }
        if let Some(level) = read_env::<String>("LOG_LEVEL")? {
            config.log_level = level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        RangeValidator::new(1usize, 512usize).validate("async_workers", &self.async_workers)?;
        LogLevelValidator.validate("log_level", &self.log_level)?;
        Ok(())
    }
}

fn read_env<T>(suffix: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let key = format!("{}{}", ENV_PREFIX, suffix);
    match env::var(&key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::invalid_value(key, raw, e.to_string())),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::environment_error(format!(
            "{} is not valid unicode",
            key
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn clear_env() {
        let suffixes = [
            "ENV",
            "ASYNC_WORKERS",
            "OBSERVER_PRIORITY",
            "EAGER_SINGLETONS",
            "LOG_LEVEL",
        ];
        for suffix in suffixes {
            env::remove_var(format!("{}{}", ENV_PREFIX, suffix));
        }
    }

    #[test]
    fn test_environment_from_str() {
        assert_eq!("prod".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!("Testing".parse::<Environment>().unwrap(), Environment::Testing);
        assert!("staging".parse::<Environment>().is_err());
        assert_eq!(Environment::Development.to_string(), "development");
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = ContainerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_observer_priority, DEFAULT_OBSERVER_PRIORITY);
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        env::set_var("BEANSTALK_ENV", "production");
        env::set_var("BEANSTALK_ASYNC_WORKERS", "8");
        env::set_var("BEANSTALK_EAGER_SINGLETONS", "true");

        let config = ContainerConfig::from_env().unwrap();
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.async_workers, 8);
        assert!(config.eager_singletons);
        assert_eq!(config.log_level, "info");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_bad_numbers() {
        clear_env();
        env::set_var("BEANSTALK_ASYNC_WORKERS", "many");

        let result = ContainerConfig::from_env();
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));

        clear_env();
    }

    #[test]
    fn test_from_yaml_partial_document() {
        let config = ContainerConfig::from_yaml_str(
            "environment: testing\ndefault_observer_priority: 100\n",
        )
        .unwrap();

        assert_eq!(config.environment, Environment::Testing);
        assert_eq!(config.default_observer_priority, 100);
        assert_eq!(config.async_workers, 4);
    }

    #[test]
    fn test_from_yaml_rejects_zero_workers() {
        let result = ContainerConfig::from_yaml_str("async_workers: 0\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "log_level: debug").unwrap();

        let config = ContainerConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.log_level, "debug");
    }
}
