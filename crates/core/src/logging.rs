//! # Structured Logging
//!
//! Subscriber setup for applications embedding the container. The container
//! itself only emits `tracing` events under the `beanstalk::*` targets.

use std::io;
use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{ConfigError, ContainerConfig};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "warn")
    pub level: String,
    /// Enable JSON structured logging (vs plain text)
    pub json_format: bool,
    /// Enable pretty printing for development
    pub pretty_print: bool,
    /// Environment filter (supports directives like "beanstalk=debug,tokio=info")
    pub env_filter: Option<String>,
    /// Service name to include in the startup event
    pub service_name: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            pretty_print: true,
            env_filter: None,
            service_name: None,
        }
    }
}

impl LoggingConfig {
    /// Create production logging configuration
    pub fn production() -> Self {
        Self {
            level: "info".to_string(),
            json_format: true,
            pretty_print: false,
            env_filter: Some("beanstalk=info".to_string()),
            service_name: None,
        }
    }

    /// Create development logging configuration
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            json_format: false,
            pretty_print: true,
            env_filter: Some("beanstalk=debug".to_string()),
            service_name: None,
        }
    }

    /// Create test logging configuration (minimal output)
    pub fn test() -> Self {
        Self {
            level: "error".to_string(),
            json_format: false,
            pretty_print: false,
            env_filter: Some("beanstalk=error".to_string()),
            service_name: None,
        }
    }

    /// Derive logging settings from the container configuration
    pub fn from_container_config(config: &ContainerConfig) -> Self {
        let base = if config.environment.is_production() {
            Self::production()
        } else {
            Self::development()
        };
        Self {
            level: config.log_level.clone(),
            env_filter: Some(format!("beanstalk={}", config.log_level)),
            ..base
        }
    }

    /// Set service name
    pub fn with_service(mut self, name: &str) -> Self {
        self.service_name = Some(name.to_string());
        self
    }

    /// Set environment filter
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    fn filter(&self) -> Result<EnvFilter, ConfigError> {
        let directives = self.env_filter.as_deref().unwrap_or(&self.level);
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(directives))
            .map_err(|e| ConfigError::LoggingInit {
                message: e.to_string(),
            })
    }
}

/// Install a global tracing subscriber.
///
/// Fails instead of panicking when a subscriber is already installed.
pub fn init_logging(config: LoggingConfig) -> Result<(), ConfigError> {
    let filter = config.filter()?;

    let result = if config.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stdout).json())
            .try_init()
    } else if config.pretty_print {
        tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stdout).pretty())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stdout))
            .try_init()
    };
    result.map_err(|e| ConfigError::LoggingInit {
        message: e.to_string(),
    })?;

    tracing::info!(
        target: "beanstalk::logging",
        service = config.service_name.as_deref().unwrap_or("beanstalk"),
        level = %config.level,
        format = if config.json_format { "json" } else { "text" },
        "Structured logging initialized"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use serial_test::serial;

    #[test]
    fn test_logging_config_presets() {
        let prod = LoggingConfig::production();
        assert!(prod.json_format);
        assert!(!prod.pretty_print);

        let dev = LoggingConfig::development();
        assert!(dev.pretty_print);
        assert_eq!(dev.level, "debug");

        let test = LoggingConfig::test();
        assert_eq!(test.level, "error");
    }

    #[test]
    fn test_from_container_config() {
        let config = ContainerConfig {
            environment: Environment::Production,
            log_level: "warn".to_string(),
            ..ContainerConfig::default()
        };

        let logging = LoggingConfig::from_container_config(&config).with_service("orders");
        assert!(logging.json_format);
        assert_eq!(logging.env_filter.as_deref(), Some("beanstalk=warn"));
        assert_eq!(logging.service_name.as_deref(), Some("orders"));
    }

    #[test]
    #[serial]
    fn test_second_init_is_an_error() {
        let _ = init_logging(LoggingConfig::test());
        let second = init_logging(LoggingConfig::test());
        assert!(matches!(second, Err(ConfigError::LoggingInit { .. })));
    }
}
