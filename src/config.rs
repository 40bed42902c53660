use crate::schema::{ComputeContext, RegistryOptions, MAX_COMPUTE_PASSES};
use crate::schema::types::DEFAULT_FIELD_ORDER;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub schemas: SchemasConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Fixpoint pass cap for computed fields
    #[serde(default = "default_max_passes")]
    pub max_passes: usize,
    /// Sort key for fields without an explicit `order`
    #[serde(default = "default_order")]
    pub default_order: i32,
}

fn default_max_passes() -> usize {
    MAX_COMPUTE_PASSES
}

fn default_order() -> i32 {
    DEFAULT_FIELD_ORDER
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_passes: default_max_passes(),
            default_order: default_order(),
        }
    }
}

impl EngineConfig {
    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            max_passes: self.max_passes,
            default_order: self.default_order,
        }
    }
}

/// Market / account values used when the caller supplies none
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContextConfig {
    #[serde(default)]
    pub current_price: Option<f64>,
    #[serde(default)]
    pub high_24h: Option<f64>,
    #[serde(default)]
    pub low_24h: Option<f64>,
    #[serde(default)]
    pub balance: Option<f64>,
}

impl ContextConfig {
    pub fn to_context(&self) -> ComputeContext {
        ComputeContext {
            current_price: self.current_price,
            high_24h: self.high_24h,
            low_24h: self.low_24h,
            balance: self.balance,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchemasConfig {
    /// Directories of extra JSON schemas registered after the built-ins
    #[serde(default)]
    pub dirs: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Daily rolling log file directory; console only when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("engine.max_passes", MAX_COMPUTE_PASSES as i64)?
            .set_default("engine.default_order", DEFAULT_FIELD_ORDER as i64)?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("COPILOT_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (COPILOT_ENGINE__MAX_PASSES, etc.)
            .add_source(
                Environment::with_prefix("COPILOT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.engine.max_passes == 0 {
            errors.push("engine.max_passes must be at least 1".to_string());
        }
        if self.engine.max_passes > 1000 {
            errors.push(format!(
                "engine.max_passes is unreasonably large: {}",
                self.engine.max_passes
            ));
        }

        let prices = [
            ("context.current_price", self.context.current_price),
            ("context.high_24h", self.context.high_24h),
            ("context.low_24h", self.context.low_24h),
        ];
        for (name, value) in prices {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    errors.push(format!("{name} must be a non-negative number, got {v}"));
                }
            }
        }
        if let (Some(high), Some(low)) = (self.context.high_24h, self.context.low_24h) {
            if high < low {
                errors.push("context.high_24h must not be below context.low_24h".to_string());
            }
        }
        if let Some(balance) = self.context.balance {
            if !balance.is_finite() {
                errors.push("context.balance must be finite".to_string());
            }
        }

        if !matches!(
            self.logging.level.to_ascii_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            errors.push(format!("unknown logging.level: {}", self.logging.level));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_from_missing_dir_uses_defaults() {
        let config = AppConfig::load_from("/nonexistent/copilot-config").unwrap();
        assert_eq!(config.engine.max_passes, 10);
        assert_eq!(config.engine.default_order, 99);
        assert_eq!(config.logging.level, "info");
        assert!(config.schemas.dirs.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_override_uses_single_underscore_prefix() {
        // other tests in this module never read context.balance
        std::env::set_var("COPILOT_CONTEXT__BALANCE", "2500");
        let config = AppConfig::load_from("/nonexistent/copilot-config");
        std::env::remove_var("COPILOT_CONTEXT__BALANCE");

        assert_eq!(config.unwrap().context.balance, Some(2500.0));
    }

    #[test]
    fn test_validate_collects_all_problems() {
        let mut config = AppConfig::default();
        config.engine.max_passes = 0;
        config.context.current_price = Some(-1.0);
        config.context.high_24h = Some(90.0);
        config.context.low_24h = Some(100.0);
        config.logging.level = "loud".to_string();

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors[0].contains("max_passes"));
    }

    #[test]
    fn test_context_and_registry_options() {
        let config = AppConfig {
            context: ContextConfig {
                current_price: Some(100.0),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(config.context.to_context(), ComputeContext::with_price(100.0));
        assert_eq!(config.engine.registry_options(), RegistryOptions::default());
    }
}
