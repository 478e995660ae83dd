use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub state: StateConfig,
    pub recipes: RecipeConfig,
    pub scanner: ScannerSettings,
    pub router: RouterSettings,
    pub breaker: BreakerSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StateConfig {
    /// Name of the per-project state directory
    pub dir_name: String,
    /// Rotating backups retained per project
    pub backup_limit: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RecipeConfig {
    /// Cache freshness window for remote indexes
    pub cache_ttl_hours: u64,
    /// Default recipe repository in owner/name form
    pub repo: String,
    /// Default branch
    pub branch: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScannerSettings {
    /// Worker pool size; 0 means one per logical CPU
    pub worker_count: usize,
    /// Documentation scan budget in seconds
    pub doc_timeout_s: u64,
    /// Git history observation window in days
    pub git_window_days: i64,
    /// Upper cap on commits examined
    pub git_max_commits: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RouterSettings {
    /// Total routing budget per call in seconds
    pub default_timeout_s: u64,
    /// Wind-down grace after cancellation in seconds
    pub cancel_grace_s: u64,
    /// Progress heartbeat spacing in seconds
    pub heartbeat_interval_s: u64,
    /// Retries for a recoverably failed phase
    pub max_phase_retries: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BreakerSettings {
    /// Consecutive failures before a breaker opens
    pub failure_threshold: u32,
    /// Open-state cooldown in seconds
    pub cooldown_s: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (pretty, json, compact)
    pub format: LogFormat,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

impl Config {
    /// Load configuration from the built-in defaults, an optional config
    /// file, and `CDE_`-prefixed environment overrides
    pub fn from_env() -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        builder = builder.add_source(File::from_str(
            include_str!("../config/default.toml"),
            FileFormat::Toml,
        ));

        if let Ok(config_file) = env::var("CONFIG_FILE") {
            builder = builder.add_source(
                File::with_name(&config_file)
                    .required(false)
                    .format(FileFormat::Toml),
            );
        }

        builder = builder.add_source(
            Environment::with_prefix("CDE")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;
        let mut result: Config = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Self::apply_standard_env_vars(&mut result);
        Ok(result)
    }

    /// Load configuration from a specific file path
    pub fn from_file(path: &str) -> Result<Self> {
        let builder = ConfigBuilder::builder()
            .add_source(File::from_str(
                include_str!("../config/default.toml"),
                FileFormat::Toml,
            ))
            .add_source(File::with_name(path).format(FileFormat::Toml))
            .add_source(
                Environment::with_prefix("CDE")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder
            .build()
            .context("Failed to build configuration from file")?;
        config
            .try_deserialize()
            .context("Failed to deserialize configuration from file")
    }

    /// Apply plain environment variables (LOG_LEVEL) for compatibility
    /// with common deployment patterns
    fn apply_standard_env_vars(config: &mut Config) {
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            config.logging.level = log_level;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(anyhow::anyhow!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                ));
            }
        }

        if self.state.dir_name.trim().is_empty() || self.state.dir_name.contains('/') {
            return Err(anyhow::anyhow!(
                "state.dir_name must be a plain directory name, got '{}'",
                self.state.dir_name
            ));
        }
        if self.state.backup_limit == 0 {
            return Err(anyhow::anyhow!("state.backup_limit must be at least 1"));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(anyhow::anyhow!(
                "breaker.failure_threshold must be at least 1"
            ));
        }
        if self.router.default_timeout_s == 0 {
            return Err(anyhow::anyhow!("router.default_timeout_s cannot be 0"));
        }
        Ok(())
    }

    /// Scanner settings in the scanner crate's shape
    pub fn scanner_config(&self) -> scanner::ScannerConfig {
        let mut config = scanner::ScannerConfig::default();
        if self.scanner.worker_count > 0 {
            config.worker_count = self.scanner.worker_count;
        }
        config.doc_timeout = Duration::from_secs(self.scanner.doc_timeout_s);
        config.git_max_commits = self.scanner.git_max_commits;
        config
    }

    /// Router settings in the router crate's shape
    pub fn router_config(&self) -> router::RouterConfig {
        router::RouterConfig {
            default_timeout: Duration::from_secs(self.router.default_timeout_s),
            cancel_grace: Duration::from_secs(self.router.cancel_grace_s),
            heartbeat_interval: Duration::from_secs(self.router.heartbeat_interval_s),
        }
    }

    pub fn recipe_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.recipes.cache_ttl_hours * 3600)
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.breaker.cooldown_s)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state: StateConfig {
                dir_name: ".cde".to_string(),
                backup_limit: 10,
            },
            recipes: RecipeConfig {
                cache_ttl_hours: 24,
                repo: "iberi22/agents-flows-recipes".to_string(),
                branch: "main".to_string(),
            },
            scanner: ScannerSettings {
                worker_count: 0,
                doc_timeout_s: 30,
                git_window_days: 90,
                git_max_commits: 1000,
            },
            router: RouterSettings {
                default_timeout_s: 1800,
                cancel_grace_s: 5,
                heartbeat_interval_s: 5,
                max_phase_retries: 1,
            },
            breaker: BreakerSettings {
                failure_threshold: 3,
                cooldown_s: 60,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Pretty,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.state.dir_name, ".cde");
        assert_eq!(config.state.backup_limit, 10);
        assert_eq!(config.recipes.cache_ttl_hours, 24);
        assert_eq!(config.router.default_timeout_s, 1800);
        assert_eq!(config.breaker.failure_threshold, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.state.dir_name = "nested/dir".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.state.backup_limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bundled_defaults_parse() {
        let config = Config::from_env().unwrap();
        assert_eq!(config.state.dir_name, ".cde");
        assert_eq!(config.scanner.doc_timeout_s, 30);
    }

    #[test]
    fn test_scanner_config_conversion() {
        let mut config = Config::default();
        config.scanner.worker_count = 2;
        config.scanner.doc_timeout_s = 7;
        let scanner = config.scanner_config();
        assert_eq!(scanner.worker_count, 2);
        assert_eq!(scanner.doc_timeout, Duration::from_secs(7));
    }
}
