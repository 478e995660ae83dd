use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::{Config, LogFormat, LoggingConfig};

/// Initialize the tracing subscriber for logging and telemetry.
///
/// Events go to stderr so the stdio tool protocol keeps stdout to itself.
pub fn init_telemetry(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("Invalid log level configuration")?;

    let registry = Registry::default().with(env_filter);

    match config.format {
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .pretty()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_file(true)
                .with_line_number(true);
            registry.with(fmt_layer).init();
        }
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_span_list(true)
                .flatten_event(true);
            registry.with(fmt_layer).init();
        }
        LogFormat::Compact => {
            let fmt_layer = fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_file(false)
                .with_line_number(false);
            registry.with(fmt_layer).init();
        }
    }

    tracing::info!(
        log_level = %config.level,
        log_format = ?config.format,
        "Telemetry initialized"
    );
    Ok(())
}

/// Log server startup information
pub fn log_startup_info(config: &Config) {
    tracing::info!(
        state_dir = %config.state.dir_name,
        backup_limit = config.state.backup_limit,
        recipe_repo = %config.recipes.repo,
        router_timeout_s = config.router.default_timeout_s,
        "CDE orchestrator starting up"
    );
}

/// Log configuration validation
pub fn log_config_validation(config: &Config) {
    match config.validate() {
        Ok(()) => {
            tracing::info!("Configuration validation passed");
        }
        Err(e) => {
            tracing::error!(error = %e, "Configuration validation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parsing() {
        // Initialization itself can only run once per process; exercise the
        // configuration shapes instead.
        let configs = vec![
            LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Pretty,
            },
            LoggingConfig {
                level: "debug".to_string(),
                format: LogFormat::Json,
            },
            LoggingConfig {
                level: "warn".to_string(),
                format: LogFormat::Compact,
            },
        ];
        for config in configs {
            assert!(matches!(
                config.format,
                LogFormat::Pretty | LogFormat::Json | LogFormat::Compact
            ));
        }
    }
}
