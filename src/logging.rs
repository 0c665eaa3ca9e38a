//! # Structured Logging Module
//!
//! Environment-aware structured logging for debugging long-running ingestion
//! pipelines. Console output is human-readable in development and JSON in
//! production so platform log shippers can index batch and chunk fields.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Output format for the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

/// Initialize structured logging with environment-specific configuration.
///
/// Safe to call more than once; only the first call installs a subscriber.
/// If a global subscriber is already set (embedding applications, test
/// harnesses), initialization quietly defers to it.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let format = get_log_format(&environment);

        match format {
            LogFormat::Json => {
                let filter = env_filter(&environment);
                let subscriber = tracing_subscriber::registry().with(
                    fmt::layer()
                        .with_target(true)
                        .with_ansi(false)
                        .json()
                        .with_filter(filter),
                );
                if subscriber.try_init().is_err() {
                    tracing::debug!(
                        "global tracing subscriber already initialized, continuing with existing subscriber"
                    );
                }
            }
            LogFormat::Text => {
                let filter = env_filter(&environment);
                let subscriber = tracing_subscriber::registry().with(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_ansi(true)
                        .with_filter(filter),
                );
                if subscriber.try_init().is_err() {
                    tracing::debug!(
                        "global tracing subscriber already initialized, continuing with existing subscriber"
                    );
                }
            }
        }

        tracing::info!(
            environment = %environment,
            format = ?format,
            "structured logging initialized"
        );
    });
}

/// Build the level filter, honoring `RUST_LOG` when set.
fn env_filter(environment: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(get_log_level(environment)))
}

/// Get current environment from environment variables.
fn get_environment() -> String {
    std::env::var("ELIGIBILITY_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Pick the output format: explicit override first, then environment default.
fn get_log_format(environment: &str) -> LogFormat {
    match std::env::var("ELIGIBILITY_LOG_FORMAT").as_deref() {
        Ok("json") => LogFormat::Json,
        Ok("text") => LogFormat::Text,
        _ => {
            if environment == "production" {
                LogFormat::Json
            } else {
                LogFormat::Text
            }
        }
    }
}

/// Get log level based on environment.
fn get_log_level(environment: &str) -> String {
    match environment {
        "test" => "debug".to_string(),
        "development" => "debug".to_string(),
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("unknown"), "debug");
    }

    #[test]
    fn test_format_defaults_by_environment() {
        std::env::remove_var("ELIGIBILITY_LOG_FORMAT");
        assert_eq!(get_log_format("production"), LogFormat::Json);
        assert_eq!(get_log_format("development"), LogFormat::Text);
    }
}
