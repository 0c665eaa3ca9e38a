//! # Configuration Loader
//!
//! Loads [`IngestConfig`](super::IngestConfig) from layered sources: the base
//! TOML file, an optional per-environment override file, and
//! `ELIGIBILITY__`-prefixed environment variables (double underscore as the
//! section separator, e.g. `ELIGIBILITY__PIPELINE__CHUNK_SIZE=500`). Missing
//! files are fine; the built-in defaults already describe a working
//! memory-backed setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use config::{Config, Environment, File};
use tracing::{debug, info};

use super::error::ConfigResult;
use super::IngestConfig;

const BASE_FILE_NAME: &str = "eligibility-core";
const ENV_PREFIX: &str = "ELIGIBILITY";

/// Loaded, validated configuration plus the environment it was loaded for.
#[derive(Debug)]
pub struct ConfigManager {
    config: IngestConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with auto-detected environment and default directory.
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from an explicit directory (or the default one).
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, environment)
    }

    /// Load configuration for a specific environment.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: String,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);
        let base_path = config_directory.join(format!("{BASE_FILE_NAME}.toml"));
        let env_path = config_directory.join(format!("{BASE_FILE_NAME}.{environment}.toml"));

        debug!(
            base = %base_path.display(),
            env_override = %env_path.display(),
            "loading configuration sources"
        );

        let settings = Config::builder()
            .add_source(File::from(base_path).required(false))
            .add_source(File::from(env_path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: IngestConfig = settings.try_deserialize()?;
        config.validate()?;

        info!(
            environment = %environment,
            chunk_size = config.pipeline.chunk_size,
            worker_count = config.dispatch.worker_count,
            object_store_backend = %config.object_store.backend,
            "configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment,
            config_directory,
        }))
    }

    /// Access the loaded configuration.
    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// The environment this configuration was loaded for.
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Directory the configuration files were read from.
    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Detect the current environment from environment variables.
    fn detect_environment() -> String {
        std::env::var("ELIGIBILITY_ENV")
            .or_else(|_| std::env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    /// Default configuration directory (`ELIGIBILITY_CONFIG_DIR` or `config/`).
    fn default_config_directory() -> PathBuf {
        std::env::var("ELIGIBILITY_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }
}
