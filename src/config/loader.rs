//! Configuration Loader
//!
//! Environment-aware loading: `base.yaml`, then `<environment>.yaml`, then
//! `INSTRUCTOR_TASK__`-prefixed environment variables, later sources winning.
//! Both files are optional so a bare environment works out of the box.

use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::error::ConfigResult;
use super::InstructorTaskConfig;

const ENV_PREFIX: &str = "INSTRUCTOR_TASK";

pub struct ConfigManager {
    config: InstructorTaskConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    /// This is useful for testing without modifying global environment variables
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            environment = environment,
            directory = %config_directory.display(),
            "Loading configuration"
        );

        let config = Self::build(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment = environment,
            checkpoint_interval = config.engine.checkpoint_interval,
            max_concurrency = config.engine.max_concurrency,
            failure_tolerance = ?config.engine.failure_tolerance,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    fn build(config_directory: &Path, environment: &str) -> ConfigResult<InstructorTaskConfig> {
        let settings = Config::builder()
            .add_source(File::from(config_directory.join("base.yaml")).required(false))
            .add_source(
                File::from(config_directory.join(format!("{environment}.yaml"))).required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &InstructorTaskConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Current environment from environment variables
    pub fn detect_environment() -> String {
        env::var("INSTRUCTOR_TASK_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }
}
