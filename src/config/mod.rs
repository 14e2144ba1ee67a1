//! # Configuration
//!
//! Settings for the database pool and the batch update engine, loaded from
//! layered YAML files plus environment overrides.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use instructor_task::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let interval = manager.config().engine.checkpoint_interval;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::defaults;
use crate::models::TaskProgress;
use crate::progress::RetryPolicy;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct InstructorTaskConfig {
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
}

impl InstructorTaskConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        self.database.validate()?;
        self.engine.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/instructor_task_development".to_string(),
            max_connections: defaults::MAX_DB_CONNECTIONS,
        }
    }
}

impl DatabaseConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.url.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "database.url",
                "",
                "a connection URL is required",
            ));
        }
        if self.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                "0",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// When a completed pass with per-record failures is marked failed.
///
/// With `Unlimited` a pass that reaches the end of the candidates always
/// succeeds; individual failures only show up in the counters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FailureTolerance {
    #[default]
    Unlimited,
    /// Fail the run when more than `limit` records failed.
    MaxFailures { limit: u64 },
    /// Fail the run when `failed / attempted` exceeds `limit` (0.0 to 1.0).
    MaxFailureRatio { limit: f64 },
}

impl FailureTolerance {
    pub fn is_exceeded(&self, progress: &TaskProgress) -> bool {
        match *self {
            Self::Unlimited => false,
            Self::MaxFailures { limit } => progress.failed > limit,
            Self::MaxFailureRatio { limit } => {
                progress.attempted > 0
                    && (progress.failed as f64 / progress.attempted as f64) > limit
            }
        }
    }

    fn validate(&self) -> ConfigResult<()> {
        if let Self::MaxFailureRatio { limit } = *self {
            if !(0.0..=1.0).contains(&limit) {
                return Err(ConfigurationError::invalid_value(
                    "engine.failure_tolerance.limit",
                    limit.to_string(),
                    "ratio must be between 0.0 and 1.0",
                ));
            }
        }
        Ok(())
    }
}

/// Batch update engine settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Records processed between durable checkpoints
    pub checkpoint_interval: u64,
    /// Candidates fetched per keyset page
    pub page_size: usize,
    /// Records processed concurrently; 1 keeps processing strictly sequential
    pub max_concurrency: usize,
    /// Upper bound for building and updating one record
    pub record_timeout_ms: u64,
    /// Retries for a failed checkpoint write before the run aborts
    pub checkpoint_retry_limit: u32,
    pub checkpoint_backoff_base_ms: u64,
    pub failure_tolerance: FailureTolerance,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: defaults::CHECKPOINT_INTERVAL,
            page_size: defaults::PAGE_SIZE,
            max_concurrency: defaults::MAX_CONCURRENCY,
            record_timeout_ms: defaults::RECORD_TIMEOUT_MS,
            checkpoint_retry_limit: defaults::CHECKPOINT_RETRY_LIMIT,
            checkpoint_backoff_base_ms: defaults::CHECKPOINT_BACKOFF_BASE_MS,
            failure_tolerance: FailureTolerance::default(),
        }
    }
}

impl EngineConfig {
    pub fn record_timeout(&self) -> Duration {
        Duration::from_millis(self.record_timeout_ms)
    }

    pub fn checkpoint_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.checkpoint_retry_limit,
            Duration::from_millis(self.checkpoint_backoff_base_ms),
        )
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let positive = [
            ("engine.checkpoint_interval", self.checkpoint_interval),
            ("engine.page_size", self.page_size as u64),
            ("engine.max_concurrency", self.max_concurrency as u64),
            ("engine.record_timeout_ms", self.record_timeout_ms),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigurationError::invalid_value(
                    field,
                    "0",
                    "must be at least 1",
                ));
            }
        }
        self.failure_tolerance.validate()
    }
}
