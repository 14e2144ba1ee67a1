//! # Structured Logging Module
//!
//! Environment-aware structured logging that writes human-readable output to
//! the console and JSON lines to a per-process log file, for following long
//! batch runs after the fact.

use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

static LOGGER_INITIALIZED: OnceLock<Option<WorkerGuard>> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);

        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .with_ansi(true)
            .with_filter(EnvFilter::new(log_level));

        let log_dir = PathBuf::from("log");
        let log_filename = format!(
            "{}.{}.{}.log",
            environment,
            process::id(),
            Utc::now().format("%Y%m%d_%H%M%S")
        );

        let (file_layer, guard) = match fs::create_dir_all(&log_dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::never(&log_dir, &log_filename);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = fmt::layer()
                    .with_writer(writer)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_level(true)
                    .with_ansi(false)
                    .json()
                    .with_filter(EnvFilter::new(log_level));
                (Some(layer), Some(guard))
            }
            Err(_) => (None, None),
        };

        // A global subscriber may already be installed by the host process
        if tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .is_err()
        {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = process::id(),
            environment = %environment,
            log_file = %log_dir.join(&log_filename).display(),
            file_output = guard.is_some(),
            "Structured logging initialized"
        );

        guard
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("INSTRUCTOR_TASK_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log structured data for task entry lifecycle operations
pub fn log_task_operation(
    operation: &str,
    entry_id: Uuid,
    course_id: &str,
    action: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        entry_id = %entry_id,
        course_id = %course_id,
        action = %action,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "TASK_OPERATION"
    );
}

/// Log structured data for a per-record failure or skip
pub fn log_record_operation(
    entry_id: Uuid,
    record_id: i64,
    learner_id: i64,
    action: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::warn!(
        entry_id = %entry_id,
        record_id = record_id,
        learner_id = learner_id,
        action = %action,
        status = %status,
        details = details,
        "RECORD_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "ERROR"
    );
}
