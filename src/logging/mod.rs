/*!
 * Logging Module
 * Centralized logging configuration and utilities
 */
pub mod config;
pub mod middleware;

pub use config::{LogConfig, LogLevel};

use std::io;
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize the logging system.
///
/// The returned guards flush the background writers on drop and must be held
/// for as long as the process logs.
pub fn init(config: &LogConfig) -> Vec<WorkerGuard> {
    let is_production = config.is_production();

    // Create log directory if it doesn't exist
    if let Err(e) = std::fs::create_dir_all(&config.dir) {
        eprintln!("Failed to create log directory {}: {}", config.dir.display(), e);
    }

    // File appender for all logs
    let file_appender = rolling::daily(&config.dir, "app.log");
    let (file_writer, file_guard) = non_blocking(file_appender);

    // File appender for errors only
    let error_appender = rolling::daily(&config.dir, "error.log");
    let (error_writer, error_guard) = non_blocking(error_appender);

    // Console writer
    let (console_writer, console_guard) = non_blocking(io::stdout());

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directive()));

    // Build the subscriber
    let subscriber = tracing_subscriber::registry().with(env_filter);

    let result = if is_production {
        // JSON format for production
        let file_layer = fmt::layer()
            .json()
            .with_writer(file_writer)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true);

        let error_layer = fmt::layer()
            .json()
            .with_writer(error_writer)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_filter(tracing_subscriber::filter::LevelFilter::ERROR);

        let console_layer = fmt::layer()
            .json()
            .with_writer(console_writer)
            .with_target(false);

        subscriber
            .with(file_layer)
            .with(error_layer)
            .with(console_layer)
            .try_init()
    } else {
        // Pretty format for development
        let file_layer = fmt::layer()
            .with_writer(file_writer)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false);

        let error_layer = fmt::layer()
            .with_writer(error_writer)
            .with_target(true)
            .with_ansi(false)
            .with_filter(tracing_subscriber::filter::LevelFilter::ERROR);

        let console_layer = fmt::layer()
            .with_writer(console_writer)
            .with_target(true)
            .pretty()
            .with_thread_ids(false)
            .with_thread_names(false);

        subscriber
            .with(file_layer)
            .with(error_layer)
            .with(console_layer)
            .try_init()
    };

    if let Err(e) = result {
        eprintln!("Logging already initialized: {}", e);
    }

    tracing::info!("Logging initialized for {} environment", config.environment);

    vec![file_guard, error_guard, console_guard]
}
