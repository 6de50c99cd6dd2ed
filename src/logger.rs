//! Centralized logging configuration and initialization manager.
//!
//! The `LoggerManager` validates the logging configuration and installs the
//! global `tracing` subscriber. Output goes to stderr so log lines never
//! interleave with report tables on stdout.

use std::io;

use thiserror::Error;
use tracing_subscriber::{fmt, fmt::format::FmtSpan, prelude::*, EnvFilter, Layer, Registry};
use validator::{Validate, ValidationErrors};

use crate::{
    config::logger::{ConsoleConfig, LogFormat, LoggerConfig},
    print_warn,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Errors that can occur during logger configuration or initialization.
#[derive(Error, Debug)]
pub enum LoggerError {
    /// The global subscriber could not be installed.
    #[error("Logger initialization error: {0}")]
    InitializationError(String),

    /// Validation errors from the logger configuration struct.
    #[error("Logger configuration validation error: {0}")]
    ValidationError(#[from] ValidationErrors),

    /// No output layers were configured.
    #[error("No logging layers were configured")]
    NoLayersConfigured,
}

/// Manages logging configuration and global subscriber initialization.
pub struct LoggerManager {
    config: LoggerConfig,
}

impl LoggerManager {
    /// Creates a new `LoggerManager` and validates the provided configuration.
    ///
    /// # Errors
    ///
    /// Returns `LoggerError::ValidationError` if configuration validation fails.
    pub fn new(config: LoggerConfig) -> Result<Self, LoggerError> {
        config.validate()?;

        Ok(LoggerManager { config })
    }

    /// Filter from `RUST_LOG`, falling back to the configured level.
    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.config.level))
    }

    /// Initializes the global `tracing` subscriber.
    ///
    /// Must be called once at startup, before any report is processed.
    pub fn init(&mut self) -> Result<(), LoggerError> {
        let layer = match &self.config.console {
            Some(console_config) if console_config.enabled => {
                self.init_console_logger(console_config, self.filter())
            }
            _ => {
                print_warn!("No logging layers were initialized. Please check your configuration.");
                return Err(LoggerError::NoLayersConfigured);
            }
        };

        tracing_subscriber::registry()
            .with(layer)
            .try_init()
            .map_err(|e| LoggerError::InitializationError(e.to_string()))
    }

    /// Constructs a console output layer according to the provided configuration.
    fn init_console_logger(&self, config: &ConsoleConfig, filter: EnvFilter) -> BoxedLayer {
        let writer = io::stderr;
        let span_events = if config.show_spans {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        match config.format {
            LogFormat::Json => fmt::layer()
                .json()
                .with_target(config.show_target)
                .with_thread_ids(config.show_thread_ids)
                .with_span_events(span_events)
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter)
                .boxed(),
            LogFormat::Pretty => fmt::layer()
                .pretty()
                .with_target(config.show_target)
                .with_thread_ids(config.show_thread_ids)
                .with_span_events(span_events)
                .with_ansi(config.ansi_colors)
                .with_writer(writer)
                .with_filter(filter)
                .boxed(),
            LogFormat::Compact => fmt::layer()
                .compact()
                .with_target(config.show_target)
                .with_thread_ids(config.show_thread_ids)
                .with_span_events(span_events)
                .with_ansi(config.ansi_colors)
                .with_writer(writer)
                .with_filter(filter)
                .boxed(),
        }
    }
}
