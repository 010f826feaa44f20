//! Structured logging for conduit writer and reader processes
//!
//! # Features
//!
//! - **JSONL Output**: Structured JSON lines for log aggregation (default)
//! - **Process Context**: Tag spans with the process role (writer, reader,
//!   maintenance) and a per-run instance id
//! - **File Rotation**: Daily/hourly log rotation via tracing-appender
//!
//! # Quick Start
//!
//! ```ignore
//! use conduit_logging::{ConduitSubscriberBuilder, LogConfig};
//!
//! // JSONL to console
//! let _guard = ConduitSubscriberBuilder::new().init();
//!
//! // Development mode with pretty human-readable output
//! let _guard = ConduitSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init();
//! ```
//!
//! # Process Context
//!
//! ```ignore
//! use conduit_logging::{ProcessContextGuard, ProcessRole};
//!
//! let _ctx = ProcessContextGuard::new(ProcessRole::Writer);
//! tracing::info_span!("publish").in_scope(|| tracing::info!("Appended record"));
//! ```

pub mod config;
pub mod context;
pub mod layers;

pub use config::{ConsoleConfig, FileConfig, FilterConfig, JsonlConfig, LogConfig, RotationStrategy};
pub use context::{ProcessContextData, ProcessContextGuard, ProcessRole};
pub use layers::ProcessContextLayer;
pub use tracing_appender::non_blocking::WorkerGuard;

use std::fs::{self, File};
use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tracing::Subscriber;
use tracing_appender::non_blocking::NonBlocking;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

/// Errors raised while installing the subscriber
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid filter directives '{directives}': {message}")]
    InvalidFilter { directives: String, message: String },

    #[error("Cannot open log output in {directory}: {source}")]
    FileOutput {
        directory: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot create rolling log appender: {0}")]
    Appender(String),

    #[error("A global subscriber is already installed")]
    AlreadyInitialized,
}

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

/// Builder for configuring and initializing the conduit logging subscriber
///
/// By default, console output uses JSONL format. Use `LogConfig::development()`
/// for human-readable pretty output during development.
#[derive(Debug, Clone, Default)]
pub struct ConduitSubscriberBuilder {
    config: LogConfig,
}

impl ConduitSubscriberBuilder {
    /// Create a new subscriber builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    /// Enable or disable console output
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    /// Configure file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Initialize the subscriber globally
    ///
    /// Returns the file writer guard, which must be kept alive for file
    /// output to be flushed. Failures are reported on stderr and leave
    /// logging disabled; use [`try_init`](Self::try_init) to handle them.
    pub fn init(self) -> Option<WorkerGuard> {
        match self.try_init() {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("Warning: Failed to initialize logging: {e}");
                None
            }
        }
    }

    /// Try to initialize the subscriber globally
    pub fn try_init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let env_filter = self.env_filter()?;
        let (outputs, guard) = self.output_layers()?;

        Registry::default()
            .with(env_filter)
            .with(ProcessContextLayer::new())
            .with(outputs)
            .try_init()
            .map_err(|_| LoggingError::AlreadyInitialized)?;

        Ok(guard)
    }

    /// `RUST_LOG` when set, the configured directives otherwise
    fn env_filter(&self) -> Result<EnvFilter, LoggingError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        let directives = self.config.directives();
        EnvFilter::try_new(&directives).map_err(|e| LoggingError::InvalidFilter {
            directives,
            message: e.to_string(),
        })
    }

    fn output_layers<S>(&self) -> Result<(Vec<BoxedLayer<S>>, Option<WorkerGuard>), LoggingError>
    where
        S: Subscriber + for<'lookup> LookupSpan<'lookup> + 'static,
    {
        let mut outputs = Vec::new();
        let mut guard = None;

        if self.config.console.enabled {
            outputs.push(if self.config.console.stderr {
                self.console_layer(io::stderr)
            } else {
                self.console_layer(io::stdout)
            });
        }

        if let Some(file_config) = &self.config.file {
            let (writer, file_guard) = file_writer(file_config)?;
            outputs.push(layers::jsonl_layer(writer, &self.config.jsonl));
            guard = Some(file_guard);
        }

        Ok((outputs, guard))
    }

    fn console_layer<S, W>(&self, writer: W) -> BoxedLayer<S>
    where
        S: Subscriber + for<'lookup> LookupSpan<'lookup> + 'static,
        W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
    {
        if self.config.console.pretty {
            layers::pretty_layer(writer, self.config.console.ansi)
        } else {
            layers::jsonl_layer(writer, &self.config.jsonl)
        }
    }
}

/// Non-blocking writer for file output; truncates for `Never`, appends otherwise
fn file_writer(config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    let file_error = |source: io::Error| LoggingError::FileOutput {
        directory: config.directory.clone(),
        source,
    };

    let rotation = match config.rotation {
        RotationStrategy::Never => {
            fs::create_dir_all(&config.directory).map_err(file_error)?;
            let path = config.directory.join(format!("{}.log", config.prefix));
            let file = File::create(&path).map_err(file_error)?;
            return Ok(tracing_appender::non_blocking(file));
        }
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
    };

    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(&config.prefix)
        .filename_suffix("log");
    if let Some(max_files) = config.max_files {
        builder = builder.max_log_files(max_files);
    }
    let appender = builder
        .build(&config.directory)
        .map_err(|e| LoggingError::Appender(e.to_string()))?;

    Ok(tracing_appender::non_blocking(appender))
}

/// Initialize logging with default settings (JSONL to console)
pub fn init_default() -> Option<WorkerGuard> {
    ConduitSubscriberBuilder::new().init()
}

/// Initialize logging for development (verbose, pretty console output)
pub fn init_development() -> Option<WorkerGuard> {
    ConduitSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init()
}

/// Initialize logging for testing (minimal output); safe to call repeatedly
pub fn init_testing() {
    let _ = ConduitSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}
