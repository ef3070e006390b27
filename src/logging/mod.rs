//! Logging subsystem
//!
//! Structured logging via tracing, as JSON (production) or plaintext
//! (development).
//!
//! # Log Targets
//!
//! - `http` - request handling
//! - `cache` - session artifact storage
//! - `producer` - evaluator invocations
//! - `config` - configuration loading
//! - `lifecycle` - startup and shutdown
//!
//! # Environment Variables
//!
//! - `TTABLE_LOG` - Primary log level/filter (takes precedence)
//! - `RUST_LOG` - Fallback log level/filter
//!
//! # Examples
//!
//! ```no_run
//! use ttable::logging::{init_logging, LogConfig, LogFormat, LogOutput};
//!
//! init_logging(LogConfig {
//!     format: LogFormat::Json,
//!     output: LogOutput::File("/var/log/ttable.log".into()),
//!     default_level: tracing::Level::INFO,
//! }).unwrap();
//! ```

use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use tracing::Level;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::{LogFormatSetting, LoggingSettings};

/// Guard to track if logging has been initialized
static INIT_GUARD: OnceLock<()> = OnceLock::new();

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// JSON format for production (structured logs)
    Json,
    /// Human-readable plaintext for development
    #[default]
    Plaintext,
}

/// Log output destination
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File(PathBuf),
}

/// Configuration for the logging subsystem
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    pub output: LogOutput,
    /// Default log level when no env filter is set
    pub default_level: Level,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Plaintext,
            output: LogOutput::Stdout,
            default_level: Level::INFO,
        }
    }
}

impl LogConfig {
    /// Plaintext to stdout, debug level
    pub fn development() -> Self {
        Self {
            format: LogFormat::Plaintext,
            output: LogOutput::Stdout,
            default_level: Level::DEBUG,
        }
    }

    /// JSON to stdout, info level
    pub fn production() -> Self {
        Self {
            format: LogFormat::Json,
            output: LogOutput::Stdout,
            default_level: Level::INFO,
        }
    }

    /// Build from the `logging` config section. An unrecognised level falls
    /// back to info.
    pub fn from_settings(settings: &LoggingSettings) -> Self {
        let format = match settings.format {
            LogFormatSetting::Json => LogFormat::Json,
            LogFormatSetting::Plaintext => LogFormat::Plaintext,
        };
        Self {
            format,
            output: LogOutput::Stdout,
            default_level: settings.level.parse().unwrap_or(Level::INFO),
        }
    }
}

/// Error type for logging initialization
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to create log file: {0}")]
    FileCreation(#[from] io::Error),
    #[error("failed to parse log filter: {0}")]
    FilterParse(#[from] tracing_subscriber::filter::ParseError),
    #[error("logging already initialized")]
    AlreadyInitialized,
    #[error("failed to initialize subscriber: {0}")]
    TryInit(#[from] tracing_subscriber::util::TryInitError),
}

/// Build an EnvFilter from environment variables or default level.
///
/// Checks TTABLE_LOG first, then RUST_LOG, falling back to the default level.
fn build_env_filter(default_level: Level) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = std::env::var("TTABLE_LOG") {
        return Ok(EnvFilter::try_new(filter)?);
    }
    if let Ok(filter) = std::env::var("RUST_LOG") {
        return Ok(EnvFilter::try_new(filter)?);
    }

    let default_filter = format!(
        "{level},http={level},cache={level},producer={level},config={level},lifecycle={level}",
        level = default_level.as_str().to_lowercase()
    );
    Ok(EnvFilter::try_new(default_filter)?)
}

fn make_writer(output: &LogOutput) -> Result<BoxMakeWriter, LoggingError> {
    Ok(match output {
        LogOutput::Stdout => BoxMakeWriter::new(io::stdout),
        LogOutput::Stderr => BoxMakeWriter::new(io::stderr),
        LogOutput::File(path) => BoxMakeWriter::new(Mutex::new(File::create(path)?)),
    })
}

/// Initialize the logging subsystem with the given configuration.
///
/// Call once at startup; subsequent calls return
/// [`LoggingError::AlreadyInitialized`].
pub fn init_logging(config: LogConfig) -> Result<(), LoggingError> {
    if INIT_GUARD.set(()).is_err() {
        return Err(LoggingError::AlreadyInitialized);
    }
    install(config)
}

/// Initialize logging for tests.
///
/// Plaintext at debug level. Errors are ignored so any number of tests may
/// call it.
pub fn init_test_logging() {
    let _ = install(LogConfig::development());
}

fn install(config: LogConfig) -> Result<(), LoggingError> {
    let filter = build_env_filter(config.default_level)?;
    let writer = make_writer(&config.output)?;
    let timer = UtcTime::rfc_3339();

    match config.format {
        LogFormat::Json => {
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_timer(timer)
                .with_target(true)
                .with_current_span(true)
                .with_span_list(true)
                .with_writer(writer)
                .with_filter(filter);
            tracing_subscriber::registry().with(layer).try_init()?;
        }
        LogFormat::Plaintext => {
            let layer = tracing_subscriber::fmt::layer()
                .with_timer(timer)
                .with_target(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(false)
                .with_writer(writer)
                .with_filter(filter);
            tracing_subscriber::registry().with(layer).try_init()?;
        }
    }

    Ok(())
}

/// Log target constants for consistent naming across the codebase
pub mod targets {
    pub const HTTP: &str = "http";
    pub const CACHE: &str = "cache";
    pub const PRODUCER: &str = "producer";
    pub const CONFIG: &str = "config";
    pub const LIFECYCLE: &str = "lifecycle";
}
