//! Logging subsystem
//!
//! Structured logging via tracing with support for JSON (production) and
//! plaintext (development) output formats.
//!
//! # Environment Variables
//!
//! - `GUESTPASS_LOG` - Primary log level/filter (takes precedence)
//! - `RUST_LOG` - Fallback log level/filter

use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Guard to track if logging has been initialized
static INIT_GUARD: OnceLock<()> = OnceLock::new();

/// Errors from logging initialization
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Logging already initialized")]
    AlreadyInitialized,
    #[error("Failed to open log file: {0}")]
    Io(String),
    #[error("Failed to install subscriber: {0}")]
    Init(String),
}

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
    /// Write to stdout
    #[default]
    Stdout,
    /// Write to stderr
    Stderr,
    /// Write to a file at the given path
    File(PathBuf),
}

/// Configuration for the logging subsystem
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Output format (JSON or plaintext)
    pub format: LogFormat,
    /// Output destination (stdout, stderr, or file)
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
    /// Create a development configuration (plaintext to stdout, debug level)
    pub fn development() -> Self {
        Self {
            format: LogFormat::Plaintext,
            output: LogOutput::Stdout,
            default_level: Level::DEBUG,
        }
    }

    /// Create a production configuration (JSON to stdout, info level)
    pub fn production() -> Self {
        Self {
            format: LogFormat::Json,
            output: LogOutput::Stdout,
            default_level: Level::INFO,
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// `GUESTPASS_LOG` takes precedence over `RUST_LOG`; with neither set, the
/// config's default level applies. A second call is rejected.
pub fn init_logging(config: LogConfig) -> Result<(), LoggingError> {
    if INIT_GUARD.set(()).is_err() {
        return Err(LoggingError::AlreadyInitialized);
    }

    let filter = build_env_filter(config.default_level);
    let registry = tracing_subscriber::registry().with(filter);

    let result = match (config.format, config.output) {
        (LogFormat::Plaintext, LogOutput::Stdout) => registry
            .with(fmt::layer().with_writer(io::stdout))
            .try_init(),
        (LogFormat::Plaintext, LogOutput::Stderr) => registry
            .with(fmt::layer().with_writer(io::stderr))
            .try_init(),
        (LogFormat::Plaintext, LogOutput::File(path)) => {
            let file = File::create(&path).map_err(|e| LoggingError::Io(e.to_string()))?;
            registry
                .with(fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
                .try_init()
        }
        (LogFormat::Json, LogOutput::Stdout) => registry
            .with(fmt::layer().json().with_writer(io::stdout))
            .try_init(),
        (LogFormat::Json, LogOutput::Stderr) => registry
            .with(fmt::layer().json().with_writer(io::stderr))
            .try_init(),
        (LogFormat::Json, LogOutput::File(path)) => {
            let file = File::create(&path).map_err(|e| LoggingError::Io(e.to_string()))?;
            registry
                .with(fmt::layer().json().with_writer(Arc::new(file)))
                .try_init()
        }
    };

    result.map_err(|e| LoggingError::Init(e.to_string()))
}

fn build_env_filter(default_level: Level) -> EnvFilter {
    EnvFilter::try_from_env("GUESTPASS_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.format, LogFormat::Plaintext);
        assert_eq!(config.output, LogOutput::Stdout);
        assert_eq!(config.default_level, Level::INFO);
    }

    #[test]
    fn test_presets() {
        let dev = LogConfig::development();
        assert_eq!(dev.format, LogFormat::Plaintext);
        assert_eq!(dev.default_level, Level::DEBUG);

        let prod = LogConfig::production();
        assert_eq!(prod.format, LogFormat::Json);
        assert_eq!(prod.default_level, Level::INFO);
    }

    #[test]
    fn test_double_init_rejected() {
        // The first call may or may not win depending on test ordering, but
        // a repeat call must always report the guard.
        let _ = init_logging(LogConfig::default());
        let second = init_logging(LogConfig::default());
        assert!(matches!(second, Err(LoggingError::AlreadyInitialized)));
    }
}
