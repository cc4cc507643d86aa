//! CLI error type.

use std::fmt;

use tidewatch::config::ConfigError;
use tidewatch::engine::EngineError;
use tidewatch::logging::LoggingError;

/// Startup failures. Anything after the engine is running is logged instead.
#[derive(Debug)]
pub enum CliError {
    /// Config file or command-line value problem.
    Config(String),
    /// Logging could not be initialised.
    Logging(LoggingError),
    /// The engine could not be assembled.
    Engine(EngineError),
    /// The async runtime could not be built.
    Runtime(std::io::Error),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Logging(e) => write!(f, "Logging error: {}", e),
            CliError::Engine(e) => write!(f, "Engine error: {}", e),
            CliError::Runtime(e) => write!(f, "Runtime error: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(_) => None,
            CliError::Logging(e) => Some(e),
            CliError::Engine(e) => Some(e),
            CliError::Runtime(e) => Some(e),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<LoggingError> for CliError {
    fn from(e: LoggingError) -> Self {
        CliError::Logging(e)
    }
}

impl From<EngineError> for CliError {
    fn from(e: EngineError) -> Self {
        CliError::Engine(e)
    }
}
