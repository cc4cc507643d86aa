//! Settings resolution shared across CLI commands.
//!
//! Precedence everywhere: command line, then config file, then defaults.

use std::path::Path;

use tidewatch::config::ConfigFile;
use tidewatch::cull::CullConfig;
use tidewatch::logging::LoggingConfig;
use tidewatch::transport::TransportConfig;

use crate::error::CliError;

/// Load the config from an explicit path, or the default location.
pub fn load_config(path: Option<&Path>) -> Result<ConfigFile, CliError> {
    let config = match path {
        Some(path) => ConfigFile::load_from(path)?,
        None => ConfigFile::load()?,
    };
    Ok(config)
}

/// Resolve the REST API base URL.
pub fn resolve_api_url(cli_url: Option<String>, config: &ConfigFile) -> String {
    cli_url.unwrap_or_else(|| config.api.base_url.clone())
}

/// Resolve transport settings from CLI flags and config.
pub fn resolve_transport(
    cli_primary_url: Option<String>,
    cli_credential: Option<String>,
    no_fallback: bool,
    config: &ConfigFile,
) -> TransportConfig {
    let mut transport = config.transport.clone();
    if let Some(url) = cli_primary_url {
        transport = transport.with_primary_url(url);
    }
    if let Some(credential) = cli_credential {
        transport = transport.with_credential(credential);
    }
    if no_fallback {
        transport = transport.with_fallback_enabled(false);
    }
    transport
}

/// Resolve the render budget.
pub fn resolve_render(cli_budget: Option<usize>, config: &ConfigFile) -> Result<CullConfig, CliError> {
    match cli_budget {
        Some(0) => Err(CliError::Config("--budget must be at least 1".to_string())),
        Some(budget) => Ok(config.render.clone().with_budget(budget)),
        None => Ok(config.render.clone()),
    }
}

/// Resolve the log filter.
pub fn resolve_logging(cli_level: Option<String>, config: &ConfigFile) -> LoggingConfig {
    match cli_level {
        Some(level) => config.logging.clone().with_level(level),
        None => config.logging.clone(),
    }
}
