//! INI configuration file.
//!
//! Settings live in `config.ini` under the platform config directory
//! (`~/.config/tidewatch/config.ini` on Linux). A missing file means
//! defaults; every key is optional.
//!
//! ```ini
//! [api]
//! base_url = http://localhost:8000
//!
//! [transport]
//! primary_url = ws://localhost:8000
//! credential = <stream key>
//! fallback_enabled = true
//!
//! [render]
//! budget = 2000
//! flush_interval_ms = 250
//! ```
//!
//! `TIDEWATCH_STREAM_KEY` overrides `transport.credential`.

mod file;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::backfill::BackfillConfig;
use crate::coord::{Position, Viewport};
use crate::cull::CullConfig;
use crate::engine::EngineConfig;
use crate::logging::LoggingConfig;
use crate::poller::PollerConfig;
use crate::transport::TransportConfig;

/// Directory name below the platform config directory.
pub const CONFIG_DIR_NAME: &str = "tidewatch";

/// Config file name.
pub const CONFIG_FILE_NAME: &str = "config.ini";

/// Environment variable that overrides `transport.credential`.
pub const STREAM_KEY_ENV: &str = "TIDEWATCH_STREAM_KEY";

/// Default REST API base.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";

/// Centre of the default map view (Madrid).
pub const DEFAULT_VIEW_CENTER: Position = Position {
    lon: -3.7038,
    lat: 40.4168,
};

/// Default map zoom.
pub const DEFAULT_VIEW_ZOOM: f64 = 3.0;

/// Half extents of the default view in degrees, roughly what zoom 3 shows.
const DEFAULT_VIEW_HALF_WIDTH: f64 = 45.0;
const DEFAULT_VIEW_HALF_HEIGHT: f64 = 25.0;

/// Errors from loading the config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(String),

    #[error("invalid value '{value}' for {section}.{key}: {reason}")]
    InvalidValue {
        section: &'static str,
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("could not determine the platform config directory")]
    NoConfigDir,
}

/// REST endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    /// Base URL for the paginated and detail endpoints.
    pub base_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
        }
    }
}

impl ApiConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// The map view shown before the host reports one.
pub fn default_viewport() -> Viewport {
    Viewport::centered(
        DEFAULT_VIEW_CENTER,
        DEFAULT_VIEW_HALF_WIDTH,
        DEFAULT_VIEW_HALF_HEIGHT,
        DEFAULT_VIEW_ZOOM,
    )
}

/// Everything the config file can set.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub api: ApiConfig,
    pub transport: TransportConfig,
    pub backfill: BackfillConfig,
    pub poller: PollerConfig,
    pub render: CullConfig,
    pub viewport: Viewport,
    pub logging: LoggingConfig,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            transport: TransportConfig::default(),
            backfill: BackfillConfig::default(),
            poller: PollerConfig::default(),
            render: CullConfig::default(),
            viewport: default_viewport(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ConfigFile {
    /// Load from the default location, falling back to defaults when the
    /// file does not exist. The stream key environment override applies.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_file_path();
        let mut config = if path.exists() {
            Self::read(&path)?
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Load from an explicit path. The file must exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::read(path)?;
        config.apply_env();
        Ok(config)
    }

    /// Parse INI text without touching the environment.
    pub fn parse_str(text: &str) -> Result<Self, ConfigError> {
        let ini = ini::Ini::load_from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        file::from_ini(&ini)
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse_str(&text)?;
        info!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var(STREAM_KEY_ENV) {
            self.apply_stream_key(&key);
        }
    }

    /// Override the fallback credential. Blank values are ignored.
    pub fn apply_stream_key(&mut self, key: &str) {
        if key.trim().is_empty() {
            return;
        }
        self.transport = self.transport.clone().with_credential(key);
    }

    /// Engine settings derived from this file.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_cull(self.render.clone())
            .with_backfill(self.backfill.clone())
            .with_poller(self.poller.clone())
            .with_transport(self.transport.clone())
            .with_initial_viewport(self.viewport)
    }
}

/// Path of the config file in the platform config directory.
///
/// Falls back to a relative `tidewatch/` directory if the platform has none.
pub fn config_file_path() -> PathBuf {
    config_dir()
        .unwrap_or_else(|_| PathBuf::from(CONFIG_DIR_NAME))
        .join(CONFIG_FILE_NAME)
}

/// `tidewatch` directory below the platform config directory.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join(CONFIG_DIR_NAME))
        .ok_or(ConfigError::NoConfigDir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_defaults() {
        let config = ConfigFile::default();
        assert_eq!(config.api.base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.render.budget, 2000);
        assert!(config.viewport.contains(DEFAULT_VIEW_CENTER));
        assert_eq!(config.viewport.zoom, DEFAULT_VIEW_ZOOM);
        assert!(config.transport.credential.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[api]\nbase_url = http://api.test\n\n[render]\nbudget = 10\nflush_interval_ms = 400\n"
        )
        .unwrap();

        let config = ConfigFile::load_from(file.path()).unwrap();
        assert_eq!(config.api.base_url, "http://api.test");
        assert_eq!(config.render.budget, 10);
        assert_eq!(config.render.flush_interval, Duration::from_millis(400));
    }

    #[test]
    fn test_load_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = ConfigFile::load_from(&dir.path().join("absent.ini"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_stream_key_override() {
        let mut config = ConfigFile::parse_str("[transport]\ncredential = from-file\n").unwrap();
        config.apply_stream_key("   ");
        assert_eq!(config.transport.credential.as_deref(), Some("from-file"));
        config.apply_stream_key("from-env");
        assert_eq!(config.transport.credential.as_deref(), Some("from-env"));
    }

    #[test]
    fn test_engine_config_carries_sections() {
        let config =
            ConfigFile::parse_str("[backfill]\ncap = 50\n[viewport]\nwest = 170\neast = -170\n")
                .unwrap();
        let engine = config.engine_config();
        assert_eq!(engine.backfill.cap, 50);
        assert!(engine.initial_viewport.crosses_antimeridian());
    }

    #[test]
    fn test_config_file_path_name() {
        assert!(config_file_path().ends_with("tidewatch/config.ini"));
    }
}
