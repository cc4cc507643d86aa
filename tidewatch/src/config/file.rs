//! Section-by-section mapping from INI to [`ConfigFile`].

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;
use tracing::warn;

use super::{ConfigError, ConfigFile};
use crate::coord::Viewport;

/// Recognised keys per section.
const KNOWN_KEYS: &[(&str, &[&str])] = &[
    ("api", &["base_url"]),
    (
        "transport",
        &[
            "primary_url",
            "primary_path",
            "secondary_url",
            "credential",
            "fallback_enabled",
            "fallback_delay_ms",
            "reconnect_min_ms",
            "reconnect_max_ms",
            "reconnect_jitter",
        ],
    ),
    ("backfill", &["enabled", "page_size", "cap"]),
    ("poller", &["debounce_ms", "page_size"]),
    ("render", &["budget", "flush_interval_ms"]),
    ("viewport", &["west", "south", "east", "north", "zoom"]),
    ("logging", &["level", "directory"]),
];

/// Build a config from parsed INI, starting from defaults.
pub(super) fn from_ini(ini: &Ini) -> Result<ConfigFile, ConfigError> {
    warn_unknown(ini);

    let reader = Reader { ini };
    let mut config = ConfigFile::default();

    if let Some(url) = reader.string("api", "base_url") {
        config.api = config.api.with_base_url(url);
    }

    let mut transport = config.transport;
    if let Some(url) = reader.string("transport", "primary_url") {
        transport = transport.with_primary_url(url);
    }
    if let Some(path) = reader.raw("transport", "primary_path") {
        transport = transport.with_primary_path(path);
    }
    if let Some(url) = reader.string("transport", "secondary_url") {
        transport = transport.with_secondary_url(url);
    }
    if let Some(credential) = reader.string("transport", "credential") {
        transport = transport.with_credential(credential);
    }
    if let Some(enabled) = reader.bool("transport", "fallback_enabled")? {
        transport = transport.with_fallback_enabled(enabled);
    }
    if let Some(delay) = reader.millis("transport", "fallback_delay_ms")? {
        transport = transport.with_fallback_delay(delay);
    }
    let min = reader.positive_millis("transport", "reconnect_min_ms")?;
    let max = reader.positive_millis("transport", "reconnect_max_ms")?;
    let jitter = reader.parse::<f64>("transport", "reconnect_jitter")?;
    if min.is_some() || max.is_some() || jitter.is_some() {
        let mut policy = transport.reconnect.clone();
        if min.is_some() || max.is_some() {
            let min = min.unwrap_or(policy.min_delay);
            let max = max.unwrap_or(policy.max_delay);
            if max < min {
                return Err(ConfigError::InvalidValue {
                    section: "transport",
                    key: "reconnect_max_ms",
                    value: max.as_millis().to_string(),
                    reason: "must not be below reconnect_min_ms".to_string(),
                });
            }
            policy = policy.with_bounds(min, max);
        }
        if let Some(jitter) = jitter {
            policy = policy.with_jitter(jitter);
        }
        transport = transport.with_reconnect(policy);
    }
    config.transport = transport;

    if let Some(enabled) = reader.bool("backfill", "enabled")? {
        config.backfill = config.backfill.with_enabled(enabled);
    }
    if let Some(page_size) = reader.positive::<u32>("backfill", "page_size")? {
        config.backfill = config.backfill.with_page_size(page_size);
    }
    if let Some(cap) = reader.parse::<usize>("backfill", "cap")? {
        config.backfill = config.backfill.with_cap(cap);
    }

    if let Some(debounce) = reader.millis("poller", "debounce_ms")? {
        config.poller = config.poller.with_debounce(debounce);
    }
    if let Some(page_size) = reader.positive::<u32>("poller", "page_size")? {
        config.poller = config.poller.with_page_size(page_size);
    }

    if let Some(budget) = reader.positive::<usize>("render", "budget")? {
        config.render = config.render.with_budget(budget);
    }
    if let Some(interval) = reader.positive_millis("render", "flush_interval_ms")? {
        config.render = config.render.with_flush_interval(interval);
    }

    config.viewport = viewport(&reader, config.viewport)?;

    if let Some(level) = reader.string("logging", "level") {
        config.logging = config.logging.with_level(level);
    }
    if let Some(directory) = reader.string("logging", "directory") {
        config.logging = config.logging.with_directory(directory);
    }

    Ok(config)
}

/// Overlay any viewport edges present in the file.
fn viewport(reader: &Reader<'_>, default: Viewport) -> Result<Viewport, ConfigError> {
    let west = reader.coordinate("west", -180.0, 180.0)?;
    let south = reader.coordinate("south", -90.0, 90.0)?;
    let east = reader.coordinate("east", -180.0, 180.0)?;
    let north = reader.coordinate("north", -90.0, 90.0)?;
    let zoom = reader.parse::<f64>("viewport", "zoom")?;

    let view = Viewport::new(
        west.unwrap_or(default.west),
        south.unwrap_or(default.south),
        east.unwrap_or(default.east),
        north.unwrap_or(default.north),
        zoom.unwrap_or(default.zoom),
    );
    if view.south > view.north {
        return Err(ConfigError::InvalidValue {
            section: "viewport",
            key: "south",
            value: view.south.to_string(),
            reason: format!("must not exceed north ({})", view.north),
        });
    }
    Ok(view)
}

fn warn_unknown(ini: &Ini) {
    for (section, properties) in ini.iter() {
        let Some(section) = section else {
            for (key, _) in properties.iter() {
                warn!(key, "Ignoring config key outside any section");
            }
            continue;
        };
        let Some((_, known)) = KNOWN_KEYS.iter().find(|(name, _)| *name == section) else {
            warn!(section, "Ignoring unknown config section");
            continue;
        };
        for (key, _) in properties.iter() {
            if !known.contains(&key) {
                warn!(section, key, "Ignoring unknown config key");
            }
        }
    }
}

/// Typed access to INI values.
struct Reader<'a> {
    ini: &'a Ini,
}

impl<'a> Reader<'a> {
    /// The value as written, including empty strings.
    fn raw(&self, section: &str, key: &str) -> Option<&'a str> {
        self.ini
            .section(Some(section))
            .and_then(|properties| properties.get(key))
            .map(str::trim)
    }

    /// A non-empty value.
    fn string(&self, section: &str, key: &str) -> Option<&'a str> {
        self.raw(section, key).filter(|value| !value.is_empty())
    }

    fn parse<T>(&self, section: &'static str, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        let Some(value) = self.string(section, key) else {
            return Ok(None);
        };
        value
            .parse::<T>()
            .map(Some)
            .map_err(|e| invalid(section, key, value, e))
    }

    fn positive<T>(&self, section: &'static str, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr + Default + PartialEq,
        T::Err: Display,
    {
        match self.parse::<T>(section, key)? {
            Some(value) if value == T::default() => Err(invalid(section, key, "0", "must be positive")),
            other => Ok(other),
        }
    }

    fn millis(
        &self,
        section: &'static str,
        key: &'static str,
    ) -> Result<Option<Duration>, ConfigError> {
        Ok(self.parse::<u64>(section, key)?.map(Duration::from_millis))
    }

    fn positive_millis(
        &self,
        section: &'static str,
        key: &'static str,
    ) -> Result<Option<Duration>, ConfigError> {
        Ok(self.positive::<u64>(section, key)?.map(Duration::from_millis))
    }

    fn bool(&self, section: &'static str, key: &'static str) -> Result<Option<bool>, ConfigError> {
        let Some(value) = self.string(section, key) else {
            return Ok(None);
        };
        match value.to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(Some(true)),
            "false" | "no" | "off" | "0" => Ok(Some(false)),
            _ => Err(invalid(section, key, value, "expected true or false")),
        }
    }

    fn coordinate(&self, key: &'static str, min: f64, max: f64) -> Result<Option<f64>, ConfigError> {
        let Some(value) = self.parse::<f64>("viewport", key)? else {
            return Ok(None);
        };
        if !value.is_finite() || value < min || value > max {
            return Err(invalid(
                "viewport",
                key,
                &value.to_string(),
                format!("must be within {}..={}", min, max),
            ));
        }
        Ok(Some(value))
    }
}

fn invalid(
    section: &'static str,
    key: &'static str,
    value: &str,
    reason: impl Display,
) -> ConfigError {
    ConfigError::InvalidValue {
        section,
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
