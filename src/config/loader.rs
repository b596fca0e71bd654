// src/config/loader.rs

//! # Configuration Loader
//!
//! Reads the TOML file, deserializes it into `RawConfig`, and converts the
//! textual durations into a runtime `Config`.

use crate::alertyx_log;
use crate::config::model::{Config, ConfigError, MonitorConfig, MonitorStub, RawConfig};
use log::{Level, LevelFilter};
use std::{fs, io::ErrorKind, path::Path, time::Duration};

/// Load and parse the configuration at `path`.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    alertyx_log!(Level::Debug, "config", "Reading config from {:?}", path);
    let txt = fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
    let cfg = parse(&txt)?;
    alertyx_log!(Level::Info, "config", "Loaded config from {:?}", path);
    Ok(cfg)
}

/// Like `load`, but a missing file yields the defaults.
pub fn load_or_default(path: &Path) -> Result<Config, ConfigError> {
    match load(path) {
        Err(ConfigError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
            alertyx_log!(Level::Debug, "config", "No config at {:?}, using defaults", path);
            Ok(Config::default())
        }
        other => other,
    }
}

/// Parse TOML text into a typed `Config`.
pub fn parse(txt: &str) -> Result<Config, ConfigError> {
    let raw: RawConfig = toml::from_str(txt)?;
    level_filter(&raw.logging.level)?;
    Ok(Config {
        logging: raw.logging,
        monitor: convert_monitor(raw.monitor)?,
        catalog: raw.catalog,
        metrics: raw.metrics,
    })
}

/// `"INFO"` → `LevelFilter::Info`, case-insensitive.
pub fn level_filter(level: &str) -> Result<LevelFilter, ConfigError> {
    match level.to_uppercase().as_str() {
        "OFF" => Ok(LevelFilter::Off),
        "ERROR" => Ok(LevelFilter::Error),
        "WARN" => Ok(LevelFilter::Warn),
        "INFO" => Ok(LevelFilter::Info),
        "DEBUG" => Ok(LevelFilter::Debug),
        "TRACE" => Ok(LevelFilter::Trace),
        _ => Err(ConfigError::InvalidLevel(level.into())),
    }
}

fn duration(key: &'static str, value: Option<String>, default: Duration) -> Result<Duration, ConfigError> {
    match value {
        None => Ok(default),
        Some(v) => humantime::parse_duration(&v).map_err(|source| ConfigError::InvalidDuration { key, value: v, source }),
    }
}

fn capacity(key: &'static str, value: Option<usize>, default: usize) -> Result<usize, ConfigError> {
    match value {
        Some(0) => Err(ConfigError::ZeroCapacity(key)),
        Some(n) => Ok(n),
        None => Ok(default),
    }
}

/// Convert the raw `[monitor]` table, filling defaults.
fn convert_monitor(stub: MonitorStub) -> Result<MonitorConfig, ConfigError> {
    let d = MonitorConfig::default();
    let cfg = MonitorConfig {
        channel_capacity: capacity("monitor.channel_capacity", stub.channel_capacity, d.channel_capacity)?,
        dedup_window: duration("monitor.dedup_window", stub.dedup_window, d.dedup_window)?,
        dedup_capacity: capacity("monitor.dedup_capacity", stub.dedup_capacity, d.dedup_capacity)?,
        shutdown_timeout: duration("monitor.shutdown_timeout", stub.shutdown_timeout, d.shutdown_timeout)?,
        poll_interval: duration("monitor.poll_interval", stub.poll_interval, d.poll_interval)?,
        ignore: stub.ignore,
        feeds: stub.feeds,
    };
    alertyx_log!(
        Level::Debug,
        "config",
        "monitor: capacity={}, dedup={:?}/{}, shutdown={:?}, {} feed(s)",
        cfg.channel_capacity,
        cfg.dedup_window,
        cfg.dedup_capacity,
        cfg.shutdown_timeout,
        cfg.feeds.len()
    );
    Ok(cfg)
}
