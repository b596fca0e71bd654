// src/config/model.rs

use serde::Deserialize;
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use thiserror::Error;

/// Top-level runtime config
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub monitor: MonitorConfig,
    pub catalog: CatalogConfig,
    pub metrics: MetricsConfig,
}

/// Raw mirror of the whole file, every table optional
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    #[serde(default)] pub logging: LoggingConfig,
    #[serde(default)] pub monitor: MonitorStub,
    #[serde(default)] pub catalog: CatalogConfig,
    #[serde(default)] pub metrics: MetricsConfig,
}

/// Mirror of the `[logging]` table
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]                   pub enable: bool,
    #[serde(default)]                   pub file:   Option<String>,
    #[serde(default = "default_level")] pub level:  String,
}
fn default_level() -> String { "INFO".into() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { enable: false, file: None, level: default_level() }
    }
}

/// `[monitor]` as written in TOML, durations still as text
#[derive(Debug, Default, Deserialize)]
pub struct MonitorStub {
    pub channel_capacity: Option<usize>,
    pub dedup_window:     Option<String>,
    pub dedup_capacity:   Option<usize>,
    pub shutdown_timeout: Option<String>,
    pub poll_interval:    Option<String>,
    #[serde(default)] pub ignore: Vec<String>,
    #[serde(default)] pub feeds:  Vec<PathBuf>,
}

/// Fully-typed `[monitor]` table
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub channel_capacity: usize,
    pub dedup_window:     Duration,
    pub dedup_capacity:   usize,
    pub shutdown_timeout: Duration,
    pub poll_interval:    Duration,
    pub ignore:           Vec<String>,
    pub feeds:            Vec<PathBuf>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            dedup_window:     Duration::from_secs(60),
            dedup_capacity:   1024,
            shutdown_timeout: Duration::from_secs(5),
            poll_interval:    Duration::from_millis(250),
            ignore:           Vec::new(),
            feeds:            Vec::new(),
        }
    }
}

/// Mirror of the `[catalog]` table; every key has a default
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub shadow_path:    PathBuf,
    pub cron_dirs:      Vec<PathBuf>,
    pub quarantine_dir: PathBuf,
    pub bind_tools:     Vec<String>,
    pub home_root:      PathBuf,
    pub proc_root:      PathBuf,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            shadow_path:    "/etc/shadow".into(),
            cron_dirs:      vec!["/etc/cron.d".into(), "/var/spool/cron/crontabs".into()],
            quarantine_dir: "/var/lib/alertyx/quarantine".into(),
            bind_tools:     ["nc", "ncat", "netcat", "socat"].map(String::from).to_vec(),
            home_root:      "/home".into(),
            proc_root:      "/proc".into(),
        }
    }
}

/// Mirror of the `[metrics]` table
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)] pub listen: Option<SocketAddr>,
}

/// All the ways config loading can go wrong
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid duration for `{key}` '{value}': {source}")]
    InvalidDuration {
        key: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },

    #[error("invalid log level '{0}'")]
    InvalidLevel(String),

    #[error("`{0}` must be at least 1")]
    ZeroCapacity(&'static str),

    #[error("I/O error reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}
