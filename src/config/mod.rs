//! Public API for configuration

pub mod loader;
pub mod model;

// Re-export the main entrypoints:
pub use loader::{level_filter, load, load_or_default, parse};
pub use model::{CatalogConfig, Config, ConfigError, LoggingConfig, MetricsConfig, MonitorConfig};
