//! Public API for configuration

pub mod loader;
pub mod model;

// Re-export the main entrypoints:
pub use loader::{load, load_or_default, parse};
pub use model::{
    Config, ConfigError, ConsultantConfig, FilterConfig, ListenerConfig, LoggingConfig, MetricsConfig,
};
