//! Configuration module for Quarry.
//!
//! Handles compiler defaults, data sources, cache settings and environment
//! variable expansion.

mod settings;

pub use settings::{
    expand_env_vars, CacheBackend, CacheSettings, CompilerSettings, DataSourceSettings, Settings,
    SettingsError,
};
