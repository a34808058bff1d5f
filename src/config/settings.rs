//! TOML-based configuration for Quarry.
//!
//! Supports a config file (quarry.toml) with environment variable expansion
//! in paths.
//!
//! Example configuration:
//! ```toml
//! [compiler]
//! default_dialect = "duckdb"
//! max_resolution_depth = 64
//!
//! [data_sources.default]
//! dialect = "sqlite"
//! path = "${DATA_DIR}/stats.db"
//!
//! [data_sources.warehouse]
//! dialect = "postgres"
//!
//! [cache]
//! enabled = true
//! backend = "sqlite"
//! path = "./.quarry/cache.db"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::metadata::DEFAULT_MAX_RESOLUTION_DEPTH;
use crate::sql::Dialect;

/// `${VAR}` or `$VAR`.
static ENV_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([^}]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)").expect("env var pattern is valid")
});

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Data source not found: {0}")]
    DataSourceNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub compiler: CompilerSettings,

    /// Named data sources; tables refer to them by name.
    pub data_sources: BTreeMap<String, DataSourceSettings>,

    pub cache: CacheSettings,
}

/// Compiler configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CompilerSettings {
    /// Dialect for data sources that do not name one.
    pub default_dialect: Dialect,

    /// Limit on nested formula expansion.
    pub max_resolution_depth: usize,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            default_dialect: Dialect::default(),
            max_resolution_depth: DEFAULT_MAX_RESOLUTION_DEPTH,
        }
    }
}

/// Data source configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct DataSourceSettings {
    #[serde(default)]
    pub dialect: Option<Dialect>,

    /// Database file for SQLite sources (supports ${ENV_VAR} expansion).
    #[serde(default)]
    pub path: Option<String>,
}

impl DataSourceSettings {
    /// Get the path with environment variables expanded.
    pub fn resolved_path(&self) -> Result<Option<String>, SettingsError> {
        self.path.as_deref().map(expand_env_vars).transpose()
    }
}

/// Which cache implementation to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    Sqlite,
}

/// Result cache configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,

    pub backend: CacheBackend,

    /// Database file for the sqlite backend (supports ${ENV_VAR} expansion).
    pub path: Option<String>,
}

impl CacheSettings {
    /// Path of the sqlite cache, with environment variables expanded.
    pub fn resolved_path(&self) -> Result<String, SettingsError> {
        match &self.path {
            Some(path) => expand_env_vars(path),
            None => Err(SettingsError::InvalidConfig(
                "cache.path is required for the sqlite backend".into(),
            )),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(content)?;
        if settings.compiler.max_resolution_depth == 0 {
            return Err(SettingsError::InvalidConfig(
                "compiler.max_resolution_depth must be at least 1".into(),
            ));
        }
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `QUARRY_CONFIG`
    /// 2. `./quarry.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("QUARRY_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("quarry.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        Ok(Settings::default())
    }

    /// Get a data source by name.
    pub fn get_data_source(&self, name: &str) -> Result<&DataSourceSettings, SettingsError> {
        self.data_sources
            .get(name)
            .ok_or_else(|| SettingsError::DataSourceNotFound(name.to_string()))
    }

    /// Dialect of a data source, falling back to the compiler default.
    pub fn dialect_for(&self, data_source: &str) -> Dialect {
        self.data_sources
            .get(data_source)
            .and_then(|d| d.dialect)
            .unwrap_or(self.compiler.default_dialect)
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax. A lone `$` is kept.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut missing = None;
    let expanded = ENV_VAR.replace_all(s, |caps: &Captures| {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();
        match env::var(name) {
            Ok(value) => value,
            Err(_) => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });
    match missing {
        Some(name) => Err(SettingsError::MissingEnvVar(name)),
        None => Ok(expanded.into_owned()),
    }
}
