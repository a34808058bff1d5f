//! Error taxonomy.
//!
//! Compilation errors split into metadata defects (the model is wrong),
//! request defects (the caller asked for something invalid) and dialect gaps.
//! Execution errors are passed through as they come from the driver.

use thiserror::Error;

use crate::cache::CacheError;

/// Errors raised while building the metadata model or compiling a query.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    // === Metadata and formula defects ===
    #[error("unresolvable reference '{reference}' in table '{table}': {context}")]
    UnresolvableReference {
        table: String,
        reference: String,
        context: String,
    },

    #[error("cyclic reference: {}", chain.join(" -> "))]
    CyclicReference { chain: Vec<String> },

    #[error("invalid model: {0}")]
    InvalidModel(String),

    // === Caller-request defects ===
    #[error("unknown column '{column}' on table '{table}'")]
    UnknownColumn { table: String, column: String },

    #[error("invalid argument '{argument}' for '{column}': {reason}")]
    InvalidArgument {
        column: String,
        argument: String,
        reason: String,
    },

    #[error("duplicate alias '{0}'")]
    DuplicateAlias(String),

    #[error("filter on '{column}' requires it to be grouped: {filter}")]
    UngroupedFilter { column: String, filter: String },

    #[error("operator {operator} cannot be applied to '{column}': {reason}")]
    FilterType {
        column: String,
        operator: String,
        reason: String,
    },

    #[error("cannot sort on '{0}': it is not projected")]
    UnprojectedSort(String),

    #[error("invalid sort on '{0}'")]
    InvalidSort(String),

    #[error("invalid projection on '{table}': {reason}")]
    InvalidProjection { table: String, reason: String },

    // === Dialect gaps ===
    #[error("{feature} is not supported by the {dialect} dialect")]
    UnsupportedByDialect { dialect: String, feature: String },
}

impl CompileError {
    /// Whether the error is the caller's fault (a 4xx-style validation
    /// failure) rather than a model or dialect defect.
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            CompileError::UnknownColumn { .. }
                | CompileError::InvalidArgument { .. }
                | CompileError::DuplicateAlias(_)
                | CompileError::UngroupedFilter { .. }
                | CompileError::FilterType { .. }
                | CompileError::UnprojectedSort(_)
                | CompileError::InvalidSort(_)
                | CompileError::InvalidProjection { .. }
        )
    }
}

pub type CompileResult<T> = Result<T, CompileError>;

/// Errors from running SQL against a data source.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("execution task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("unknown data source: {0}")]
    UnknownDataSource(String),

    #[error("count query returned no rows")]
    EmptyCount,

    #[error("connection for data source '{0}' is poisoned")]
    Poisoned(String),
}

pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// Errors from turning result rows into typed values.
#[derive(Debug, Error)]
pub enum HydrationError {
    #[error("result cursor already exhausted")]
    ExhaustedResult,

    #[error("invalid value for '{alias}': {reason}")]
    InvalidValue { alias: String, reason: String },

    #[error("result set has no column '{0}'")]
    MissingColumn(String),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

pub type HydrationResult<T> = Result<T, HydrationError>;

/// Anything the engine can fail with.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Hydration(#[from] HydrationError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Settings(#[from] crate::config::SettingsError),
}

pub type EngineResult<T> = Result<T, EngineError>;
