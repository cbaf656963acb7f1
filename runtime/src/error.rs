//! Error taxonomy for a collection run.
//!
//! Only errors that decide a target's outcome are values here. Path
//! navigation and coercion failures never leave the extractor/formatter:
//! they are logged and surface as a missing field.

use thiserror::Error;

/// A target definition that cannot be turned into a [`TargetSpec`].
///
/// [`TargetSpec`]: crate::rules::TargetSpec
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("target has no id")]
    MissingId,

    #[error("target {id}: missing source url")]
    MissingUrl { id: String },

    #[error("target {id}: invalid source url '{url}': {reason}")]
    InvalidUrl {
        id: String,
        url: String,
        reason: String,
    },

    #[error("target {id}: unknown source kind '{kind}'")]
    UnknownSourceKind { id: String, kind: String },

    #[error("target {id}: no field rules")]
    EmptyRules { id: String },

    #[error("target {id}: malformed definition: {reason}")]
    MalformedTarget { id: String, reason: String },

    #[error("target {id}: malformed field rules: {reason}")]
    MalformedRules { id: String, reason: String },

    #[error("target {id}, field '{field}': {reason}")]
    InvalidRule {
        id: String,
        field: String,
        reason: String,
    },
}

/// Failure acquiring the raw payload for one target.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} timed out after {after_ms}ms")]
    Timeout { url: String, after_ms: u64 },

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("rendering {url} failed: {reason}")]
    Render { url: String, reason: String },

    #[error("no adapter registered for source kind '{0}'")]
    NoAdapter(String),
}

/// Failure writing a canonical record.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("store is closed")]
    Closed,

    #[error("persistence task failed: {0}")]
    Task(String),
}

/// Failure of the target store as a whole.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("target file {path} is not valid JSON: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("store lock poisoned")]
    Poisoned,

    #[error("store is closed")]
    Closed,

    #[error("cannot store a target without an id")]
    MissingTargetId,

    #[error("row for {facility_id} is corrupt: {reason}")]
    CorruptRow { facility_id: String, reason: String },
}

/// A run that could not process any target at all.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("target store unreachable: {0}")]
    StoreUnreachable(#[from] StoreError),
}
