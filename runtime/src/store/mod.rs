//! Persistence: canonical rows out, target definitions in.

pub mod file;
pub mod memory;
pub mod sqlite;

pub use file::TargetFile;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::assemble::CanonicalRecord;
use crate::error::{PersistenceError, StoreError};
use crate::rules::RawTarget;
use chrono::{DateTime, SecondsFormat, Utc};

/// Idempotent write of canonical records, keyed by facility id.
///
/// A write never replaces a row whose `updated_at` is newer than the
/// record's, so replays and late writers cannot roll a facility back.
/// Implementations must be safe to call from several tasks at once.
pub trait PersistenceGateway: Send + Sync {
    fn upsert(&self, record: &CanonicalRecord) -> Result<(), PersistenceError>;
}

/// Source of target definitions for a run.
pub trait TargetStore: Send + Sync {
    /// All targets, unvalidated. An empty list is not an error.
    fn list_targets(&self) -> Result<Vec<RawTarget>, StoreError>;
}

/// Fixed-width UTC timestamp, so stored values order lexically.
pub(crate) fn db_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_db_timestamp(text: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp '{text}': {e}"))
}
