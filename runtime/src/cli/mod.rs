//! CLI subcommand implementations for the `waitline` binary.

pub mod doctor;
pub mod output;
pub mod run_cmd;
pub mod status_cmd;
pub mod targets_cmd;

use crate::store::SqliteStore;
use anyhow::{Context, Result};
use std::path::Path;

/// Open the database, run `f`, and close the connection whatever `f` returned.
pub(crate) fn with_store<T>(
    db_path: &Path,
    f: impl FnOnce(&SqliteStore) -> Result<T>,
) -> Result<T> {
    let store = SqliteStore::open(db_path)
        .with_context(|| format!("cannot open database {}", db_path.display()))?;
    let result = f(&store);
    let closed = store.close();
    let value = result?;
    closed.context("failed to close database")?;
    Ok(value)
}
