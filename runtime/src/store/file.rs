//! Target definitions kept in a JSON file.

use super::TargetStore;
use crate::error::StoreError;
use crate::rules::RawTarget;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// A JSON array of target definitions.
pub struct TargetFile {
    path: PathBuf,
}

impl TargetFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<Vec<RawTarget>, StoreError> {
        let text = std::fs::read_to_string(&self.path).map_err(|source| StoreError::Io {
            path: self.path.display().to_string(),
            source,
        })?;
        let rows: Vec<Value> = serde_json::from_str(&text).map_err(|source| StoreError::Json {
            path: self.path.display().to_string(),
            source,
        })?;
        Ok(rows.iter().map(RawTarget::from_value).collect())
    }

    /// Write `targets` as pretty-printed JSON, replacing the file.
    pub fn write(&self, targets: &[RawTarget]) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(targets).map_err(|source| StoreError::Json {
            path: self.path.display().to_string(),
            source,
        })?;
        std::fs::write(&self.path, json + "\n").map_err(|source| StoreError::Io {
            path: self.path.display().to_string(),
            source,
        })
    }
}

impl TargetStore for TargetFile {
    fn list_targets(&self) -> Result<Vec<RawTarget>, StoreError> {
        self.read()
    }
}
