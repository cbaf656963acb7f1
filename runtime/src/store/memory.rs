//! In-memory store, used for dry runs.

use super::{PersistenceGateway, TargetStore};
use crate::assemble::CanonicalRecord;
use crate::error::{PersistenceError, StoreError};
use crate::rules::RawTarget;
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryStore {
    targets: Vec<RawTarget>,
    rows: Mutex<BTreeMap<String, CanonicalRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_targets(targets: Vec<RawTarget>) -> Self {
        Self {
            targets,
            rows: Mutex::new(BTreeMap::new()),
        }
    }

    /// Snapshot of stored rows, ordered by facility id.
    pub fn records(&self) -> Vec<CanonicalRecord> {
        self.rows
            .lock()
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, facility_id: &str) -> Option<CanonicalRecord> {
        self.rows
            .lock()
            .ok()
            .and_then(|rows| rows.get(facility_id).cloned())
    }
}

impl PersistenceGateway for MemoryStore {
    fn upsert(&self, record: &CanonicalRecord) -> Result<(), PersistenceError> {
        let mut rows = self.rows.lock().map_err(|_| PersistenceError::Poisoned)?;
        let stale = rows
            .get(&record.facility_id)
            .is_some_and(|stored| stored.updated_at > record.updated_at);
        if !stale {
            rows.insert(record.facility_id.clone(), record.clone());
        }
        Ok(())
    }
}

impl TargetStore for MemoryStore {
    fn list_targets(&self) -> Result<Vec<RawTarget>, StoreError> {
        Ok(self.targets.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::FacilityStatus;
    use chrono::{TimeZone, Utc};

    fn record(wait: i64, minute: u32) -> CanonicalRecord {
        CanonicalRecord {
            facility_id: "fac-1".into(),
            estimated_wait_minutes: Some(wait),
            patients_waiting: None,
            patients_in_treatment: None,
            last_updated: None,
            status: FacilityStatus::Online,
            updated_at: Utc.with_ymd_and_hms(2025, 1, 1, 10, minute, 0).unwrap(),
            extensions: BTreeMap::new(),
        }
    }

    #[test]
    fn test_keeps_newest_row() {
        let store = MemoryStore::new();
        store.upsert(&record(10, 1)).unwrap();
        store.upsert(&record(20, 2)).unwrap();
        store.upsert(&record(5, 0)).unwrap();
        assert_eq!(store.records().len(), 1);
        assert_eq!(store.get("fac-1").unwrap().estimated_wait_minutes, Some(20));
    }
}
