//! SQLite store for facility status rows and target definitions.
//!
//! One connection behind a mutex serializes writers. The connection is
//! released by an explicit [`SqliteStore::close`]; later calls fail with
//! a `Closed` error instead of reopening.

use super::{db_timestamp, parse_db_timestamp, PersistenceGateway, TargetStore};
use crate::assemble::{CanonicalRecord, FacilityStatus};
use crate::error::{PersistenceError, StoreError};
use crate::extract::FieldValue;
use crate::rules::RawTarget;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

const STATUS_COLUMNS: &str = "facility_id, estimated_wait_minutes, patients_waiting, \
     patients_in_treatment, last_updated, status, extensions, updated_at";

const UPSERT_STATUS: &str = r#"
    INSERT INTO facility_status (
        facility_id, estimated_wait_minutes, patients_waiting,
        patients_in_treatment, last_updated, status, extensions, updated_at
    )
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
    ON CONFLICT(facility_id) DO UPDATE SET
        estimated_wait_minutes = excluded.estimated_wait_minutes,
        patients_waiting = excluded.patients_waiting,
        patients_in_treatment = excluded.patients_in_treatment,
        last_updated = excluded.last_updated,
        status = excluded.status,
        extensions = excluded.extensions,
        updated_at = excluded.updated_at
    WHERE excluded.updated_at >= facility_status.updated_at
"#;

pub struct SqliteStore {
    conn: Mutex<Option<Connection>>,
}

impl SqliteStore {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        debug!(path = %path.display(), "store opened");
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS facility_status (
                facility_id TEXT PRIMARY KEY,
                estimated_wait_minutes INTEGER,
                patients_waiting INTEGER,
                patients_in_treatment INTEGER,
                last_updated TEXT,
                status TEXT NOT NULL,
                extensions TEXT,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS scraping_targets (
                facility_id TEXT PRIMARY KEY,
                source_url TEXT,
                source_kind TEXT,
                field_rules TEXT,
                wait_for_selector TEXT,
                browser_headers INTEGER NOT NULL DEFAULT 0
            );

            PRAGMA journal_mode = WAL;
            "#,
        )
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let guard = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;
        f(conn)
    }

    /// Persisted row for one facility.
    pub fn get_status(&self, facility_id: &str) -> Result<Option<CanonicalRecord>, StoreError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {STATUS_COLUMNS} FROM facility_status WHERE facility_id = ?1"),
                    params![facility_id],
                    StatusRow::read,
                )
                .optional()?;
            row.map(StatusRow::into_record).transpose()
        })
    }

    /// Every persisted row, ordered by facility id.
    pub fn list_statuses(&self) -> Result<Vec<CanonicalRecord>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {STATUS_COLUMNS} FROM facility_status ORDER BY facility_id"
            ))?;
            let rows = stmt
                .query_map([], StatusRow::read)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(StatusRow::into_record).collect()
        })
    }

    /// Insert or replace a target definition.
    pub fn put_target(&self, target: &RawTarget) -> Result<(), StoreError> {
        let id = target
            .id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(StoreError::MissingTargetId)?;
        let rules = match &target.field_rules {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) => Some(text.clone()),
            Some(other) => Some(other.to_string()),
        };
        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO scraping_targets (
                    facility_id, source_url, source_kind, field_rules,
                    wait_for_selector, browser_headers
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(facility_id) DO UPDATE SET
                    source_url = excluded.source_url,
                    source_kind = excluded.source_kind,
                    field_rules = excluded.field_rules,
                    wait_for_selector = excluded.wait_for_selector,
                    browser_headers = excluded.browser_headers
                "#,
                params![
                    id,
                    target.source_url,
                    target.source_kind,
                    rules,
                    target.wait_for_selector,
                    target.browser_headers,
                ],
            )?;
            Ok(())
        })
    }

    /// Release the connection. Calling it again is a no-op.
    pub fn close(&self) -> Result<(), StoreError> {
        let mut guard = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        match guard.take() {
            Some(conn) => {
                conn.close().map_err(|(_, e)| StoreError::Database(e))?;
                debug!("store closed");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl PersistenceGateway for SqliteStore {
    fn upsert(&self, record: &CanonicalRecord) -> Result<(), PersistenceError> {
        let extensions = if record.extensions.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&record.extensions)?)
        };

        let guard = self.conn.lock().map_err(|_| PersistenceError::Poisoned)?;
        let conn = guard.as_ref().ok_or(PersistenceError::Closed)?;
        let changed = conn.execute(
            UPSERT_STATUS,
            params![
                record.facility_id,
                record.estimated_wait_minutes,
                record.patients_waiting,
                record.patients_in_treatment,
                record.last_updated.as_ref().map(db_timestamp),
                record.status.as_str(),
                extensions,
                db_timestamp(&record.updated_at),
            ],
        )?;
        if changed == 0 {
            debug!(
                facility_id = record.facility_id.as_str(),
                "stored row is newer, write skipped"
            );
        }
        Ok(())
    }
}

impl TargetStore for SqliteStore {
    fn list_targets(&self) -> Result<Vec<RawTarget>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT facility_id, source_url, source_kind, field_rules, \
                 wait_for_selector, browser_headers \
                 FROM scraping_targets ORDER BY facility_id",
            )?;
            let targets = stmt
                .query_map([], target_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(targets)
        })
    }
}

const TARGET_COLUMNS: [&str; 6] = [
    "facilityId",
    "sourceUrl",
    "sourceKind",
    "fieldRules",
    "waitForSelector",
    "browserHeaders",
];

/// Map a target row through JSON so a mistyped column fails that target only.
fn target_row(row: &Row<'_>) -> rusqlite::Result<RawTarget> {
    let mut object = serde_json::Map::new();
    for (idx, name) in TARGET_COLUMNS.iter().enumerate() {
        let value = match row.get_ref(idx)? {
            ValueRef::Null => continue,
            ValueRef::Integer(n) if *name == "browserHeaders" => Value::Bool(n != 0),
            ValueRef::Integer(n) => Value::from(n),
            ValueRef::Real(f) => Value::from(f),
            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                Value::String(String::from_utf8_lossy(bytes).into_owned())
            }
        };
        object.insert((*name).to_string(), value);
    }
    Ok(RawTarget::from_value(&Value::Object(object)))
}

struct StatusRow {
    facility_id: String,
    estimated_wait_minutes: Option<i64>,
    patients_waiting: Option<i64>,
    patients_in_treatment: Option<i64>,
    last_updated: Option<String>,
    status: String,
    extensions: Option<String>,
    updated_at: String,
}

impl StatusRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            facility_id: row.get(0)?,
            estimated_wait_minutes: row.get(1)?,
            patients_waiting: row.get(2)?,
            patients_in_treatment: row.get(3)?,
            last_updated: row.get(4)?,
            status: row.get(5)?,
            extensions: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_record(self) -> Result<CanonicalRecord, StoreError> {
        let corrupt = |reason: String| StoreError::CorruptRow {
            facility_id: self.facility_id.clone(),
            reason,
        };
        let status = FacilityStatus::parse(&self.status)
            .ok_or_else(|| corrupt(format!("unknown status '{}'", self.status)))?;
        let last_updated = self
            .last_updated
            .as_deref()
            .map(parse_db_timestamp)
            .transpose()
            .map_err(corrupt)?;
        let updated_at = parse_db_timestamp(&self.updated_at).map_err(corrupt)?;
        let extensions: BTreeMap<String, Option<FieldValue>> = match self.extensions.as_deref() {
            Some(text) => serde_json::from_str(text).map_err(|e| corrupt(e.to_string()))?,
            None => BTreeMap::new(),
        };
        Ok(CanonicalRecord {
            facility_id: self.facility_id,
            estimated_wait_minutes: self.estimated_wait_minutes,
            patients_waiting: self.patients_waiting,
            patients_in_treatment: self.patients_in_treatment,
            last_updated,
            status,
            updated_at,
            extensions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::TargetSpec;
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;

    fn record(id: &str, wait: Option<i64>, at: DateTime<Utc>) -> CanonicalRecord {
        CanonicalRecord {
            facility_id: id.to_string(),
            estimated_wait_minutes: wait,
            patients_waiting: Some(4),
            patients_in_treatment: None,
            last_updated: Some(Utc.with_ymd_and_hms(2025, 1, 1, 9, 58, 0).unwrap()),
            status: if wait.is_some() {
                FacilityStatus::Online
            } else {
                FacilityStatus::Offline
            },
            updated_at: at,
            extensions: BTreeMap::new(),
        }
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 10, minute, 0).unwrap()
    }

    #[test]
    fn test_upsert_last_write_wins() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert(&record("fac-1", Some(30), at(0))).unwrap();
        store.upsert(&record("fac-1", Some(55), at(5))).unwrap();

        let rows = store.list_statuses().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].estimated_wait_minutes, Some(55));
        assert_eq!(rows[0].updated_at, at(5));
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        let rec = record("fac-1", Some(30), at(0));
        store.upsert(&rec).unwrap();
        store.upsert(&rec).unwrap();
        assert_eq!(store.get_status("fac-1").unwrap(), Some(rec));
        assert_eq!(store.list_statuses().unwrap().len(), 1);
    }

    #[test]
    fn test_older_write_does_not_roll_back() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert(&record("fac-1", Some(55), at(5))).unwrap();
        store.upsert(&record("fac-1", Some(30), at(0))).unwrap();
        let row = store.get_status("fac-1").unwrap().unwrap();
        assert_eq!(row.estimated_wait_minutes, Some(55));
    }

    #[test]
    fn test_extensions_round_trip_through_json_column() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut rec = record("fac-2", None, at(1));
        rec.extensions
            .insert("triage".into(), Some(FieldValue::Text("amber".into())));
        store.upsert(&rec).unwrap();
        let row = store.get_status("fac-2").unwrap().unwrap();
        assert_eq!(row.status, FacilityStatus::Offline);
        assert_eq!(row.extensions, rec.extensions);
        assert!(store.get_status("missing").unwrap().is_none());
    }

    #[test]
    fn test_targets_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let raw: RawTarget = serde_json::from_value(json!({
            "id": "fac-3",
            "sourceUrl": "https://er.example.org/wait.json",
            "sourceKind": "api",
            "fieldRules": {"estimatedWaitTime": {"dataPath": "wait"}}
        }))
        .unwrap();
        store.put_target(&raw).unwrap();

        let listed = store.list_targets().unwrap();
        assert_eq!(listed.len(), 1);
        let spec = TargetSpec::try_from(&listed[0]).unwrap();
        assert_eq!(spec.id, "fac-3");
        assert!(spec.field_rules.contains_key("estimatedWaitTime"));

        let nameless = RawTarget::default();
        assert!(matches!(
            store.put_target(&nameless),
            Err(StoreError::MissingTargetId)
        ));
    }

    #[test]
    fn test_mistyped_target_row_stays_listed() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .put_target(&RawTarget::from_value(&json!({
                "id": "good",
                "sourceUrl": "https://er.example.org/wait.json",
                "sourceKind": "api",
                "fieldRules": {"estimatedWaitTime": {"dataPath": "wait"}}
            })))
            .unwrap();
        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO scraping_targets (facility_id, source_url, source_kind, browser_headers) \
                     VALUES ('odd', 'https://odd.example.org/', 'api', 'yes')",
                    [],
                )?;
                Ok(())
            })
            .unwrap();

        let listed = store.list_targets().unwrap();
        assert_eq!(listed.len(), 2);
        assert!(TargetSpec::try_from(&listed[0]).is_ok());
        assert_eq!(listed[1].id.as_deref(), Some("odd"));
        assert!(listed[1].malformed.is_some());
    }

    #[test]
    fn test_close_is_final() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("nested/waitline.db")).unwrap();
        store.upsert(&record("fac-1", Some(1), at(0))).unwrap();
        store.close().unwrap();
        store.close().unwrap();
        assert!(matches!(store.list_targets(), Err(StoreError::Closed)));
        assert!(matches!(
            store.upsert(&record("fac-1", Some(2), at(1))),
            Err(PersistenceError::Closed)
        ));

        let reopened = SqliteStore::open(dir.path().join("nested/waitline.db")).unwrap();
        assert_eq!(
            reopened.get_status("fac-1").unwrap().unwrap().estimated_wait_minutes,
            Some(1)
        );
    }
}
