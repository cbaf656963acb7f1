//! Record assembly: formatted fields to the canonical facility record.

use crate::extract::FieldValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

pub const ESTIMATED_WAIT_TIME: &str = "estimated_wait_time";
pub const PATIENTS_WAITING: &str = "patients_waiting";
pub const PATIENTS_IN_TREATMENT: &str = "patients_in_treatment";
pub const LAST_UPDATED: &str = "last_updated";

/// Formatted values keyed by the source's field names.
pub type FormattedFields = BTreeMap<String, Option<FieldValue>>;

/// Whether a facility currently publishes a wait estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacilityStatus {
    Online,
    Offline,
}

impl FacilityStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(Self::Online),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }
}

impl fmt::Display for FacilityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized status of one facility, produced once per target per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalRecord {
    pub facility_id: String,
    pub estimated_wait_minutes: Option<i64>,
    pub patients_waiting: Option<i64>,
    pub patients_in_treatment: Option<i64>,
    pub last_updated: Option<DateTime<Utc>>,
    pub status: FacilityStatus,
    pub updated_at: DateTime<Utc>,
    /// Source fields outside the canonical vocabulary.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, Option<FieldValue>>,
}

/// Map a source field name to its canonical name. Unknown names are kept.
pub fn canonical_key(source_key: &str) -> &str {
    match source_key {
        "lastUpdated" => LAST_UPDATED,
        "patientsWaiting" => PATIENTS_WAITING,
        "patientsInTreatment" => PATIENTS_IN_TREATMENT,
        "estimatedWaitTime" => ESTIMATED_WAIT_TIME,
        other => other,
    }
}

/// Build the canonical record for `facility_id`.
///
/// Returns `None` when no field produced a value. A negative wait is the
/// sources' "not available" sentinel and is stored as no wait, so the
/// facility is offline exactly when its wait is unknown.
pub fn assemble_record(
    facility_id: &str,
    fields: &FormattedFields,
    processed_at: DateTime<Utc>,
) -> Option<CanonicalRecord> {
    if fields.values().all(Option::is_none) {
        debug!(facility_id, "no usable fields");
        return None;
    }

    let mut record = CanonicalRecord {
        facility_id: facility_id.to_string(),
        estimated_wait_minutes: None,
        patients_waiting: None,
        patients_in_treatment: None,
        last_updated: None,
        status: FacilityStatus::Offline,
        updated_at: processed_at,
        extensions: BTreeMap::new(),
    };

    for (source_key, value) in fields {
        let key = canonical_key(source_key);
        match key {
            ESTIMATED_WAIT_TIME => {
                record.estimated_wait_minutes = integer_field(facility_id, key, value.as_ref())
                    .filter(|minutes| {
                        if *minutes < 0 {
                            debug!(facility_id, minutes, "wait sentinel, treating as unavailable");
                        }
                        *minutes >= 0
                    });
            }
            PATIENTS_WAITING => {
                record.patients_waiting = integer_field(facility_id, key, value.as_ref());
            }
            PATIENTS_IN_TREATMENT => {
                record.patients_in_treatment = integer_field(facility_id, key, value.as_ref());
            }
            LAST_UPDATED => {
                record.last_updated = value.as_ref().and_then(|v| {
                    let ts = v.as_timestamp();
                    if ts.is_none() {
                        warn!(facility_id, field = key, "'{v}' is not a timestamp");
                    }
                    ts
                });
            }
            other => {
                record.extensions.insert(other.to_string(), value.clone());
            }
        }
    }

    record.status = if record.estimated_wait_minutes.is_some() {
        FacilityStatus::Online
    } else {
        FacilityStatus::Offline
    };
    Some(record)
}

fn integer_field(facility_id: &str, field: &str, value: Option<&FieldValue>) -> Option<i64> {
    let value = value?;
    let n = value.as_integer();
    if n.is_none() {
        warn!(facility_id, field, "'{value}' is not a number");
    }
    n
}
