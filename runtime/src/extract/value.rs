//! Typed values produced by the field formatter.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A formatted field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Decimal(f64),
    Timestamp(DateTime<Utc>),
    Text(String),
}

impl FieldValue {
    /// Value as a whole number, rounding decimals to the nearest integer.
    ///
    /// Text is parsed leniently; timestamps never convert.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            Self::Decimal(f) if f.is_finite() => Some(f.round() as i64),
            Self::Text(s) => s.trim().parse::<f64>().ok().map(|f| f.round() as i64),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(ts) => Some(*ts),
            Self::Text(s) => DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|ts| ts.with_timezone(&Utc)),
            _ => None,
        }
    }

    /// Build the numeric variant that represents `n` without loss.
    pub(crate) fn from_number(n: f64) -> Self {
        if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
            Self::Integer(n as i64)
        } else {
            Self::Decimal(n)
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(n) => write!(f, "{n}"),
            Self::Decimal(d) => write!(f, "{d}"),
            Self::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Self::Text(s) => f.write_str(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_from_number_keeps_integers_exact() {
        assert_eq!(FieldValue::from_number(90.0), FieldValue::Integer(90));
        assert_eq!(FieldValue::from_number(1.5), FieldValue::Decimal(1.5));
    }

    #[test]
    fn test_as_integer_rounds() {
        assert_eq!(FieldValue::Decimal(1.5).as_integer(), Some(2));
        assert_eq!(FieldValue::Decimal(0.4).as_integer(), Some(0));
        assert_eq!(FieldValue::Text("12".into()).as_integer(), Some(12));
        assert_eq!(FieldValue::Text("busy".into()).as_integer(), None);
    }

    #[test]
    fn test_timestamp_display_is_rfc3339_utc() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap();
        assert_eq!(FieldValue::Timestamp(ts).to_string(), "2025-01-01T10:00:00Z");
    }
}
