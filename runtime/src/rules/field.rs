//! Field rules: how one field is located in a payload and coerced.
//!
//! Rules arrive as loosely typed JSON ([`RawFieldRule`]) and are validated
//! once into a [`FieldRule`], so processing never branches on raw strings.

use super::selector::{RawSelectorStep, SelectorSpec};
use crate::extract::path::DataPath;
use chrono::format::{Item, StrftimeItems};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Serialized form of a field rule, as stored with a target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFieldRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector_sequence: Option<Vec<RawSelectorStep>>,
}

/// Time unit of a numeric source value. Canonical unit is minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Minutes,
    Hours,
    Seconds,
}

impl Unit {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "minutes" | "minute" | "min" | "mins" => Some(Self::Minutes),
            "hours" | "hour" | "hr" | "hrs" | "h" => Some(Self::Hours),
            "seconds" | "second" | "sec" | "secs" | "s" => Some(Self::Seconds),
            _ => None,
        }
    }

    pub fn to_minutes(self, value: f64) -> f64 {
        match self {
            Self::Minutes => value,
            Self::Hours => value * 60.0,
            Self::Seconds => value / 60.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Minutes => "minutes",
            Self::Hours => "hours",
            Self::Seconds => "seconds",
        }
    }
}

/// Datetime layout of a source value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateFormat {
    /// strftime-style layout, e.g. `%B %d, %Y %I:%M %p`.
    Strftime(String),
    /// RFC 3339 / ISO 8601 with offset.
    Rfc3339,
}

/// What the formatter does with a (possibly pattern-narrowed) raw string.
#[derive(Debug, Clone, PartialEq)]
pub enum Conversion {
    /// Parse as a timestamp and normalize to UTC.
    Timestamp(DateFormat),
    /// Strict number, converted to minutes when a unit is given.
    Quantity(Option<Unit>),
    /// Number when the text holds one, otherwise the text itself.
    Auto,
}

/// A validated field rule.
#[derive(Debug, Clone)]
pub struct FieldRule {
    pub data_path: Option<DataPath>,
    pub selector: Option<SelectorSpec>,
    pub pattern: Option<Regex>,
    pub conversion: Conversion,
}

impl FieldRule {
    /// Rule with no path, selector or pattern and automatic coercion.
    pub fn passthrough() -> Self {
        Self {
            data_path: None,
            selector: None,
            pattern: None,
            conversion: Conversion::Auto,
        }
    }

    pub fn with_path(mut self, path: &str) -> Self {
        self.data_path = Some(DataPath::parse(path));
        self
    }

    pub fn with_pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn with_conversion(mut self, conversion: Conversion) -> Self {
        self.conversion = conversion;
        self
    }

    pub fn with_selector(mut self, selector: SelectorSpec) -> Self {
        self.selector = Some(selector);
        self
    }
}

impl TryFrom<&RawFieldRule> for FieldRule {
    type Error = String;

    fn try_from(raw: &RawFieldRule) -> Result<Self, Self::Error> {
        let data_path = raw.data_path.as_deref().map(DataPath::parse);

        let pattern = match non_empty(&raw.pattern) {
            Some(p) => Some(Regex::new(p).map_err(|e| format!("invalid pattern: {e}"))?),
            None => None,
        };

        let unit = match non_empty(&raw.unit) {
            Some(tag) => Some(Unit::parse(tag).ok_or_else(|| format!("unknown unit '{tag}'"))?),
            None => None,
        };

        let conversion = match non_empty(&raw.format_code) {
            Some(code) => match parse_format_code(code)? {
                FormatCode::Date(format) => {
                    if let Some(unit) = unit {
                        tracing::warn!(
                            "unit '{}' ignored: formatCode '{code}' selects datetime parsing",
                            unit.as_str()
                        );
                    }
                    Conversion::Timestamp(format)
                }
                FormatCode::Numeric => Conversion::Quantity(unit),
            },
            None if unit.is_some() => Conversion::Quantity(unit),
            None => Conversion::Auto,
        };

        let selector = SelectorSpec::from_raw(
            non_empty(&raw.selector),
            raw.selector_sequence.as_deref(),
        )?;

        Ok(Self {
            data_path,
            selector,
            pattern,
            conversion,
        })
    }
}

enum FormatCode {
    Date(DateFormat),
    Numeric,
}

fn parse_format_code(code: &str) -> Result<FormatCode, String> {
    match code.to_ascii_lowercase().as_str() {
        "iso8601" | "iso-8601" | "rfc3339" => return Ok(FormatCode::Date(DateFormat::Rfc3339)),
        "int" | "integer" | "number" | "numeric" => return Ok(FormatCode::Numeric),
        _ => {}
    }
    if !code.contains('%') {
        return Err(format!("unknown formatCode '{code}'"));
    }
    if StrftimeItems::new(code).any(|item| matches!(item, Item::Error)) {
        return Err(format!("invalid datetime format '{code}'"));
    }
    Ok(FormatCode::Date(DateFormat::Strftime(code.to_string())))
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> RawFieldRule {
        RawFieldRule::default()
    }

    #[test]
    fn test_unit_aliases() {
        assert_eq!(Unit::parse("Hours"), Some(Unit::Hours));
        assert_eq!(Unit::parse("min"), Some(Unit::Minutes));
        assert_eq!(Unit::parse("secs"), Some(Unit::Seconds));
        assert_eq!(Unit::parse("fortnights"), None);
    }

    #[test]
    fn test_unit_multipliers() {
        assert_eq!(Unit::Hours.to_minutes(1.5), 90.0);
        assert_eq!(Unit::Minutes.to_minutes(42.0), 42.0);
        assert_eq!(Unit::Seconds.to_minutes(90.0), 1.5);
    }

    #[test]
    fn test_no_hints_is_auto() {
        let rule = FieldRule::try_from(&raw()).unwrap();
        assert_eq!(rule.conversion, Conversion::Auto);
        assert!(rule.data_path.is_none());
    }

    #[test]
    fn test_unit_selects_quantity() {
        let rule = FieldRule::try_from(&RawFieldRule {
            unit: Some("hours".into()),
            ..raw()
        })
        .unwrap();
        assert_eq!(rule.conversion, Conversion::Quantity(Some(Unit::Hours)));
    }

    #[test]
    fn test_strftime_format_selects_timestamp() {
        let rule = FieldRule::try_from(&RawFieldRule {
            format_code: Some("%Y-%m-%dT%H:%M:%SZ".into()),
            unit: Some("minutes".into()),
            ..raw()
        })
        .unwrap();
        assert_eq!(
            rule.conversion,
            Conversion::Timestamp(DateFormat::Strftime("%Y-%m-%dT%H:%M:%SZ".into()))
        );
    }

    #[test]
    fn test_named_format_codes() {
        let iso = FieldRule::try_from(&RawFieldRule {
            format_code: Some("ISO8601".into()),
            ..raw()
        })
        .unwrap();
        assert_eq!(iso.conversion, Conversion::Timestamp(DateFormat::Rfc3339));

        let int = FieldRule::try_from(&RawFieldRule {
            format_code: Some("int".into()),
            ..raw()
        })
        .unwrap();
        assert_eq!(int.conversion, Conversion::Quantity(None));
    }

    #[test]
    fn test_rejects_unknown_unit() {
        let err = FieldRule::try_from(&RawFieldRule {
            unit: Some("parsecs".into()),
            ..raw()
        })
        .unwrap_err();
        assert!(err.contains("parsecs"));
    }

    #[test]
    fn test_rejects_bad_format_and_pattern() {
        assert!(FieldRule::try_from(&RawFieldRule {
            format_code: Some("%Q-%Y".into()),
            ..raw()
        })
        .is_err());
        assert!(FieldRule::try_from(&RawFieldRule {
            format_code: Some("yyyy-mm-dd".into()),
            ..raw()
        })
        .is_err());
        assert!(FieldRule::try_from(&RawFieldRule {
            pattern: Some("(unclosed".into()),
            ..raw()
        })
        .is_err());
    }

    #[test]
    fn test_blank_strings_are_absent() {
        let rule = FieldRule::try_from(&RawFieldRule {
            pattern: Some("  ".into()),
            unit: Some(String::new()),
            ..raw()
        })
        .unwrap();
        assert!(rule.pattern.is_none());
        assert_eq!(rule.conversion, Conversion::Auto);
    }

    #[test]
    fn test_raw_rule_camel_case() {
        let rule: RawFieldRule = serde_json::from_str(
            r#"{"dataPath":"sites[0].wait","formatCode":"%H:%M","selectorSequence":[{"tag":"div"}]}"#,
        )
        .unwrap();
        assert_eq!(rule.data_path.as_deref(), Some("sites[0].wait"));
        assert_eq!(rule.format_code.as_deref(), Some("%H:%M"));
        assert_eq!(rule.selector_sequence.unwrap().len(), 1);
    }
}
