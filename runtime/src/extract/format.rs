//! Field formatting: raw text in, typed canonical value out.
//!
//! Evaluation order is fixed:
//! 1. nothing or blank input yields nothing;
//! 2. a pattern narrows the text to its first capture group (or the whole
//!    match), and no match yields nothing;
//! 3. a datetime conversion parses the text into a UTC timestamp;
//! 4. otherwise the text is coerced to a number and converted to minutes
//!    when the rule carries a unit;
//! 5. text that holds no number passes through unchanged, unless the rule
//!    demands a number.
//!
//! Patterns with named groups `hours`, `minutes` and/or `seconds` read a
//! composite duration such as "2 hours and 41 minutes" as total minutes.
//!
//! Failures are logged and turn into `None`; nothing here returns an error.

use super::value::FieldValue;
use crate::rules::{Conversion, DateFormat, FieldRule, Unit};
use chrono::format::{Parsed, StrftimeItems};
use chrono::{DateTime, Datelike, Local, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;
use tracing::{debug, warn};

const DURATION_GROUPS: [(&str, Unit); 3] = [
    ("hours", Unit::Hours),
    ("minutes", Unit::Minutes),
    ("seconds", Unit::Seconds),
];

/// Format one raw value according to `rule`.
pub fn format_value(raw: Option<&str>, rule: &FieldRule) -> Option<FieldValue> {
    let text = raw.map(str::trim).filter(|s| !s.is_empty())?;

    let narrowed: Cow<'_, str> = match &rule.pattern {
        Some(pattern) => {
            let Some(caps) = pattern.captures(text) else {
                debug!(pattern = pattern.as_str(), "pattern did not match '{text}'");
                return None;
            };
            if !matches!(rule.conversion, Conversion::Timestamp(_)) && has_duration_groups(pattern) {
                return duration_minutes(&caps).map(FieldValue::from_number).or_else(|| {
                    warn!(pattern = pattern.as_str(), "no duration component matched in '{text}'");
                    None
                });
            }
            let group = if pattern.captures_len() > 1 { 1 } else { 0 };
            let Some(m) = caps.get(group) else {
                debug!(pattern = pattern.as_str(), "capture group empty in '{text}'");
                return None;
            };
            Cow::Borrowed(m.as_str().trim())
        }
        None => Cow::Borrowed(text),
    };

    match &rule.conversion {
        Conversion::Timestamp(format) => match parse_timestamp(&narrowed, format) {
            Ok(ts) => Some(FieldValue::Timestamp(ts)),
            Err(reason) => {
                warn!("failed to parse datetime '{narrowed}': {reason}");
                None
            }
        },
        Conversion::Quantity(unit) => match coerce_number(&narrowed) {
            Some(n) => Some(FieldValue::from_number(to_minutes(n, *unit))),
            None => {
                warn!("expected a number, got '{narrowed}'");
                None
            }
        },
        Conversion::Auto => match coerce_number(&narrowed) {
            Some(n) => Some(FieldValue::from_number(n)),
            None => Some(FieldValue::Text(narrowed.into_owned())),
        },
    }
}

fn to_minutes(value: f64, unit: Option<Unit>) -> f64 {
    match unit {
        Some(unit) => unit.to_minutes(value),
        None => value,
    }
}

/// Keep digits, one sign before the first digit and the first decimal
/// point, then parse what is left.
pub(crate) fn coerce_number(text: &str) -> Option<f64> {
    let mut kept = String::with_capacity(text.len());
    let mut seen_digit = false;
    let mut seen_point = false;
    for c in text.chars() {
        match c {
            '0'..='9' => {
                seen_digit = true;
                kept.push(c);
            }
            '-' | '+' if kept.is_empty() => kept.push(c),
            '.' if !seen_point => {
                seen_point = true;
                kept.push(c);
            }
            _ => {}
        }
    }
    if !seen_digit {
        return None;
    }
    kept.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn has_duration_groups(pattern: &Regex) -> bool {
    pattern
        .capture_names()
        .flatten()
        .any(|name| DURATION_GROUPS.iter().any(|(g, _)| *g == name))
}

fn duration_minutes(caps: &regex::Captures<'_>) -> Option<f64> {
    let mut total = None;
    for (group, unit) in DURATION_GROUPS {
        if let Some(n) = caps.name(group).and_then(|m| coerce_number(m.as_str())) {
            total = Some(total.unwrap_or(0.0) + unit.to_minutes(n));
        }
    }
    total
}

fn parse_timestamp(text: &str, format: &DateFormat) -> Result<DateTime<Utc>, String> {
    match format {
        DateFormat::Rfc3339 => parse_iso(text.trim()),
        DateFormat::Strftime(layout) => parse_with_layout(&normalize_datetime_text(text), layout),
    }
}

fn parse_iso(text: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .map_err(|e| e.to_string())?;
    local_to_utc(naive)
}

fn parse_with_layout(text: &str, layout: &str) -> Result<DateTime<Utc>, String> {
    let mut parsed = Parsed::new();
    chrono::format::parse(&mut parsed, text, StrftimeItems::new(layout)).map_err(|e| e.to_string())?;

    // Fill components the layout cannot provide.
    let today = Utc::now().date_naive();
    let fill = |result: chrono::ParseResult<()>| result.map_err(|e| e.to_string());
    if !mentions(layout, &["%Y", "%y", "%G", "%C", "%F", "%D", "%x", "%c", "%s", "%+"]) {
        fill(parsed.set_year(i64::from(today.year())))?;
    }
    if !mentions(layout, &["%m", "%b", "%B", "%h", "%F", "%D", "%x", "%c", "%j", "%s", "%+"]) {
        fill(parsed.set_month(i64::from(today.month())))?;
    }
    if !mentions(layout, &["%d", "%e", "%F", "%D", "%x", "%c", "%j", "%s", "%+"]) {
        fill(parsed.set_day(i64::from(today.day())))?;
    }
    if !mentions(layout, &["%H", "%I", "%k", "%l", "%R", "%T", "%X", "%r", "%c", "%s", "%+"]) {
        fill(parsed.set_hour(0))?;
    }
    if !mentions(layout, &["%M", "%R", "%T", "%X", "%r", "%c", "%s", "%+"]) {
        fill(parsed.set_minute(0))?;
    }

    if let Ok(with_offset) = parsed.to_datetime() {
        return Ok(with_offset.with_timezone(&Utc));
    }
    let naive = parsed.to_naive_datetime_with_offset(0).map_err(|e| e.to_string())?;
    if layout.contains('Z') {
        Ok(Utc.from_utc_datetime(&naive))
    } else {
        local_to_utc(naive)
    }
}

fn local_to_utc(naive: NaiveDateTime) -> Result<DateTime<Utc>, String> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|ts| ts.with_timezone(&Utc))
        .ok_or_else(|| format!("{naive} does not exist in the local time zone"))
}

fn mentions(layout: &str, directives: &[&str]) -> bool {
    directives.iter().any(|d| layout.contains(d))
}

/// Clean up human-written dates before strftime parsing: drop ordinal
/// suffixes, turn `a.m.`/`p.m.` into `AM`/`PM`, collapse whitespace and
/// cap fractional seconds at nanoseconds.
fn normalize_datetime_text(text: &str) -> String {
    static ORDINAL: OnceLock<Option<Regex>> = OnceLock::new();
    static MERIDIEM: OnceLock<Option<Regex>> = OnceLock::new();
    static SPACES: OnceLock<Option<Regex>> = OnceLock::new();
    static FRACTION: OnceLock<Option<Regex>> = OnceLock::new();

    let mut out = text.trim().to_string();
    if let Some(re) = ORDINAL.get_or_init(|| Regex::new(r"(?i)(\d)(st|nd|rd|th)\b").ok()) {
        out = re.replace_all(&out, "$1").into_owned();
    }
    if let Some(re) = MERIDIEM.get_or_init(|| Regex::new(r"(?i)\b([ap])\.m\.?").ok()) {
        out = re
            .replace_all(&out, |caps: &regex::Captures<'_>| {
                format!("{}M", caps[1].to_ascii_uppercase())
            })
            .into_owned();
    }
    if let Some(re) = SPACES.get_or_init(|| Regex::new(r"\s+").ok()) {
        out = re.replace_all(&out, " ").into_owned();
    }
    if let Some(re) = FRACTION.get_or_init(|| Regex::new(r"(\.\d{9})\d+").ok()) {
        out = re.replace_all(&out, "$1").into_owned();
    }
    out
}
