//! Path navigation into nested payloads.
//!
//! Paths are dot separated keys with optional bracketed indices, e.g.
//! `sites[0].lastUpdate`. A token made only of digits indexes a sequence;
//! anything else is a mapping key.

use serde_json::Value;
use std::fmt;
use tracing::{debug, warn};

/// One step of a [`DataPath`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(k) => f.write_str(k),
            Self::Index(i) => write!(f, "[{i}]"),
        }
    }
}

/// A tokenized path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPath {
    source: String,
    segments: Vec<PathSegment>,
}

impl DataPath {
    /// Tokenize a path expression. Splits on `.`, `[` and `]`, dropping
    /// empty tokens.
    pub fn parse(expr: &str) -> Self {
        let segments = expr
            .split(['.', '[', ']'])
            .filter(|t| !t.is_empty())
            .map(|t| {
                if t.bytes().all(|b| b.is_ascii_digit()) {
                    // Digit runs too long for usize can never be in range.
                    PathSegment::Index(t.parse().unwrap_or(usize::MAX))
                } else {
                    PathSegment::Key(t.to_string())
                }
            })
            .collect();
        Self {
            source: expr.to_string(),
            segments,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Walk `payload` along this path.
    ///
    /// Returns `None` (with a warning) on an empty path, a missing key, an
    /// out-of-range index or a step into a scalar.
    pub fn resolve<'a>(&self, payload: &'a Value) -> Option<&'a Value> {
        if self.segments.is_empty() {
            warn!("no dataPath provided");
            return None;
        }

        let mut current = payload;
        for (depth, segment) in self.segments.iter().enumerate() {
            let next = match (segment, current) {
                (PathSegment::Key(key), Value::Object(map)) => map.get(key),
                (PathSegment::Index(idx), Value::Array(items)) => items.get(*idx),
                _ => None,
            };
            match next {
                Some(value) => current = value,
                None => {
                    warn!(
                        path = %self.source,
                        step = depth,
                        "failed to extract data: '{}' not found in {}",
                        segment,
                        kind_of(current)
                    );
                    return None;
                }
            }
        }

        debug!(path = %self.source, "extracted value");
        Some(current)
    }
}

impl fmt::Display for DataPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Extract the value at `data_path` inside `payload`.
///
/// Never fails: any navigation problem is logged and yields `None`.
pub fn extract<'a>(payload: &'a Value, data_path: &str) -> Option<&'a Value> {
    DataPath::parse(data_path).resolve(payload)
}

/// Render a raw JSON value as the text handed to the formatter.
///
/// Strings lose their quotes; `null` becomes nothing; containers keep
/// their compact JSON form.
pub fn value_to_raw_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}
