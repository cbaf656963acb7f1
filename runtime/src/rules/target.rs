//! Targets: one monitored facility and the rules that read its source.

use super::field::{FieldRule, RawFieldRule};
use super::selector::CssSelector;
use crate::error::ConfigError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

/// How a target's raw payload is acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Structured API response (JSON, or plain text).
    Api,
    /// Static server-rendered HTML.
    Markup,
    /// Page that needs a browser to render its content.
    Rendered,
}

impl SourceKind {
    /// Parse a kind tag, returning whether browser-like headers are implied.
    pub fn parse(tag: &str) -> Option<(Self, bool)> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "api" => Some((Self::Api, false)),
            "markup" | "html" => Some((Self::Markup, false)),
            "rendered" | "pbi" => Some((Self::Rendered, false)),
            "pbi_h" => Some((Self::Rendered, true)),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Markup => "markup",
            Self::Rendered => "rendered",
        }
    }

    /// Whether rules for this kind locate values with selectors.
    pub fn uses_selectors(self) -> bool {
        matches!(self, Self::Markup | Self::Rendered)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A target row as stored, before validation.
///
/// Accepts the legacy column names (`hospital_id`, `url`, `action`,
/// `scraping_instructions`) alongside the camelCase ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTarget {
    #[serde(
        default,
        alias = "hospital_id",
        alias = "facilityId",
        alias = "facility_id",
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(default, alias = "url", alias = "source_url", skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, alias = "action", alias = "source_kind", skip_serializing_if = "Option::is_none")]
    pub source_kind: Option<String>,
    #[serde(
        default,
        alias = "scraping_instructions",
        alias = "field_rules",
        skip_serializing_if = "Option::is_none"
    )]
    pub field_rules: Option<Value>,
    #[serde(default, alias = "wait_for_selector", skip_serializing_if = "Option::is_none")]
    pub wait_for_selector: Option<String>,
    #[serde(default, alias = "browser_headers", skip_serializing_if = "std::ops::Not::not")]
    pub browser_headers: bool,
    /// Set when the stored row did not fit this shape.
    #[serde(skip)]
    pub malformed: Option<String>,
}

impl RawTarget {
    /// Read one stored row.
    ///
    /// A row that does not fit the target shape is still returned, carrying
    /// whatever id it has and the decode error, so it fails validation on
    /// its own instead of failing the whole list.
    pub fn from_value(value: &Value) -> Self {
        match Self::deserialize(value) {
            Ok(raw) => raw,
            Err(e) => {
                let id = ["id", "facilityId", "facility_id", "hospital_id"]
                    .iter()
                    .find_map(|key| match value.get(*key) {
                        Some(Value::String(s)) => Some(s.clone()),
                        Some(Value::Number(n)) => Some(n.to_string()),
                        _ => None,
                    });
                Self {
                    id,
                    malformed: Some(e.to_string()),
                    ..Self::default()
                }
            }
        }
    }

    /// Best-effort identity for reporting, even when the row is invalid.
    pub fn display_id(&self) -> &str {
        self.id.as_deref().unwrap_or("<missing id>")
    }
}

/// A validated target, immutable for the duration of a run.
#[derive(Debug, Clone)]
pub struct TargetSpec {
    pub id: String,
    pub source_url: Url,
    pub source_kind: SourceKind,
    pub field_rules: BTreeMap<String, FieldRule>,
    /// Rendered sources only: element to wait for before reading the page.
    pub wait_for_selector: Option<CssSelector>,
    /// Send browser-like request headers.
    pub browser_headers: bool,
}

impl TryFrom<&RawTarget> for TargetSpec {
    type Error = ConfigError;

    fn try_from(raw: &RawTarget) -> Result<Self, Self::Error> {
        if let Some(reason) = &raw.malformed {
            return Err(ConfigError::MalformedTarget {
                id: raw.display_id().to_string(),
                reason: reason.clone(),
            });
        }

        let id = raw
            .id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingId)?
            .to_string();

        let url_text = raw
            .source_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::MissingUrl { id: id.clone() })?;
        let source_url = parse_source_url(&id, url_text)?;

        let kind_tag = raw.source_kind.as_deref().unwrap_or_default();
        let (source_kind, implied_headers) =
            SourceKind::parse(kind_tag).ok_or_else(|| ConfigError::UnknownSourceKind {
                id: id.clone(),
                kind: kind_tag.to_string(),
            })?;

        let raw_rules = decode_rules(&id, raw.field_rules.as_ref())?;
        if raw_rules.is_empty() {
            return Err(ConfigError::EmptyRules { id });
        }

        let mut field_rules = BTreeMap::new();
        for (field, raw_rule) in &raw_rules {
            let rule = FieldRule::try_from(raw_rule).map_err(|reason| ConfigError::InvalidRule {
                id: id.clone(),
                field: field.clone(),
                reason,
            })?;
            if source_kind.uses_selectors() && rule.selector.is_none() {
                return Err(ConfigError::InvalidRule {
                    id: id.clone(),
                    field: field.clone(),
                    reason: format!("{source_kind} sources need a selector or selectorSequence"),
                });
            }
            field_rules.insert(field.clone(), rule);
        }

        let wait_for_selector = match raw.wait_for_selector.as_deref().filter(|s| !s.is_empty()) {
            Some(css) => Some(CssSelector::parse(css).map_err(|reason| ConfigError::InvalidRule {
                id: id.clone(),
                field: "waitForSelector".to_string(),
                reason,
            })?),
            None => None,
        };

        Ok(Self {
            id,
            source_url,
            source_kind,
            field_rules,
            wait_for_selector,
            browser_headers: raw.browser_headers || implied_headers,
        })
    }
}

fn parse_source_url(id: &str, text: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidUrl {
        id: id.to_string(),
        url: text.to_string(),
        reason,
    };
    let url = Url::parse(text).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(invalid(format!("unsupported scheme '{other}'"))),
    }
}

/// Field rules may be stored as a JSON object or as a JSON-encoded string.
fn decode_rules(
    id: &str,
    value: Option<&Value>,
) -> Result<BTreeMap<String, RawFieldRule>, ConfigError> {
    let malformed = |reason: String| ConfigError::MalformedRules {
        id: id.to_string(),
        reason,
    };
    match value {
        None | Some(Value::Null) => Ok(BTreeMap::new()),
        Some(Value::String(text)) => {
            let parsed: Value = serde_json::from_str(text).map_err(|e| malformed(e.to_string()))?;
            decode_rules(id, Some(&parsed))
        }
        Some(other) => serde_json::from_value(other.clone()).map_err(|e| malformed(e.to_string())),
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a string or number id, got {other}"
        ))),
    }
}
