//! Element selectors for markup and rendered sources.
//!
//! A field either names a CSS selector or a sequence of narrowing steps.
//! Each step searches the descendants of the previous match by tag and
//! filters them by case-insensitive class/id/text regexes, then picks the
//! n-th candidate (1-based, first by default).

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// Serialized selector step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSelectorStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nth_of_type: Option<usize>,
}

/// A validated selector step.
#[derive(Debug, Clone)]
pub struct SelectorStep {
    pub tag: Option<String>,
    pub class: Option<Regex>,
    pub id: Option<Regex>,
    pub text: Option<Regex>,
    /// 1-based position among the filtered candidates.
    pub nth: usize,
}

/// A compiled CSS selector that remembers its source text.
#[derive(Debug, Clone)]
pub struct CssSelector {
    source: String,
    compiled: scraper::Selector,
}

impl CssSelector {
    pub fn parse(source: &str) -> Result<Self, String> {
        let compiled = scraper::Selector::parse(source)
            .map_err(|e| format!("invalid CSS selector '{source}': {e:?}"))?;
        Ok(Self {
            source: source.to_string(),
            compiled,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn compiled(&self) -> &scraper::Selector {
        &self.compiled
    }
}

/// How a field's element is found in a document.
#[derive(Debug, Clone)]
pub enum SelectorSpec {
    Css(CssSelector),
    Sequence(Vec<SelectorStep>),
}

impl SelectorSpec {
    pub(crate) fn from_raw(
        css: Option<&str>,
        sequence: Option<&[RawSelectorStep]>,
    ) -> Result<Option<Self>, String> {
        match (css, sequence) {
            (Some(_), Some(_)) => Err("declare either selector or selectorSequence, not both".into()),
            (Some(css), None) => Ok(Some(Self::Css(CssSelector::parse(css)?))),
            (None, Some([])) => Err("selectorSequence is empty".into()),
            (None, Some(steps)) => steps
                .iter()
                .map(SelectorStep::try_from)
                .collect::<Result<Vec<_>, _>>()
                .map(|steps| Some(Self::Sequence(steps))),
            (None, None) => Ok(None),
        }
    }
}

impl TryFrom<&RawSelectorStep> for SelectorStep {
    type Error = String;

    fn try_from(raw: &RawSelectorStep) -> Result<Self, Self::Error> {
        if raw.nth_of_type == Some(0) {
            return Err("nthOfType is 1-based".into());
        }
        Ok(Self {
            tag: raw
                .tag
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_ascii_lowercase),
            class: compile_ci(raw.class_regex.as_deref(), "classRegex")?,
            id: compile_ci(raw.id_regex.as_deref(), "idRegex")?,
            text: compile_ci(raw.text_regex.as_deref(), "textRegex")?,
            nth: raw.nth_of_type.unwrap_or(1),
        })
    }
}

fn compile_ci(pattern: Option<&str>, what: &str) -> Result<Option<Regex>, String> {
    match pattern.filter(|p| !p.is_empty()) {
        Some(p) => RegexBuilder::new(p)
            .case_insensitive(true)
            .build()
            .map(Some)
            .map_err(|e| format!("invalid {what}: {e}")),
        None => Ok(None),
    }
}
