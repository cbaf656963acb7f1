//! Selector resolution over a parsed HTML document.
//!
//! `scraper::Html` is not `Send`, so everything here is synchronous and the
//! document never crosses an await point.

use crate::rules::{FieldRule, SelectorSpec, SelectorStep};
use scraper::{ElementRef, Html};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Resolve every rule's selector in `html` to trimmed text.
///
/// Fields whose element cannot be found map to `None`.
pub fn resolve_fields(
    html: &str,
    rules: &BTreeMap<String, FieldRule>,
) -> BTreeMap<String, Option<String>> {
    let document = Html::parse_document(html);
    rules
        .iter()
        .map(|(field, rule)| {
            let text = match &rule.selector {
                Some(spec) => {
                    let text = resolve_text(&document, spec);
                    if text.is_none() {
                        warn!(field = field.as_str(), "no element found for field");
                    }
                    text
                }
                None => {
                    warn!(field = field.as_str(), "field has no selector");
                    None
                }
            };
            (field.clone(), text)
        })
        .collect()
}

/// Text of the element `spec` selects, or `None` if nothing matches.
pub fn resolve_text(document: &Html, spec: &SelectorSpec) -> Option<String> {
    let element = match spec {
        SelectorSpec::Css(css) => document.select(css.compiled()).next(),
        SelectorSpec::Sequence(steps) => resolve_sequence(document, steps),
    }?;
    element_text(element)
}

fn resolve_sequence<'a>(document: &'a Html, steps: &[SelectorStep]) -> Option<ElementRef<'a>> {
    let mut scope: Option<ElementRef<'a>> = None;
    for (i, step) in steps.iter().enumerate() {
        let pool: Vec<ElementRef<'a>> = match scope {
            // The first step searches the whole document, root included.
            None => document
                .root_element()
                .descendants()
                .filter_map(ElementRef::wrap)
                .collect(),
            Some(el) => el.descendants().skip(1).filter_map(ElementRef::wrap).collect(),
        };
        let candidates: Vec<ElementRef<'a>> =
            pool.into_iter().filter(|el| step_matches(step, el)).collect();

        if candidates.is_empty() {
            debug!(step = i, "no candidates at selector step");
            return None;
        }
        match candidates.get(step.nth - 1) {
            Some(el) => scope = Some(*el),
            None => {
                debug!(
                    step = i,
                    nth = step.nth,
                    found = candidates.len(),
                    "nthOfType out of range"
                );
                return None;
            }
        }
    }
    scope
}

fn step_matches(step: &SelectorStep, el: &ElementRef<'_>) -> bool {
    let value = el.value();
    if let Some(tag) = &step.tag {
        if value.name() != tag {
            return false;
        }
    }
    if let Some(re) = &step.class {
        if !value.classes().any(|c| re.is_match(c)) {
            return false;
        }
    }
    if let Some(re) = &step.id {
        if !value.id().is_some_and(|id| re.is_match(id)) {
            return false;
        }
    }
    if let Some(re) = &step.text {
        let text: String = el.text().collect();
        if !re.is_match(&text) {
            return false;
        }
    }
    true
}

/// Trimmed text nodes joined by single spaces; `None` when empty.
fn element_text(el: ElementRef<'_>) -> Option<String> {
    let text = el
        .text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
