//! Declarative extraction rules: targets, field rules and selectors.
//!
//! Everything here is validated once when a target is loaded. A target
//! that fails validation is skipped for the run with a [`ConfigError`].
//!
//! [`ConfigError`]: crate::error::ConfigError

pub mod field;
pub mod selector;
pub mod target;

pub use field::{Conversion, DateFormat, FieldRule, RawFieldRule, Unit};
pub use selector::{CssSelector, RawSelectorStep, SelectorSpec, SelectorStep};
pub use target::{RawTarget, SourceKind, TargetSpec};
