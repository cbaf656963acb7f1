//! Payload acquisition, one adapter per source kind.
//!
//! Adapters differ only in how they obtain the payload and resolve
//! selectors. What they hand back is a [`RawPayload`], which the
//! orchestrator reads field by field the same way for every kind.

pub mod api;
pub mod http_client;
pub mod markup;
pub mod rendered;
pub mod selector;

pub use api::ApiAdapter;
pub use http_client::HttpClient;
pub use markup::MarkupAdapter;
pub use rendered::RenderedAdapter;

use crate::error::FetchError;
use crate::extract::value_to_raw_text;
use crate::renderer::Renderer;
use crate::rules::{FieldRule, SourceKind, TargetSpec};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// What an adapter obtained for one target.
#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload {
    /// Structured response body.
    Document(Value),
    /// Body that is not structured data.
    Text(String),
    /// Selector-resolved text per field.
    Resolved(BTreeMap<String, Option<String>>),
}

impl RawPayload {
    /// Raw string for `field`, before formatting.
    ///
    /// Documents are navigated with the rule's data path; a rule without a
    /// path reads the whole document. Text bodies are read whole. An empty
    /// path on either yields nothing.
    pub fn field_text(&self, field: &str, rule: &FieldRule) -> Option<String> {
        match self {
            Self::Document(doc) => match &rule.data_path {
                Some(path) => path.resolve(doc).and_then(value_to_raw_text),
                None => value_to_raw_text(doc),
            },
            Self::Text(text) => match &rule.data_path {
                Some(path) if path.is_empty() => {
                    warn!(field, "no dataPath provided");
                    None
                }
                _ => Some(text.trim().to_string()),
            },
            Self::Resolved(fields) => fields.get(field).cloned().flatten(),
        }
    }
}

/// Obtains the raw payload for a target.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Upper bound on one `fetch_raw` call, retries included.
    fn time_limit(&self) -> Duration;

    async fn fetch_raw(&self, target: &TargetSpec) -> Result<RawPayload, FetchError>;
}

/// Adapters keyed by the source kind they serve.
#[derive(Clone, Default)]
pub struct Adapters {
    by_kind: HashMap<SourceKind, Arc<dyn SourceAdapter>>,
}

impl Adapters {
    pub fn new() -> Self {
        Self::default()
    }

    /// The api, markup and rendered adapters over shared clients.
    pub fn standard(http: HttpClient, renderer: Arc<dyn Renderer>, render_timeout_ms: u64) -> Self {
        Self::new()
            .with(Arc::new(ApiAdapter::new(http.clone())))
            .with(Arc::new(MarkupAdapter::new(http)))
            .with(Arc::new(RenderedAdapter::new(renderer, render_timeout_ms)))
    }

    /// Register `adapter`, replacing any adapter of the same kind.
    pub fn with(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.by_kind.insert(adapter.kind(), adapter);
        self
    }

    pub fn get(&self, kind: SourceKind) -> Result<&Arc<dyn SourceAdapter>, FetchError> {
        self.by_kind
            .get(&kind)
            .ok_or_else(|| FetchError::NoAdapter(kind.to_string()))
    }
}

/// Time limit for adapters built on [`HttpClient`]: every attempt plus
/// retry backoff.
pub(crate) fn http_time_limit(http: &HttpClient) -> Duration {
    Duration::from_millis(http.timeout_ms() * 3 + 5_000)
}
