//! Markup sources: static HTML resolved through per-field selectors.

use super::http_client::{HttpClient, BROWSER_HEADERS};
use super::{http_time_limit, selector, RawPayload, SourceAdapter};
use crate::error::FetchError;
use crate::rules::{SourceKind, TargetSpec};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

pub struct MarkupAdapter {
    http: HttpClient,
}

impl MarkupAdapter {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }
}

#[async_trait]
impl SourceAdapter for MarkupAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Markup
    }

    fn time_limit(&self) -> Duration {
        http_time_limit(&self.http)
    }

    async fn fetch_raw(&self, target: &TargetSpec) -> Result<RawPayload, FetchError> {
        let headers: &[(&str, &str)] = if target.browser_headers { BROWSER_HEADERS } else { &[] };
        let resp = self.http.get(target.source_url.as_str(), headers).await?;
        debug!(
            facility_id = target.id.as_str(),
            bytes = resp.body.len(),
            "markup page received"
        );
        Ok(RawPayload::Resolved(selector::resolve_fields(
            &resp.body,
            &target.field_rules,
        )))
    }
}
