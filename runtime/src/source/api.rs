//! Api sources: the response body is read as JSON, or as text.

use super::http_client::{HttpClient, BROWSER_HEADERS};
use super::{http_time_limit, RawPayload, SourceAdapter};
use crate::error::FetchError;
use crate::rules::{SourceKind, TargetSpec};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

pub struct ApiAdapter {
    http: HttpClient,
}

impl ApiAdapter {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }
}

#[async_trait]
impl SourceAdapter for ApiAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Api
    }

    fn time_limit(&self) -> Duration {
        http_time_limit(&self.http)
    }

    async fn fetch_raw(&self, target: &TargetSpec) -> Result<RawPayload, FetchError> {
        let headers: &[(&str, &str)] = if target.browser_headers { BROWSER_HEADERS } else { &[] };
        let resp = self.http.get(target.source_url.as_str(), headers).await?;
        debug!(
            facility_id = target.id.as_str(),
            final_url = resp.final_url.as_str(),
            bytes = resp.body.len(),
            "api response received"
        );
        Ok(decode_body(resp.content_type.as_deref(), &resp.body))
    }
}

/// JSON when declared so or when the body looks like it; text otherwise.
pub fn decode_body(content_type: Option<&str>, body: &str) -> RawPayload {
    let trimmed = body.trim();
    let declared_json = content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("json"));
    if declared_json || trimmed.starts_with('{') || trimmed.starts_with('[') {
        match serde_json::from_str(trimmed) {
            Ok(doc) => return RawPayload::Document(doc),
            Err(e) => warn!("body is not valid JSON, reading it as text: {e}"),
        }
    }
    RawPayload::Text(trimmed.to_string())
}
