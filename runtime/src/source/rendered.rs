//! Rendered sources: pages whose values only exist after scripts run.

use super::http_client::BROWSER_HEADERS;
use super::{selector, RawPayload, SourceAdapter};
use crate::error::FetchError;
use crate::renderer::{RenderContext, Renderer};
use crate::rules::{CssSelector, SourceKind, TargetSpec};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct RenderedAdapter {
    renderer: Arc<dyn Renderer>,
    render_timeout_ms: u64,
}

impl RenderedAdapter {
    pub fn new(renderer: Arc<dyn Renderer>, render_timeout_ms: u64) -> Self {
        Self {
            renderer,
            render_timeout_ms,
        }
    }

    async fn render(
        &self,
        ctx: &mut dyn RenderContext,
        target: &TargetSpec,
    ) -> Result<String, FetchError> {
        let url = target.source_url.as_str();
        let failed = |e: anyhow::Error| FetchError::Render {
            url: url.to_string(),
            reason: format!("{e:#}"),
        };

        if target.browser_headers {
            ctx.set_extra_headers(BROWSER_HEADERS).await.map_err(failed)?;
        }

        let nav = ctx
            .navigate(url, self.render_timeout_ms)
            .await
            .map_err(failed)?;
        debug!(
            facility_id = target.id.as_str(),
            final_url = nav.final_url.as_str(),
            load_time_ms = nav.load_time_ms,
            "page loaded"
        );

        if let Some(css) = &target.wait_for_selector {
            let budget = Duration::from_millis(self.render_timeout_ms)
                .saturating_sub(Duration::from_millis(nav.load_time_ms));
            if !wait_for_selector(ctx, css, budget).await {
                warn!(
                    facility_id = target.id.as_str(),
                    selector = css.as_str(),
                    "selector did not appear in time, reading page as is"
                );
            }
        }

        ctx.get_html().await.map_err(failed)
    }
}

/// Poll until `css` matches an element or `budget` runs out.
async fn wait_for_selector(ctx: &dyn RenderContext, css: &CssSelector, budget: Duration) -> bool {
    let literal = serde_json::Value::from(css.as_str()).to_string();
    let script = format!("document.querySelector({literal}) !== null");
    let deadline = Instant::now() + budget;
    loop {
        match ctx.execute_js(&script).await {
            Ok(serde_json::Value::Bool(true)) => return true,
            Ok(_) => {}
            Err(e) => debug!("selector probe failed: {e:#}"),
        }
        if Instant::now() + POLL_INTERVAL > deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[async_trait]
impl SourceAdapter for RenderedAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Rendered
    }

    fn time_limit(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms * 2)
    }

    async fn fetch_raw(&self, target: &TargetSpec) -> Result<RawPayload, FetchError> {
        let mut ctx = self
            .renderer
            .new_context()
            .await
            .map_err(|e| FetchError::Render {
                url: target.source_url.to_string(),
                reason: format!("{e:#}"),
            })?;

        // Rendering is bounded on its own so the context is always closed
        // before the adapter's time limit runs out.
        let budget = Duration::from_millis(self.render_timeout_ms);
        let rendered = match tokio::time::timeout(budget, self.render(ctx.as_mut(), target)).await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::Render {
                url: target.source_url.to_string(),
                reason: format!("page did not finish rendering within {}ms", budget.as_millis()),
            }),
        };
        let close_budget = CLOSE_TIMEOUT.min(budget / 2);
        match tokio::time::timeout(close_budget, ctx.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(facility_id = target.id.as_str(), "closing page failed: {e:#}"),
            Err(_) => warn!(facility_id = target.id.as_str(), "closing page timed out"),
        }

        let html = rendered?;
        Ok(RawPayload::Resolved(selector::resolve_fields(
            &html,
            &target.field_rules,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::{NavigationResult, NoopRenderer};
    use crate::rules::RawTarget;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Serves fixed HTML; the wait selector appears after `ready_after` probes.
    struct FakeRenderer {
        html: String,
        ready_after: usize,
        headers_seen: Arc<Mutex<Vec<String>>>,
        closed: Arc<AtomicUsize>,
        hang_on_read: bool,
    }

    struct FakeContext {
        html: String,
        ready_after: usize,
        probes: AtomicUsize,
        headers_seen: Arc<Mutex<Vec<String>>>,
        closed: Arc<AtomicUsize>,
        hang_on_read: bool,
    }

    #[async_trait]
    impl Renderer for FakeRenderer {
        async fn new_context(&self) -> anyhow::Result<Box<dyn RenderContext>> {
            Ok(Box::new(FakeContext {
                html: self.html.clone(),
                ready_after: self.ready_after,
                probes: AtomicUsize::new(0),
                headers_seen: Arc::clone(&self.headers_seen),
                closed: Arc::clone(&self.closed),
                hang_on_read: self.hang_on_read,
            }))
        }
        async fn shutdown(&self) -> anyhow::Result<()> {
            Ok(())
        }
        fn active_contexts(&self) -> usize {
            0
        }
    }

    #[async_trait]
    impl RenderContext for FakeContext {
        async fn set_extra_headers(&mut self, headers: &[(&str, &str)]) -> anyhow::Result<()> {
            let mut seen = self.headers_seen.lock().unwrap();
            seen.extend(headers.iter().map(|(k, _)| k.to_string()));
            Ok(())
        }
        async fn navigate(&mut self, url: &str, _timeout_ms: u64) -> anyhow::Result<NavigationResult> {
            Ok(NavigationResult {
                final_url: url.to_string(),
                load_time_ms: 5,
            })
        }
        async fn execute_js(&self, _script: &str) -> anyhow::Result<serde_json::Value> {
            let n = self.probes.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(serde_json::Value::Bool(n > self.ready_after))
        }
        async fn get_html(&self) -> anyhow::Result<String> {
            if self.hang_on_read {
                std::future::pending::<()>().await;
            }
            Ok(self.html.clone())
        }
        async fn close(self: Box<Self>) -> anyhow::Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn target(kind: &str) -> TargetSpec {
        let raw: RawTarget = serde_json::from_value(serde_json::json!({
            "id": "dash-1",
            "sourceUrl": "https://dash.example.org/report",
            "sourceKind": kind,
            "waitForSelector": "div.visual",
            "fieldRules": {
                "estimatedWaitTime": {"selector": "div.visual span.wait", "unit": "minutes"}
            }
        }))
        .unwrap();
        TargetSpec::try_from(&raw).unwrap()
    }

    fn fake(ready_after: usize) -> (FakeRenderer, Arc<Mutex<Vec<String>>>, Arc<AtomicUsize>) {
        let headers = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicUsize::new(0));
        let renderer = FakeRenderer {
            html: "<div class='visual'><span class='wait'>37</span></div>".into(),
            ready_after,
            headers_seen: Arc::clone(&headers),
            closed: Arc::clone(&closed),
            hang_on_read: false,
        };
        (renderer, headers, closed)
    }

    #[tokio::test]
    async fn test_resolves_fields_after_selector_appears() {
        let (renderer, headers, closed) = fake(2);
        let adapter = RenderedAdapter::new(Arc::new(renderer), 5_000);
        let payload = adapter.fetch_raw(&target("rendered")).await.unwrap();
        match payload {
            RawPayload::Resolved(fields) => {
                assert_eq!(fields["estimatedWaitTime"].as_deref(), Some("37"));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
        assert!(headers.lock().unwrap().is_empty());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_browser_headers_for_pbi_h() {
        let (renderer, headers, _) = fake(0);
        let adapter = RenderedAdapter::new(Arc::new(renderer), 5_000);
        adapter.fetch_raw(&target("pbi_h")).await.unwrap();
        let seen = headers.lock().unwrap();
        assert!(seen.iter().any(|h| h == "Accept-Language"));
    }

    #[tokio::test]
    async fn test_selector_timeout_still_reads_page() {
        let (renderer, _, closed) = fake(usize::MAX - 1);
        let adapter = RenderedAdapter::new(Arc::new(renderer), 600);
        let payload = adapter.fetch_raw(&target("pbi")).await.unwrap();
        assert!(matches!(payload, RawPayload::Resolved(_)));
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hung_page_is_still_closed() {
        let (mut renderer, _, closed) = fake(0);
        renderer.hang_on_read = true;
        let adapter = RenderedAdapter::new(Arc::new(renderer), 300);
        let result = tokio::time::timeout(adapter.time_limit(), adapter.fetch_raw(&target("rendered")))
            .await
            .expect("adapter must finish within its own time limit");
        assert!(matches!(result, Err(FetchError::Render { .. })));
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_browser_is_render_error() {
        let adapter = RenderedAdapter::new(Arc::new(NoopRenderer), 1_000);
        let err = adapter.fetch_raw(&target("rendered")).await.unwrap_err();
        assert!(matches!(err, FetchError::Render { .. }));
    }
}
