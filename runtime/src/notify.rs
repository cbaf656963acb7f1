//! Post-run signal to a downstream cache so it can refresh.

use crate::config::NotifyConfig;
use crate::orchestrator::RunSummary;
use crate::source::HttpClient;
use serde_json::json;
use tracing::{info, warn};

pub struct Notifier {
    http: HttpClient,
    config: NotifyConfig,
}

impl Notifier {
    pub fn new(http: HttpClient, config: NotifyConfig) -> Self {
        Self { http, config }
    }

    /// Tell the endpoint which facilities changed.
    ///
    /// Failures are logged and reported as `false`, never raised.
    pub async fn notify(&self, summary: &RunSummary) -> bool {
        let body = json!({
            "runId": summary.run_id,
            "finishedAt": summary.finished_at,
            "succeeded": summary.succeeded,
            "failed": summary.failed,
            "facilityIds": summary.persisted_ids(),
        });
        match self
            .http
            .post_json(&self.config.url, &body, self.config.secret.as_deref())
            .await
        {
            Ok(status) if (200..300).contains(&status) => {
                info!(url = self.config.url.as_str(), status, "downstream notified");
                true
            }
            Ok(status) => {
                warn!(url = self.config.url.as_str(), status, "notification rejected");
                false
            }
            Err(e) => {
                warn!(url = self.config.url.as_str(), "notification failed: {e}");
                false
            }
        }
    }
}
