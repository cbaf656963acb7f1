//! End-to-end collection runs against local HTTP fixtures.
//!
//! Each test wires the standard adapters to a wiremock server, runs the
//! orchestrator over a handful of targets and checks what lands in SQLite.

use anyhow::Result;
use assert_json_diff::assert_json_include;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use waitline_runtime::assemble::FacilityStatus;
use waitline_runtime::orchestrator::{Orchestrator, Outcome};
use waitline_runtime::renderer::{NavigationResult, NoopRenderer, RenderContext, Renderer};
use waitline_runtime::rules::RawTarget;
use waitline_runtime::source::{Adapters, HttpClient};
use waitline_runtime::store::{SqliteStore, TargetFile};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn target(value: serde_json::Value) -> RawTarget {
    serde_json::from_value(value).unwrap()
}

fn api_target(id: &str, url: &str) -> RawTarget {
    target(json!({
        "id": id,
        "sourceUrl": url,
        "sourceKind": "api",
        "fieldRules": {
            "estimatedWaitTime": {"dataPath": "sites[0].wait", "unit": "hours"},
            "patientsWaiting": {"dataPath": "sites[0].queue"},
            "lastUpdated": {"dataPath": "sites[0].updated", "formatCode": "iso8601"}
        }
    }))
}

fn markup_target(id: &str, url: &str) -> RawTarget {
    target(json!({
        "id": id,
        "sourceUrl": url,
        "sourceKind": "markup",
        "fieldRules": {
            "estimatedWaitTime": {"selector": "td.wait", "pattern": "(\\d+)\\s*min"},
            "patientsInTreatment": {"selectorSequence": [
                {"tag": "table", "idRegex": "^board$"},
                {"tag": "td", "nthOfType": 2}
            ]}
        }
    }))
}

fn orchestrator(store: Arc<SqliteStore>, renderer: Arc<dyn Renderer>) -> Orchestrator {
    let adapters = Adapters::standard(HttpClient::new(2_000), renderer, 5_000);
    Orchestrator::new(adapters, store).with_concurrency(4)
}

async fn api_server(wait_hours: f64, queue: u32) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/waits"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sites": [{
                "wait": wait_hours,
                "queue": queue.to_string(),
                "updated": "2025-03-01T14:30:00-05:00"
            }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/board"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"<html><body>
                <table><tr><td class="wait">Current wait: 35 min</td></tr></table>
                <table id="board"><tr><td>Treating</td><td> 12 </td></tr></table>
            </body></html>"#,
            "text/html; charset=utf-8",
        ))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_api_and_markup_sources_persist() {
    let server = api_server(1.5, 7).await;
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("status.db")).unwrap());

    let targets = vec![
        api_target("north", &format!("{}/api/waits", server.uri())),
        markup_target("south", &format!("{}/board", server.uri())),
    ];
    let summary = orchestrator(store.clone(), Arc::new(NoopRenderer))
        .run_targets(&targets)
        .await;

    assert_eq!(summary.succeeded, 2, "{:?}", summary.outcomes);
    assert_eq!(summary.failed, 0);

    let north = store.get_status("north").unwrap().unwrap();
    assert_eq!(north.estimated_wait_minutes, Some(90));
    assert_eq!(north.patients_waiting, Some(7));
    assert_eq!(
        north.last_updated,
        Some(Utc.with_ymd_and_hms(2025, 3, 1, 19, 30, 0).unwrap())
    );
    assert_eq!(north.status, FacilityStatus::Online);

    let south = store.get_status("south").unwrap().unwrap();
    assert_json_include!(
        actual: serde_json::to_value(&south).unwrap(),
        expected: json!({
            "facilityId": "south",
            "estimatedWaitMinutes": 35,
            "patientsInTreatment": 12,
            "status": "online"
        })
    );
    store.close().unwrap();
}

#[tokio::test]
async fn test_failing_target_does_not_block_others() {
    let server = api_server(0.5, 3).await;
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());

    let mut broken = api_target("broken", "https://placeholder.invalid/");
    broken.source_url = None;
    let targets = vec![
        api_target("ok", &format!("{}/api/waits", server.uri())),
        api_target("unreachable", "http://127.0.0.1:9/api/waits"),
        api_target("gone", &format!("{}/missing", server.uri())),
        broken,
    ];
    let summary = orchestrator(store.clone(), Arc::new(NoopRenderer))
        .run_targets(&targets)
        .await;

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 3);
    assert_eq!(summary.persisted_ids(), vec!["ok"]);
    assert_eq!(summary.report("unreachable").unwrap().outcome, Outcome::FetchFailed);
    assert_eq!(summary.report("gone").unwrap().outcome, Outcome::FetchFailed);
    assert_eq!(summary.report("broken").unwrap().outcome, Outcome::InvalidConfig);

    let rows = store.list_statuses().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].estimated_wait_minutes, Some(30));
}

#[tokio::test]
async fn test_second_run_overwrites_first() {
    let server = api_server(1.0, 4).await;
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let targets = vec![api_target("north", &format!("{}/api/waits", server.uri()))];
    let orch = orchestrator(store.clone(), Arc::new(NoopRenderer));

    orch.run_targets(&targets).await;
    let first = store.get_status("north").unwrap().unwrap();
    assert_eq!(first.estimated_wait_minutes, Some(60));

    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/api/waits"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sites": [{"wait": -1, "queue": "0"}]
        })))
        .mount(&server)
        .await;

    orch.run_targets(&targets).await;
    let second = store.get_status("north").unwrap().unwrap();
    assert_eq!(second.estimated_wait_minutes, None);
    assert_eq!(second.patients_waiting, Some(0));
    assert_eq!(second.last_updated, None);
    assert_eq!(second.status, FacilityStatus::Offline);
    assert!(second.updated_at >= first.updated_at);
    assert_eq!(store.list_statuses().unwrap().len(), 1);
}

#[tokio::test]
async fn test_empty_data_path_yields_no_data() {
    let server = api_server(1.0, 4).await;
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let targets = vec![target(json!({
        "id": "blank",
        "sourceUrl": format!("{}/api/waits", server.uri()),
        "sourceKind": "api",
        "fieldRules": {"estimatedWaitTime": {"dataPath": ""}}
    }))];

    let summary = orchestrator(store.clone(), Arc::new(NoopRenderer))
        .run_targets(&targets)
        .await;
    assert_eq!(summary.outcomes[0].outcome, Outcome::NoData);
    assert!(store.get_status("blank").unwrap().is_none());
}

#[tokio::test]
async fn test_targets_file_drives_run() {
    let server = api_server(0.25, 1).await;
    let dir = TempDir::new().unwrap();
    let file = TargetFile::new(dir.path().join("targets.json"));
    file.write(&[api_target("east", &format!("{}/api/waits", server.uri()))])
        .unwrap();

    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let summary = orchestrator(store.clone(), Arc::new(NoopRenderer))
        .run(&file)
        .await
        .unwrap();
    assert_eq!(summary.persisted_ids(), vec!["east"]);
    assert_eq!(
        store.get_status("east").unwrap().unwrap().estimated_wait_minutes,
        Some(15)
    );
}

#[tokio::test]
async fn test_mistyped_file_row_fails_alone() {
    let server = api_server(0.5, 2).await;
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("targets.json");
    std::fs::write(
        &path,
        serde_json::to_string(&json!([
            {
                "id": "west",
                "sourceUrl": format!("{}/api/waits", server.uri()),
                "sourceKind": "api",
                "fieldRules": {"estimatedWaitTime": {"dataPath": "sites[0].wait", "unit": "hours"}}
            },
            {"id": "typo", "sourceUrl": 12345, "sourceKind": "api"}
        ]))
        .unwrap(),
    )
    .unwrap();

    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let summary = orchestrator(store.clone(), Arc::new(NoopRenderer))
        .run(&TargetFile::new(&path))
        .await
        .unwrap();
    assert_eq!(summary.report("west").unwrap().outcome, Outcome::Persisted);
    assert_eq!(summary.report("typo").unwrap().outcome, Outcome::InvalidConfig);
    assert_eq!(
        store.get_status("west").unwrap().unwrap().estimated_wait_minutes,
        Some(30)
    );
}

struct StaticPage {
    html: &'static str,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl Renderer for StaticPage {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        Ok(Box::new(StaticTab {
            html: self.html,
            closed: Arc::clone(&self.closed),
        }))
    }
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
    fn active_contexts(&self) -> usize {
        0
    }
}

struct StaticTab {
    html: &'static str,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl RenderContext for StaticTab {
    async fn set_extra_headers(&mut self, _headers: &[(&str, &str)]) -> Result<()> {
        Ok(())
    }
    async fn navigate(&mut self, url: &str, _timeout_ms: u64) -> Result<NavigationResult> {
        Ok(NavigationResult {
            final_url: url.to_string(),
            load_time_ms: 1,
        })
    }
    async fn execute_js(&self, _script: &str) -> Result<serde_json::Value> {
        Ok(json!(true))
    }
    async fn get_html(&self) -> Result<String> {
        Ok(self.html.to_string())
    }
    async fn close(self: Box<Self>) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_rendered_source_through_renderer() {
    let closed = Arc::new(AtomicUsize::new(0));
    let renderer = Arc::new(StaticPage {
        html: r#"<div class="card"><span class="label">Wait</span>
                 <span class="value">2 hours and 5 minutes</span></div>"#,
        closed: Arc::clone(&closed),
    });
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let targets = vec![target(json!({
        "id": "dash",
        "sourceUrl": "https://dashboard.example.org/view",
        "sourceKind": "pbi_h",
        "waitForSelector": "div.card",
        "fieldRules": {
            "estimatedWaitTime": {
                "selector": "span.value",
                "pattern": "(?:(?P<hours>\\d+)\\s*hours?)?\\D*(?:(?P<minutes>\\d+)\\s*minutes?)?"
            }
        }
    }))];

    let summary = orchestrator(store.clone(), renderer).run_targets(&targets).await;
    assert_eq!(summary.succeeded, 1, "{:?}", summary.outcomes);
    assert_eq!(
        store.get_status("dash").unwrap().unwrap().estimated_wait_minutes,
        Some(125)
    );
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rendered_source_without_browser_fails_alone() {
    let server = api_server(1.0, 2).await;
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let targets = vec![
        target(json!({
            "id": "dash",
            "sourceUrl": "https://dashboard.example.org/view",
            "sourceKind": "rendered",
            "fieldRules": {"estimatedWaitTime": {"selector": "span.value"}}
        })),
        api_target("north", &format!("{}/api/waits", server.uri())),
    ];

    let summary = orchestrator(store.clone(), Arc::new(NoopRenderer))
        .run_targets(&targets)
        .await;
    assert_eq!(summary.report("dash").unwrap().outcome, Outcome::FetchFailed);
    assert_eq!(summary.report("north").unwrap().outcome, Outcome::Persisted);
}
