//! `waitline run`: one collection pass over every target.

use crate::cli::output;
use crate::config::RunConfig;
use crate::error::RunError;
use crate::events::{self, RunEventKind};
use crate::notify::Notifier;
use crate::orchestrator::{Orchestrator, RunSummary};
use crate::renderer::chromium::ChromiumRenderer;
use crate::renderer::{NoopRenderer, Renderer};
use crate::rules::{RawTarget, SourceKind};
use crate::source::{Adapters, HttpClient};
use crate::store::{MemoryStore, PersistenceGateway, SqliteStore, TargetFile, TargetStore};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct RunOptions {
    /// Collect and print, but keep records in memory only.
    pub dry_run: bool,
    pub no_notify: bool,
}

pub async fn run(config: &RunConfig, options: RunOptions) -> Result<()> {
    let store = Arc::new(
        SqliteStore::open(&config.db_path)
            .with_context(|| format!("cannot open database {}", config.db_path.display()))?,
    );
    let result = collect(config, &options, store.clone()).await;
    let closed = store.close();
    let summary = result?;
    closed.context("failed to close database")?;

    output::print_summary(&summary);
    Ok(())
}

async fn collect(
    config: &RunConfig,
    options: &RunOptions,
    db: Arc<SqliteStore>,
) -> Result<RunSummary> {
    let targets = match &config.targets_file {
        Some(path) => TargetFile::new(path).list_targets(),
        None => db.list_targets(),
    }
    .map_err(RunError::from)?;
    info!(targets = targets.len(), dry_run = options.dry_run, "starting run");

    let renderer = launch_renderer(config, &targets).await;
    let http = HttpClient::new(config.fetch_timeout_ms);
    let adapters = Adapters::standard(http.clone(), renderer.clone(), config.render_timeout_ms);

    let gateway: Arc<dyn PersistenceGateway> = if options.dry_run {
        Arc::new(MemoryStore::new())
    } else {
        db
    };

    let mut orchestrator = Orchestrator::new(adapters, gateway)
        .with_concurrency(config.concurrency)
        .with_run_budget(Duration::from_millis(config.run_budget_ms));

    let printer = if output::is_verbose() && !output::is_json() {
        let (tx, rx) = events::channel();
        orchestrator = orchestrator.with_events(tx);
        Some(tokio::spawn(print_events(rx)))
    } else {
        None
    };

    let summary = orchestrator.run_targets(&targets).await;
    drop(orchestrator);
    if let Some(handle) = printer {
        let _ = handle.await;
    }

    if let Err(e) = renderer.shutdown().await {
        warn!("browser shutdown failed: {e:#}");
    }

    match &config.notify {
        Some(notify) if !options.dry_run && !options.no_notify => {
            Notifier::new(http, notify.clone()).notify(&summary).await;
        }
        _ => {}
    }

    Ok(summary)
}

/// Start a browser only when some target needs one.
async fn launch_renderer(config: &RunConfig, targets: &[RawTarget]) -> Arc<dyn Renderer> {
    let needs_browser = targets.iter().any(|t| {
        t.source_kind
            .as_deref()
            .and_then(SourceKind::parse)
            .is_some_and(|(kind, _)| kind == SourceKind::Rendered)
    });
    if !needs_browser {
        return Arc::new(NoopRenderer);
    }
    match ChromiumRenderer::launch(config.chromium_path.as_deref()).await {
        Ok(renderer) => Arc::new(renderer),
        Err(e) => {
            warn!("rendered sources will fail, browser launch failed: {e:#}");
            Arc::new(NoopRenderer)
        }
    }
}

async fn print_events(mut rx: events::EventReceiver) {
    use tokio::sync::broadcast::error::RecvError;
    loop {
        match rx.recv().await {
            Ok(event) => match event.event {
                RunEventKind::RunStarted { targets } => {
                    eprintln!("  run {} started, {targets} targets", event.run_id);
                }
                RunEventKind::TargetStarted { facility_id, .. } => {
                    eprintln!("  [{:>3}] {facility_id} ...", event.seq);
                }
                RunEventKind::TargetFinished {
                    facility_id,
                    outcome,
                    elapsed_ms,
                } => {
                    eprintln!("  [{:>3}] {facility_id} {outcome} ({elapsed_ms}ms)", event.seq);
                }
                RunEventKind::RunCompleted { .. } => break,
            },
            Err(RecvError::Lagged(n)) => eprintln!("  ({n} events skipped)"),
            Err(RecvError::Closed) => break,
        }
    }
}
