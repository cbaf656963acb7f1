//! The collection run: every target through fetch, extract, format,
//! assemble and persist, each in isolation.
//!
//! Nothing that goes wrong with one target escapes its task. Failures
//! become a [`TargetReport`] in the [`RunSummary`]; only a target store
//! that cannot be read at all fails the run.

use crate::assemble::{assemble_record, CanonicalRecord, FormattedFields};
use crate::config::{DEFAULT_CONCURRENCY, DEFAULT_RUN_BUDGET_MS};
use crate::error::{FetchError, PersistenceError, RunError};
use crate::events::{Emitter, EventSender, RunEventKind};
use crate::extract::format_value;
use crate::rules::{RawTarget, SourceKind, TargetSpec};
use crate::source::{Adapters, RawPayload};
use crate::store::{PersistenceGateway, TargetStore};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, debug_span, info, info_span, warn, Instrument};
use uuid::Uuid;

/// How one target's processing ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Persisted,
    InvalidConfig,
    FetchFailed,
    NoData,
    PersistFailed,
    TimedOut,
}

impl Outcome {
    pub fn is_success(self) -> bool {
        self == Self::Persisted
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Persisted => "persisted",
            Self::InvalidConfig => "invalid_config",
            Self::FetchFailed => "fetch_failed",
            Self::NoData => "no_data",
            Self::PersistFailed => "persist_failed",
            Self::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetReport {
    pub facility_id: String,
    /// Absent when the target's kind could not be read.
    pub source_kind: Option<SourceKind>,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub elapsed_ms: u64,
}

/// Result of one run, in completion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub succeeded: usize,
    pub failed: usize,
    pub outcomes: Vec<TargetReport>,
}

impl RunSummary {
    /// Facilities whose row was written in this run.
    pub fn persisted_ids(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|r| r.outcome.is_success())
            .map(|r| r.facility_id.as_str())
            .collect()
    }

    pub fn report(&self, facility_id: &str) -> Option<&TargetReport> {
        self.outcomes.iter().find(|r| r.facility_id == facility_id)
    }
}

pub struct Orchestrator {
    adapters: Adapters,
    gateway: Arc<dyn PersistenceGateway>,
    concurrency: usize,
    run_budget: Duration,
    events: Option<EventSender>,
}

impl Orchestrator {
    pub fn new(adapters: Adapters, gateway: Arc<dyn PersistenceGateway>) -> Self {
        Self {
            adapters,
            gateway,
            concurrency: DEFAULT_CONCURRENCY,
            run_budget: Duration::from_millis(DEFAULT_RUN_BUDGET_MS),
            events: None,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_run_budget(mut self, budget: Duration) -> Self {
        self.run_budget = budget;
        self
    }

    pub fn with_events(mut self, tx: EventSender) -> Self {
        self.events = Some(tx);
        self
    }

    /// Load the target list from `store` and process it.
    pub async fn run(&self, store: &dyn TargetStore) -> Result<RunSummary, RunError> {
        let targets = store.list_targets()?;
        Ok(self.run_targets(&targets).await)
    }

    /// Process `targets` with bounded concurrency within the run budget.
    pub async fn run_targets(&self, targets: &[RawTarget]) -> RunSummary {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        let deadline = tokio::time::Instant::now() + self.run_budget;
        let emitter = Emitter::new(self.events.clone(), run_id);

        info!(%run_id, targets = targets.len(), "run started");
        emitter.emit(RunEventKind::RunStarted {
            targets: targets.len(),
        });

        let outcomes: Vec<TargetReport> = stream::iter(targets)
            .map(|raw| self.process_within_budget(raw, deadline, &emitter))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let succeeded = outcomes.iter().filter(|r| r.outcome.is_success()).count();
        let failed = outcomes.len() - succeeded;
        let elapsed_ms = clock.elapsed().as_millis() as u64;

        info!(%run_id, succeeded, failed, elapsed_ms, "run complete");
        emitter.emit(RunEventKind::RunCompleted {
            succeeded,
            failed,
            elapsed_ms,
        });

        RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            succeeded,
            failed,
            outcomes,
        }
    }

    async fn process_within_budget(
        &self,
        raw: &RawTarget,
        deadline: tokio::time::Instant,
        emitter: &Emitter,
    ) -> TargetReport {
        let clock = Instant::now();
        let facility_id = raw.display_id().to_string();
        let source_kind = raw
            .source_kind
            .as_deref()
            .and_then(SourceKind::parse)
            .map(|(kind, _)| kind);

        emitter.emit(RunEventKind::TargetStarted {
            facility_id: facility_id.clone(),
            source_kind,
        });

        let (outcome, detail) = if tokio::time::Instant::now() >= deadline {
            warn!(
                facility_id = facility_id.as_str(),
                "run budget exhausted before target started"
            );
            (Outcome::TimedOut, Some("run budget exhausted".to_string()))
        } else {
            self.process(raw, deadline).await
        };

        let elapsed_ms = clock.elapsed().as_millis() as u64;
        emitter.emit(RunEventKind::TargetFinished {
            facility_id: facility_id.clone(),
            outcome,
            elapsed_ms,
        });

        TargetReport {
            facility_id,
            source_kind,
            outcome,
            detail,
            elapsed_ms,
        }
    }

    async fn process(
        &self,
        raw: &RawTarget,
        deadline: tokio::time::Instant,
    ) -> (Outcome, Option<String>) {
        let target = match TargetSpec::try_from(raw) {
            Ok(target) => target,
            Err(e) => {
                warn!(facility_id = raw.display_id(), "skipping target: {e}");
                return (Outcome::InvalidConfig, Some(e.to_string()));
            }
        };

        let span = info_span!(
            "target",
            facility_id = target.id.as_str(),
            kind = target.source_kind.as_str()
        );
        self.process_target(&target, deadline).instrument(span).await
    }

    async fn process_target(
        &self,
        target: &TargetSpec,
        deadline: tokio::time::Instant,
    ) -> (Outcome, Option<String>) {
        let record = match tokio::time::timeout_at(deadline, self.collect(target)).await {
            Ok(Ok(record)) => record,
            Ok(Err(report)) => return report,
            Err(_) => {
                warn!("run budget exhausted, target abandoned");
                return (Outcome::TimedOut, Some("run budget exhausted".to_string()));
            }
        };

        // The upsert is never cut short, so the report matches the store.
        match self.persist(record).await {
            Ok(()) => {
                info!("persisted");
                (Outcome::Persisted, None)
            }
            Err(e) => {
                warn!("persist failed: {e}");
                (Outcome::PersistFailed, Some(e.to_string()))
            }
        }
    }

    /// Fetch, format and assemble; the error side is the final report.
    async fn collect(
        &self,
        target: &TargetSpec,
    ) -> Result<CanonicalRecord, (Outcome, Option<String>)> {
        let payload = match self.fetch(target).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!("fetch failed: {e}");
                return Err((Outcome::FetchFailed, Some(e.to_string())));
            }
        };

        let fields = format_fields(target, &payload);
        assemble_record(&target.id, &fields, Utc::now()).ok_or_else(|| {
            warn!("no usable data");
            (Outcome::NoData, None)
        })
    }

    async fn fetch(&self, target: &TargetSpec) -> Result<RawPayload, FetchError> {
        let adapter = self.adapters.get(target.source_kind)?;
        let limit = adapter.time_limit();
        match tokio::time::timeout(limit, adapter.fetch_raw(target)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                url: target.source_url.to_string(),
                after_ms: limit.as_millis() as u64,
            }),
        }
    }

    async fn persist(&self, record: CanonicalRecord) -> Result<(), PersistenceError> {
        let gateway = Arc::clone(&self.gateway);
        tokio::task::spawn_blocking(move || gateway.upsert(&record))
            .await
            .map_err(|e| PersistenceError::Task(e.to_string()))?
    }
}

/// Extract and format every rule of `target` against `payload`.
pub fn format_fields(target: &TargetSpec, payload: &RawPayload) -> FormattedFields {
    target
        .field_rules
        .iter()
        .map(|(field, rule)| {
            let _span = debug_span!("field", field = field.as_str()).entered();
            let raw = payload.field_text(field, rule);
            let value = format_value(raw.as_deref(), rule);
            debug!(raw = ?raw, value = ?value, "field formatted");
            (field.clone(), value)
        })
        .collect()
}
