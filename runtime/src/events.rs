// Copyright 2026 Waitline Contributors
// SPDX-License-Identifier: Apache-2.0

//! Run events and the broadcast channel that carries them.
//!
//! The orchestrator emits `RunEvent`s while it works through the target
//! list. Any number of listeners (progress printer, tests) may subscribe;
//! when nobody listens, events are silently dropped.

use crate::orchestrator::Outcome;
use crate::rules::SourceKind;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// An event emitted during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_id: Uuid,
    /// Monotonically increasing within a run.
    pub seq: u64,
    pub event: RunEventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RunEventKind {
    RunStarted { targets: usize },
    TargetStarted {
        facility_id: String,
        source_kind: Option<SourceKind>,
    },
    TargetFinished {
        facility_id: String,
        outcome: Outcome,
        elapsed_ms: u64,
    },
    RunCompleted {
        succeeded: usize,
        failed: usize,
        elapsed_ms: u64,
    },
}

pub type EventSender = tokio::sync::broadcast::Sender<RunEvent>;
pub type EventReceiver = tokio::sync::broadcast::Receiver<RunEvent>;

/// Create a run-event channel with a bounded buffer.
pub fn channel() -> (EventSender, EventReceiver) {
    tokio::sync::broadcast::channel(256)
}

/// Stamps events with the run id and sequence number before sending.
pub(crate) struct Emitter {
    tx: Option<EventSender>,
    run_id: Uuid,
    seq: AtomicU64,
}

impl Emitter {
    pub(crate) fn new(tx: Option<EventSender>, run_id: Uuid) -> Self {
        Self {
            tx,
            run_id,
            seq: AtomicU64::new(0),
        }
    }

    /// Send errors only mean nobody is listening, so they are ignored.
    pub(crate) fn emit(&self, event: RunEventKind) {
        if let Some(sender) = &self.tx {
            let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
            let _ = sender.send(RunEvent {
                run_id: self.run_id,
                seq,
                event,
            });
        }
    }
}
