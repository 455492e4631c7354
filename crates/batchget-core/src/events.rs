//! Typed diffs pushed to the UI once per tick.

use std::sync::mpsc::Sender;

use serde::Serialize;

use crate::journal::{FileDiff, JobDiff};
use crate::model::JobId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UiEvent {
    JobChanged {
        job: JobId,
        diff: JobDiff,
    },
    FileChanged {
        job: JobId,
        name: String,
        diff: FileDiff,
    },
    /// One-shot message about a whole job, e.g. a failed resume.
    JobNotice {
        job: JobId,
        message: String,
    },
}

impl UiEvent {
    pub fn job(&self) -> JobId {
        match self {
            UiEvent::JobChanged { job, .. }
            | UiEvent::FileChanged { job, .. }
            | UiEvent::JobNotice { job, .. } => *job,
        }
    }
}

/// Optional UI channel. Sends after the receiver is gone are dropped.
#[derive(Debug, Clone, Default)]
pub struct UiSink(Option<Sender<UiEvent>>);

impl UiSink {
    pub fn new(tx: Sender<UiEvent>) -> Self {
        Self(Some(tx))
    }

    pub fn none() -> Self {
        Self(None)
    }

    pub fn send(&self, event: UiEvent) {
        if let Some(tx) = &self.0 {
            let _ = tx.send(event);
        }
    }
}
