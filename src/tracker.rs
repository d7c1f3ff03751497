// src/tracker.rs

//! In-memory task tracking: the latest status fields parsed from output and
//! the warnings raised while the instance runs.

use std::sync::Mutex;
use std::time::SystemTime;

use tracing::{debug, warn};

use crate::output::parser::Fields;

/// Canonical field names understood by the tracker.
pub mod field {
    pub const EVENT: &str = "event";
    pub const OPERATION: &str = "operation";
    pub const COMPLETED: &str = "completed";
    pub const TOTAL: &str = "total";
    pub const UNIT: &str = "unit";
    pub const RESULT: &str = "result";
    pub const TIMESTAMP: &str = "timestamp";
}

/// One warning raised against the task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub text: String,
    pub at: SystemTime,
}

/// Progress derived from `completed` / `total` / `unit` fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub completed: String,
    pub total: Option<String>,
    pub unit: Option<String>,
}

#[derive(Debug, Default)]
struct TrackerState {
    fields: Fields,
    events: Vec<String>,
    warnings: Vec<Warning>,
    updates: u64,
}

/// Collects status for a single job instance.
#[derive(Debug, Default)]
pub struct TaskTracker {
    state: Mutex<TrackerState>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge freshly parsed fields into the current status.
    ///
    /// An `event` field is also appended to the event history.
    pub fn update(&self, fields: &Fields) {
        if fields.is_empty() {
            return;
        }
        let mut state = self.lock();
        if let Some(event) = fields.get(field::EVENT) {
            state.events.push(event.clone());
        }
        for (k, v) in fields {
            state.fields.insert(k.clone(), v.clone());
        }
        state.updates += 1;
        debug!(?fields, "task status updated");
    }

    pub fn warning(&self, text: impl Into<String>) {
        let text = text.into();
        warn!(warning = %text, "event=[task_warning]");
        self.lock().warnings.push(Warning {
            text,
            at: SystemTime::now(),
        });
    }

    pub fn fields(&self) -> Fields {
        self.lock().fields.clone()
    }

    pub fn field(&self, name: &str) -> Option<String> {
        self.lock().fields.get(name).cloned()
    }

    pub fn events(&self) -> Vec<String> {
        self.lock().events.clone()
    }

    pub fn warnings(&self) -> Vec<Warning> {
        self.lock().warnings.clone()
    }

    pub fn warning_texts(&self) -> Vec<String> {
        self.lock().warnings.iter().map(|w| w.text.clone()).collect()
    }

    /// Number of non-empty updates received.
    pub fn update_count(&self) -> u64 {
        self.lock().updates
    }

    pub fn progress(&self) -> Option<Progress> {
        let state = self.lock();
        let completed = state.fields.get(field::COMPLETED)?.clone();
        Some(Progress {
            completed,
            total: state.fields.get(field::TOTAL).cloned(),
            unit: state.fields.get(field::UNIT).cloned(),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        // A poisoned tracker still holds valid status data.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
