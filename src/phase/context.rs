// src/phase/context.rs

//! Per-instance state shared by every phase in the tree.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tracing::info;

use crate::coord::Coordinator;
use crate::output::OutputRouter;
use crate::stop::{CancellationRequester, StopSignal};
use crate::tracker::TaskTracker;
use crate::types::{InstanceId, StopReason};

/// Default time a stopped process gets between the termination signal and
/// a hard kill.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

pub struct RunContext {
    instance_id: InstanceId,
    stop: StopSignal,
    coordinator: Arc<dyn Coordinator>,
    tracker: Arc<TaskTracker>,
    output: Arc<OutputRouter>,
    kill_signal: OnceLock<i32>,
    stop_grace: Duration,
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("instance_id", &self.instance_id)
            .field("stop", &self.stop.reason())
            .field("stop_grace", &self.stop_grace)
            .finish_non_exhaustive()
    }
}

impl RunContext {
    pub fn new(
        instance_id: InstanceId,
        coordinator: Arc<dyn Coordinator>,
        tracker: Arc<TaskTracker>,
        output: Arc<OutputRouter>,
    ) -> Self {
        Self {
            instance_id,
            stop: StopSignal::new(),
            coordinator,
            tracker,
            output,
            kill_signal: OnceLock::new(),
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    pub fn coordinator(&self) -> &dyn Coordinator {
        self.coordinator.as_ref()
    }

    pub fn tracker(&self) -> &Arc<TaskTracker> {
        &self.tracker
    }

    pub fn output(&self) -> &Arc<OutputRouter> {
        &self.output
    }

    pub fn stop_grace(&self) -> Duration {
        self.stop_grace
    }

    /// Idempotent stop request; the first reason wins.
    pub fn stop(&self, reason: StopReason) -> bool {
        let first = self.stop.stop(reason);
        if first {
            info!(instance = %self.instance_id, %reason, "event=[stop_requested]");
            if reason == StopReason::Timeout {
                self.tracker.warning("timeout");
            }
        }
        first
    }

    /// Ask for `signal` to be delivered to the child process on stop instead
    /// of the default SIGTERM. Only the first request is kept.
    pub fn request_kill_signal(&self, signal: i32) {
        let _ = self.kill_signal.set(signal);
    }

    pub fn kill_signal(&self) -> Option<i32> {
        self.kill_signal.get().copied()
    }
}

impl CancellationRequester for RunContext {
    fn request_stop(&self, reason: StopReason) {
        self.stop(reason);
    }
}
