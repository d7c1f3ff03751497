// src/instance.rs

//! A single execution attempt of a job.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use crate::errors::{Result, RunError};
use crate::output::{OutputRouter, StorageSink};
use crate::phase::{Phase, PhaseSnapshot, RunContext, walk};
use crate::stop::CancellationRequester;
use crate::tracker::TaskTracker;
use crate::types::{InstanceId, PhaseState, StopReason, Termination};

/// Owns the phase tree, run context and output pipeline of one run.
///
/// An instance runs at most once. It stays registered with the coordinator
/// until it finishes or is dropped.
pub struct JobInstance {
    id: InstanceId,
    root: Box<dyn Phase>,
    ctx: Arc<RunContext>,
    params: Vec<(String, String)>,
    started: AtomicBool,
    registered: AtomicBool,
}

impl std::fmt::Debug for JobInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobInstance")
            .field("id", &self.id)
            .field("root", &self.root.id())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl JobInstance {
    /// `ctx` must belong to an id already registered with its coordinator.
    pub fn new(root: Box<dyn Phase>, ctx: RunContext, params: Vec<(String, String)>) -> Self {
        Self {
            id: ctx.instance_id().clone(),
            root,
            ctx: Arc::new(ctx),
            params,
            started: AtomicBool::new(false),
            registered: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> &InstanceId {
        &self.id
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn root(&self) -> &dyn Phase {
        self.root.as_ref()
    }

    /// State of the root phase.
    pub fn state(&self) -> PhaseState {
        self.root.state()
    }

    pub fn phases(&self) -> Vec<PhaseSnapshot> {
        walk(self.root.as_ref())
    }

    pub fn tracker(&self) -> &Arc<TaskTracker> {
        self.ctx.tracker()
    }

    pub fn output(&self) -> &Arc<OutputRouter> {
        self.ctx.output()
    }

    /// Attach an extra sink. Must be called from within a Tokio runtime.
    pub fn add_sink(&self, sink: Box<dyn StorageSink>) {
        self.ctx.output().add_sink(sink);
    }

    /// Cloneable handle for stopping the instance from elsewhere.
    pub fn handle(&self) -> InstanceHandle {
        InstanceHandle {
            ctx: Arc::clone(&self.ctx),
        }
    }

    /// Idempotent; the first reason wins.
    pub fn stop(&self, reason: StopReason) -> bool {
        self.ctx.stop(reason)
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.ctx.stop_signal().reason()
    }

    /// Run the phase tree to completion.
    pub async fn run(&self) -> Result<Termination> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(RunError::Config(format!(
                "instance {} has already been run",
                self.id
            )));
        }

        info!(
            instance = %self.id,
            root = self.root.id(),
            params = ?self.params,
            "event=[instance_started]"
        );

        let result = self.root.run(&self.ctx).await;
        self.ctx.output().close().await;
        self.unregister();

        match &result {
            Ok(termination) => info!(
                instance = %self.id,
                outcome = ?termination,
                "event=[instance_finished]"
            ),
            Err(e) => warn!(instance = %self.id, error = %e, "event=[instance_failed]"),
        }
        result
    }

    fn unregister(&self) {
        if self.registered.swap(false, Ordering::SeqCst) {
            self.ctx.coordinator().unregister_instance(&self.id);
        }
    }
}

impl Drop for JobInstance {
    fn drop(&mut self) {
        self.unregister();
    }
}

/// Stops an instance without borrowing it.
#[derive(Clone)]
pub struct InstanceHandle {
    ctx: Arc<RunContext>,
}

impl std::fmt::Debug for InstanceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceHandle")
            .field("id", self.ctx.instance_id())
            .finish()
    }
}

impl InstanceHandle {
    pub fn id(&self) -> &InstanceId {
        self.ctx.instance_id()
    }

    pub fn stop(&self, reason: StopReason) -> bool {
        self.ctx.stop(reason)
    }
}

impl CancellationRequester for InstanceHandle {
    fn request_stop(&self, reason: StopReason) {
        self.stop(reason);
    }
}
