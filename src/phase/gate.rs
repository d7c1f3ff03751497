// src/phase/gate.rs

//! Approval and checkpoint barriers.
//!
//! Both block in `Pending` until the coordinator reports their id released.
//! A stop while pending ends them as `Cancelled`; an approval's inner phase
//! never starts in that case.

use tracing::info;

use super::{Phase, PhaseFuture, RunContext, StateCell};
use crate::types::{PhaseState, StopReason, Termination};

pub const APPROVAL: &str = "approval";
pub const CHECKPOINT: &str = "checkpoint";

/// Wait for `gate_id`; `None` means the run was stopped first.
async fn pending_on(ctx: &RunContext, state: &StateCell, gate_id: &str) -> Option<StopReason> {
    state.set(PhaseState::Pending);
    info!(instance = %ctx.instance_id(), gate = %gate_id, "event=[pending]");
    if ctx.coordinator().await_release(gate_id, ctx.stop_signal()).await {
        info!(instance = %ctx.instance_id(), gate = %gate_id, "event=[released]");
        None
    } else {
        Some(ctx.stop_signal().reason().unwrap_or(StopReason::Requested))
    }
}

pub struct ApprovalPhase {
    id: String,
    name: String,
    inner: Box<dyn Phase>,
    state: StateCell,
}

impl ApprovalPhase {
    /// `id` doubles as the gate correlation id.
    pub fn new(id: impl Into<String>, name: impl Into<String>, inner: Box<dyn Phase>) -> Self {
        let id = id.into();
        Self {
            state: StateCell::new(APPROVAL),
            id,
            name: name.into(),
            inner,
        }
    }

    pub fn gate_id(&self) -> &str {
        &self.id
    }
}

impl Phase for ApprovalPhase {
    fn id(&self) -> &str {
        APPROVAL
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> PhaseState {
        self.state.get()
    }

    fn children(&self) -> Vec<&dyn Phase> {
        vec![self.inner.as_ref()]
    }

    fn run<'a>(&'a self, ctx: &'a RunContext) -> PhaseFuture<'a> {
        Box::pin(async move {
            if let Some(reason) = pending_on(ctx, &self.state, &self.id).await {
                let result = Ok(Termination::Cancelled(reason));
                self.state.finish(&result);
                return result;
            }
            self.state.set(PhaseState::Running);
            let result = self.inner.run(ctx).await;
            self.state.finish(&result);
            result
        })
    }
}

/// A barrier with no child.
pub struct CheckpointPhase {
    checkpoint_id: String,
    state: StateCell,
}

impl CheckpointPhase {
    pub fn new(checkpoint_id: impl Into<String>) -> Self {
        Self {
            checkpoint_id: checkpoint_id.into(),
            state: StateCell::new(CHECKPOINT),
        }
    }

    pub fn checkpoint_id(&self) -> &str {
        &self.checkpoint_id
    }
}

impl Phase for CheckpointPhase {
    fn id(&self) -> &str {
        CHECKPOINT
    }

    fn name(&self) -> &str {
        &self.checkpoint_id
    }

    fn state(&self) -> PhaseState {
        self.state.get()
    }

    fn run<'a>(&'a self, ctx: &'a RunContext) -> PhaseFuture<'a> {
        Box::pin(async move {
            let result = match pending_on(ctx, &self.state, &self.checkpoint_id).await {
                None => Ok(Termination::Completed),
                Some(reason) => Ok(Termination::Cancelled(reason)),
            };
            self.state.finish(&result);
            result
        })
    }
}
