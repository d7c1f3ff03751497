// src/phase/mod.rs

//! Composable execution phases.
//!
//! A job instance is a tree of [`Phase`]s built once by
//! [`crate::builder::PhaseTreeBuilder`]. Wrapping phases own their inner
//! phase and add behaviour around it:
//!
//! - [`program`]: runs the command (the leaf).
//! - [`dry_run`]: a leaf that terminates without running anything.
//! - [`sequence`]: runs children strictly in order.
//! - [`exclusion`], [`queue`]: concurrency-group admission.
//! - [`gate`]: approval / checkpoint barriers.
//! - [`dependency`]: skip unless another job is active.
//! - [`timeout`], [`warning`]: decorators that never change control flow
//!   on their own (timeout issues a stop request).
//!
//! All phases of one instance share a [`RunContext`].

pub mod context;
pub mod dependency;
pub mod dry_run;
pub mod exclusion;
pub mod gate;
pub mod program;
pub mod queue;
pub mod sequence;
pub mod timeout;
pub mod warning;

use std::sync::Mutex;

use tokio::time::Instant;
use tracing::debug;

use crate::coord::BoxFuture;
use crate::errors::Result;
use crate::types::{PhaseState, Termination};

pub use context::RunContext;
pub use dependency::DependencyPhase;
pub use dry_run::{DryRunPhase, DryRunStatus};
pub use exclusion::MutualExclusionGuard;
pub use gate::{ApprovalPhase, CheckpointPhase};
pub use program::ProgramPhase;
pub use queue::ExecutionQueue;
pub use sequence::SequencePhase;
pub use timeout::TimeoutExtension;
pub use warning::{OutputWarningExtension, TimeWarningExtension, WarnTime};

pub type PhaseResult = Result<Termination>;
pub type PhaseFuture<'a> = BoxFuture<'a, PhaseResult>;

/// A unit of a job's execution pipeline.
pub trait Phase: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn state(&self) -> PhaseState;

    /// Directly owned phases, in execution order.
    fn children(&self) -> Vec<&dyn Phase> {
        Vec::new()
    }

    /// Execute the phase to a terminal outcome.
    fn run<'a>(&'a self, ctx: &'a RunContext) -> PhaseFuture<'a>;
}

/// Lifecycle state holder shared by all phase implementations.
#[derive(Debug)]
pub struct StateCell {
    phase_id: String,
    state: Mutex<PhaseState>,
}

impl StateCell {
    pub fn new(phase_id: impl Into<String>) -> Self {
        Self {
            phase_id: phase_id.into(),
            state: Mutex::new(PhaseState::Created),
        }
    }

    pub fn get(&self) -> PhaseState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set(&self, new: PhaseState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != new {
            debug!(phase = %self.phase_id, from = ?*state, to = ?new, "phase transition");
            *state = new;
        }
    }

    /// Record the terminal state implied by a phase result.
    pub fn finish(&self, result: &PhaseResult) {
        match result {
            Ok(termination) => self.set(termination.phase_state()),
            Err(_) => self.set(PhaseState::Failed),
        }
    }
}

/// Flattened view of one phase in a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseSnapshot {
    pub id: String,
    pub name: String,
    pub state: PhaseState,
    pub depth: usize,
}

/// Pre-order walk of a phase tree.
pub fn walk(root: &dyn Phase) -> Vec<PhaseSnapshot> {
    let mut out = Vec::new();
    let mut stack: Vec<(&dyn Phase, usize)> = vec![(root, 0)];
    while let Some((phase, depth)) = stack.pop() {
        out.push(PhaseSnapshot {
            id: phase.id().to_string(),
            name: phase.name().to_string(),
            state: phase.state(),
            depth,
        });
        for child in phase.children().into_iter().rev() {
            stack.push((child, depth + 1));
        }
    }
    out
}

/// Sleep until `at`, or forever when there is no deadline.
pub(crate) async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Find a phase by id.
pub fn find<'a>(root: &'a dyn Phase, id: &str) -> Option<&'a dyn Phase> {
    if root.id() == id {
        return Some(root);
    }
    root.children().into_iter().find_map(|c| find(c, id))
}
