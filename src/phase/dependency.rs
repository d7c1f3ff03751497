// src/phase/dependency.rs

use tracing::info;

use super::{Phase, PhaseFuture, RunContext, StateCell};
use crate::types::{PhaseState, Termination};

pub const DEPENDENCY: &str = "dependency";

/// Lets the run proceed only while an instance of another job is active.
/// The check is made once, when the phase starts.
pub struct DependencyPhase {
    job_id: String,
    state: StateCell,
}

impl DependencyPhase {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            state: StateCell::new(DEPENDENCY),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

impl Phase for DependencyPhase {
    fn id(&self) -> &str {
        DEPENDENCY
    }

    fn name(&self) -> &str {
        &self.job_id
    }

    fn state(&self) -> PhaseState {
        self.state.get()
    }

    fn run<'a>(&'a self, ctx: &'a RunContext) -> PhaseFuture<'a> {
        Box::pin(async move {
            self.state.set(PhaseState::Running);
            let own = ctx.instance_id();
            let satisfied = ctx
                .coordinator()
                .active_instances()
                .iter()
                .any(|id| id.job_id == self.job_id && id != own);

            let result = if satisfied {
                Ok(Termination::Completed)
            } else {
                info!(
                    instance = %own,
                    dependency = %self.job_id,
                    "dependency not running; skipping run"
                );
                Ok(Termination::Skipped {
                    reason: format!("dependency '{}' is not running", self.job_id),
                })
            };
            self.state.finish(&result);
            result
        })
    }
}
