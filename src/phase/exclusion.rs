// src/phase/exclusion.rs

use tracing::info;

use super::{Phase, PhaseFuture, RunContext, StateCell};
use crate::coord::{AdmissionRequest, ConcurrencyGroup, Lane};
use crate::types::{ExclusionPolicy, PhaseState, StopReason, Termination};

pub const EXCLUSION: &str = "exclusion";

/// Ensures at most one instance of a named exclusion group runs its inner
/// phase at a time.
///
/// With [`ExclusionPolicy::Skip`] a conflicting instance ends as `Skipped`
/// without running; with [`ExclusionPolicy::Wait`] it queues FIFO behind the
/// holder.
pub struct MutualExclusionGuard {
    group: String,
    policy: ExclusionPolicy,
    inner: Box<dyn Phase>,
    state: StateCell,
}

impl MutualExclusionGuard {
    pub fn new(group: impl Into<String>, policy: ExclusionPolicy, inner: Box<dyn Phase>) -> Self {
        Self {
            group: group.into(),
            policy,
            inner,
            state: StateCell::new(EXCLUSION),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn policy(&self) -> ExclusionPolicy {
        self.policy
    }
}

impl Phase for MutualExclusionGuard {
    fn id(&self) -> &str {
        EXCLUSION
    }

    fn name(&self) -> &str {
        &self.group
    }

    fn state(&self) -> PhaseState {
        self.state.get()
    }

    fn children(&self) -> Vec<&dyn Phase> {
        vec![self.inner.as_ref()]
    }

    fn run<'a>(&'a self, ctx: &'a RunContext) -> PhaseFuture<'a> {
        Box::pin(async move {
            let request = AdmissionRequest {
                lane: Lane::Exclusion,
                group: ConcurrencyGroup::exclusive(self.group.clone()),
                instance: ctx.instance_id().clone(),
            };

            let permit = match self.policy {
                ExclusionPolicy::Skip => ctx.coordinator().try_admit(request),
                ExclusionPolicy::Wait => {
                    self.state.set(PhaseState::Waiting);
                    ctx.coordinator().admit(request, ctx.stop_signal()).await
                }
            };

            let Some(permit) = permit else {
                let result = match self.policy {
                    ExclusionPolicy::Wait => {
                        let reason = ctx.stop_signal().reason().unwrap_or(StopReason::Requested);
                        Ok(Termination::Stopped(reason))
                    }
                    ExclusionPolicy::Skip => {
                        info!(
                            instance = %ctx.instance_id(),
                            group = %self.group,
                            "exclusion group busy; skipping run"
                        );
                        Ok(Termination::Skipped {
                            reason: format!("exclusion group '{}' is held", self.group),
                        })
                    }
                };
                self.state.finish(&result);
                return result;
            };

            self.state.set(PhaseState::Running);
            let result = self.inner.run(ctx).await;
            drop(permit);
            self.state.finish(&result);
            result
        })
    }
}
