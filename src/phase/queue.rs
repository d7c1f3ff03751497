// src/phase/queue.rs

use super::{Phase, PhaseFuture, RunContext, StateCell};
use crate::coord::{AdmissionRequest, ConcurrencyGroup, Lane};
use crate::types::{PhaseState, StopReason, Termination};

pub const QUEUE: &str = "queue";

/// Admits the inner phase through a named concurrency group.
///
/// The phase sits in `Waiting` until the coordinator grants a slot. A stop
/// while waiting ends it as `Stopped` and the inner phase never starts.
pub struct ExecutionQueue {
    group: ConcurrencyGroup,
    inner: Box<dyn Phase>,
    state: StateCell,
}

impl ExecutionQueue {
    pub fn new(group: ConcurrencyGroup, inner: Box<dyn Phase>) -> Self {
        Self {
            group,
            inner,
            state: StateCell::new(QUEUE),
        }
    }

    pub fn group(&self) -> &ConcurrencyGroup {
        &self.group
    }
}

impl Phase for ExecutionQueue {
    fn id(&self) -> &str {
        QUEUE
    }

    fn name(&self) -> &str {
        &self.group.name
    }

    fn state(&self) -> PhaseState {
        self.state.get()
    }

    fn children(&self) -> Vec<&dyn Phase> {
        vec![self.inner.as_ref()]
    }

    fn run<'a>(&'a self, ctx: &'a RunContext) -> PhaseFuture<'a> {
        Box::pin(async move {
            self.state.set(PhaseState::Waiting);
            let request = AdmissionRequest {
                lane: Lane::Queue,
                group: self.group.clone(),
                instance: ctx.instance_id().clone(),
            };

            let Some(permit) = ctx.coordinator().admit(request, ctx.stop_signal()).await else {
                let reason = ctx.stop_signal().reason().unwrap_or(StopReason::Requested);
                let result = Ok(Termination::Stopped(reason));
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
