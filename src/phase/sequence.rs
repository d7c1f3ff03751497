// src/phase/sequence.rs

use super::{Phase, PhaseFuture, RunContext, StateCell};
use crate::types::{PhaseState, Termination};

pub const SEQUENCE: &str = "sequence";

/// Runs children one after another. The first child that does not complete
/// ends the sequence with its outcome; later children never start.
pub struct SequencePhase {
    id: String,
    children: Vec<Box<dyn Phase>>,
    state: StateCell,
}

impl SequencePhase {
    pub fn new(id: impl Into<String>, children: Vec<Box<dyn Phase>>) -> Self {
        let id = id.into();
        Self {
            state: StateCell::new(id.clone()),
            id,
            children,
        }
    }
}

impl Phase for SequencePhase {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        SEQUENCE
    }

    fn state(&self) -> PhaseState {
        self.state.get()
    }

    fn children(&self) -> Vec<&dyn Phase> {
        self.children.iter().map(|c| c.as_ref()).collect()
    }

    fn run<'a>(&'a self, ctx: &'a RunContext) -> PhaseFuture<'a> {
        Box::pin(async move {
            self.state.set(PhaseState::Running);
            let mut result = Ok(Termination::Completed);
            for child in &self.children {
                if let Some(reason) = ctx.stop_signal().reason() {
                    result = Ok(Termination::Stopped(reason));
                    break;
                }
                result = child.run(ctx).await;
                if !matches!(result, Ok(Termination::Completed)) {
                    break;
                }
            }
            self.state.finish(&result);
            result
        })
    }
}
