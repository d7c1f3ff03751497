// src/phase/dry_run.rs

//! Leaf phase that ends with a predetermined outcome without spawning
//! anything. Lets the coordination around a job be exercised safely.

use clap::ValueEnum;
use tracing::info;

use super::program::PROGRAM;
use super::{Phase, PhaseFuture, RunContext, StateCell};
use crate::errors::RunError;
use crate::types::{PhaseState, StopReason, Termination};

/// Outcome a dry run pretends the program had.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum DryRunStatus {
    #[default]
    Completed,
    Failed,
    Stopped,
    Skipped,
}

pub struct DryRunPhase {
    command: String,
    status: DryRunStatus,
    state: StateCell,
}

impl DryRunPhase {
    pub fn new(command: impl Into<String>, status: DryRunStatus) -> Self {
        Self {
            command: command.into(),
            status,
            state: StateCell::new(PROGRAM),
        }
    }

    pub fn status(&self) -> DryRunStatus {
        self.status
    }
}

impl Phase for DryRunPhase {
    fn id(&self) -> &str {
        PROGRAM
    }

    fn name(&self) -> &str {
        &self.command
    }

    fn state(&self) -> PhaseState {
        self.state.get()
    }

    fn run<'a>(&'a self, ctx: &'a RunContext) -> PhaseFuture<'a> {
        Box::pin(async move {
            if let Some(reason) = ctx.stop_signal().reason() {
                self.state.set(PhaseState::Stopped);
                return Ok(Termination::Stopped(reason));
            }
            self.state.set(PhaseState::Running);
            info!(
                instance = %ctx.instance_id(),
                command = %self.command,
                status = ?self.status,
                "dry run; command not executed"
            );
            let result = match self.status {
                DryRunStatus::Completed => Ok(Termination::Completed),
                DryRunStatus::Failed => Err(RunError::ProgramExecution { code: 1 }),
                DryRunStatus::Stopped => Ok(Termination::Stopped(StopReason::Requested)),
                DryRunStatus::Skipped => Ok(Termination::Skipped {
                    reason: "dry run".to_string(),
                }),
            };
            self.state.finish(&result);
            result
        })
    }
}
