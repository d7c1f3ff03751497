// src/phase/timeout.rs

use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use super::{Phase, PhaseFuture, RunContext, StateCell, sleep_until_opt};
use crate::types::{PhaseState, StopReason};

pub const TIMEOUT: &str = "timeout";

/// Stops the instance once `timeout` has elapsed since this phase started.
///
/// The clock covers everything nested inside, including admission and
/// approval waits. On expiry the optional termination signal is recorded
/// for the program phase, `stop(Timeout)` is issued, and the inner phase is
/// awaited until it winds down.
pub struct TimeoutExtension {
    timeout: Duration,
    signal: Option<i32>,
    inner: Box<dyn Phase>,
    state: StateCell,
}

impl TimeoutExtension {
    pub fn new(timeout: Duration, signal: Option<i32>, inner: Box<dyn Phase>) -> Self {
        Self {
            timeout,
            signal,
            inner,
            state: StateCell::new(TIMEOUT),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn signal(&self) -> Option<i32> {
        self.signal
    }
}

impl Phase for TimeoutExtension {
    fn id(&self) -> &str {
        TIMEOUT
    }

    fn name(&self) -> &str {
        TIMEOUT
    }

    fn state(&self) -> PhaseState {
        self.state.get()
    }

    fn children(&self) -> Vec<&dyn Phase> {
        vec![self.inner.as_ref()]
    }

    fn run<'a>(&'a self, ctx: &'a RunContext) -> PhaseFuture<'a> {
        Box::pin(async move {
            self.state.set(PhaseState::Running);
            let deadline = Instant::now().checked_add(self.timeout);
            let mut inner = self.inner.run(ctx);

            let result = tokio::select! {
                result = &mut inner => result,
                _ = sleep_until_opt(deadline) => {
                    warn!(
                        instance = %ctx.instance_id(),
                        timeout = ?self.timeout,
                        "execution time limit reached"
                    );
                    if let Some(signal) = self.signal {
                        ctx.request_kill_signal(signal);
                    }
                    ctx.stop(StopReason::Timeout);
                    inner.await
                }
            };

            self.state.finish(&result);
            result
        })
    }
}
