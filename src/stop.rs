// src/stop.rs

//! Cooperative cancellation shared by every phase of one instance.

use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

use crate::types::StopReason;

/// First-reason-wins stop flag.
///
/// [`StopSignal::stop`] never blocks, so it is safe to call from signal
/// listeners. Blocking points race their wait against [`StopSignal::stopped`].
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<StopReason>>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. Returns `true` only for the call that recorded the
    /// reason; later calls are no-ops.
    pub fn stop(&self, reason: StopReason) -> bool {
        let first = self.reason.set(reason).is_ok();
        if first {
            self.token.cancel();
        }
        first
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<StopReason> {
        self.reason.get().copied()
    }

    /// Resolves once a stop has been requested, yielding the recorded reason.
    pub async fn stopped(&self) -> StopReason {
        self.token.cancelled().await;
        // The reason is stored before the token is cancelled.
        self.reason().unwrap_or(StopReason::Requested)
    }
}

/// Anything that accepts a cooperative stop request.
///
/// The OS signal layer only depends on this trait, so tests can substitute a
/// recording implementation.
pub trait CancellationRequester: Send + Sync {
    fn request_stop(&self, reason: StopReason);
}

impl CancellationRequester for StopSignal {
    fn request_stop(&self, reason: StopReason) {
        self.stop(reason);
    }
}
