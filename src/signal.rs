// src/signal.rs

//! OS signal wiring.
//!
//! Two triggers exist: SIGTERM, which stops the instance with
//! [`StopReason::Signal`], and an optional timeout signal, which stops it with
//! [`StopReason::Timeout`]. Handlers only forward a stop request to a
//! [`CancellationRequester`]; the run loop does the actual work.

use std::sync::Arc;

use tracing::warn;

use crate::errors::{Result, RunError};
use crate::stop::CancellationRequester;
use crate::types::StopReason;

#[cfg(unix)]
const NAMED_SIGNALS: &[(&str, i32)] = &[
    ("HUP", libc::SIGHUP),
    ("INT", libc::SIGINT),
    ("QUIT", libc::SIGQUIT),
    ("ABRT", libc::SIGABRT),
    ("KILL", libc::SIGKILL),
    ("USR1", libc::SIGUSR1),
    ("USR2", libc::SIGUSR2),
    ("PIPE", libc::SIGPIPE),
    ("ALRM", libc::SIGALRM),
    ("TERM", libc::SIGTERM),
    ("CHLD", libc::SIGCHLD),
    ("CONT", libc::SIGCONT),
    ("STOP", libc::SIGSTOP),
    ("TSTP", libc::SIGTSTP),
    ("WINCH", libc::SIGWINCH),
];

#[cfg(not(unix))]
const NAMED_SIGNALS: &[(&str, i32)] = &[("INT", 2), ("KILL", 9), ("TERM", 15)];

/// Parse a signal given as a number (`10`) or a name (`SIGUSR1`, `usr1`).
pub fn parse_signal(spec: &str) -> Result<i32> {
    let spec = spec.trim();
    if let Ok(number) = spec.parse::<i32>() {
        if number > 0 {
            return Ok(number);
        }
    }
    let upper = spec.to_ascii_uppercase();
    let name = upper.strip_prefix("SIG").unwrap_or(&upper);
    NAMED_SIGNALS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, number)| *number)
        .ok_or_else(|| RunError::Config(format!("unknown signal '{spec}'")))
}

/// Translates received signals into stop requests.
pub struct SignalController {
    requester: Arc<dyn CancellationRequester>,
    timeout_signal: Option<i32>,
}

impl SignalController {
    pub fn new(requester: Arc<dyn CancellationRequester>, timeout_signal: Option<i32>) -> Self {
        Self {
            requester,
            timeout_signal,
        }
    }

    pub fn timeout_signal(&self) -> Option<i32> {
        self.timeout_signal
    }

    pub fn on_terminate(&self) {
        warn!("event=[terminated_by_signal]");
        self.requester.request_stop(StopReason::Signal);
    }

    pub fn on_timeout_signal(&self) {
        warn!("event=[terminated_by_timeout_signal]");
        self.requester.request_stop(StopReason::Timeout);
    }

    /// Register the listeners. They stay active until the guard is dropped.
    ///
    /// Must be called from within a Tokio runtime.
    #[cfg(unix)]
    pub fn install(self) -> Result<SignalGuard> {
        use tokio::signal::unix::{SignalKind, signal};

        let controller = Arc::new(self);
        let mut tasks = Vec::new();

        let mut term = signal(SignalKind::terminate())?;
        let c = Arc::clone(&controller);
        tasks.push(tokio::spawn(async move {
            while term.recv().await.is_some() {
                c.on_terminate();
            }
        }));

        // SIGTERM already maps to a stop by signal.
        if let Some(number) = controller.timeout_signal.filter(|n| *n != libc::SIGTERM) {
            // SIGKILL / SIGSTOP cannot be caught but are still valid to send.
            match signal(SignalKind::from_raw(number)) {
                Ok(mut timeout) => {
                    let c = Arc::clone(&controller);
                    tasks.push(tokio::spawn(async move {
                        while timeout.recv().await.is_some() {
                            c.on_timeout_signal();
                        }
                    }));
                }
                Err(e) => warn!(signal = number, error = %e, "cannot listen for timeout signal"),
            }
        }

        Ok(SignalGuard { tasks })
    }
}

/// Aborts the listener tasks on drop.
#[derive(Debug)]
pub struct SignalGuard {
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
