// src/types.rs

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Why an instance was cooperatively cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopReason {
    /// Termination signal (SIGTERM) received by the supervisor.
    Signal,
    /// Deadline expired or the timeout signal was received.
    Timeout,
    /// Stop requested through the API.
    Requested,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::Signal => "signal",
            StopReason::Timeout => "timeout",
            StopReason::Requested => "requested",
        };
        f.write_str(s)
    }
}

/// Lifecycle state of a single phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseState {
    Created,
    /// Blocked on an approval or checkpoint.
    Pending,
    /// Blocked on concurrency-group admission.
    Waiting,
    Running,
    Completed,
    Failed,
    Stopped,
    Skipped,
    Cancelled,
}

impl PhaseState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PhaseState::Completed
                | PhaseState::Failed
                | PhaseState::Stopped
                | PhaseState::Skipped
                | PhaseState::Cancelled
        )
    }
}

/// Non-error terminal outcome of a phase (or a whole run).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    Completed,
    Skipped { reason: String },
    /// Stopped while running or while waiting for admission.
    Stopped(StopReason),
    /// Stopped while pending on an approval or checkpoint.
    Cancelled(StopReason),
}

impl Termination {
    /// The phase state a phase ends in when it terminates this way.
    pub fn phase_state(&self) -> PhaseState {
        match self {
            Termination::Completed => PhaseState::Completed,
            Termination::Skipped { .. } => PhaseState::Skipped,
            Termination::Stopped(_) => PhaseState::Stopped,
            Termination::Cancelled(_) => PhaseState::Cancelled,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Termination::Completed)
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        match self {
            Termination::Stopped(r) | Termination::Cancelled(r) => Some(*r),
            _ => None,
        }
    }

    /// Exit status reported by the CLI for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self.stop_reason() {
            None => 0,
            Some(StopReason::Signal) => 143,
            Some(StopReason::Timeout) => 124,
            Some(StopReason::Requested) => 1,
        }
    }
}

/// Uniquely names one execution attempt of a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId {
    pub job_id: String,
    pub run_id: String,
}

impl InstanceId {
    pub fn new(job_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            run_id: run_id.into(),
        }
    }

    /// Same job, run id replaced.
    pub fn with_run_id(&self, run_id: impl Into<String>) -> Self {
        Self::new(self.job_id.clone(), run_id)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.job_id, self.run_id)
    }
}

/// Make an id usable as a single path component.
pub fn path_component(component: &str) -> String {
    let cleaned: String = component
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

/// What a mutual-exclusion guard does when its group is already held.
///
/// - `Skip`: terminate the run as skipped without executing (default).
/// - `Wait`: wait in FIFO order until the holder finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExclusionPolicy {
    #[default]
    Skip,
    Wait,
}

impl FromStr for ExclusionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "skip" => Ok(ExclusionPolicy::Skip),
            "wait" => Ok(ExclusionPolicy::Wait),
            other => Err(format!(
                "invalid exclusion_policy: {other} (expected \"skip\" or \"wait\")"
            )),
        }
    }
}

/// Storage format used for the per-instance output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Raw lines.
    #[default]
    Text,
    /// One JSON object per line.
    Jsonl,
    /// No file storage.
    None,
}
