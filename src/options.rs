// src/options.rs

//! Options describing one job run, independent of how they were collected
//! (CLI, tests, embedding code).

use std::time::Duration;

use crate::phase::DryRunStatus;
use crate::types::ExclusionPolicy;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOptions {
    pub job_id: String,
    /// Explicit run id; a UUID is generated when absent.
    pub run_id: Option<String>,
    pub command: String,
    pub args: Vec<String>,
    /// Let the child write straight to the supervisor's stdout/stderr.
    pub bypass_output: bool,

    pub exclusive: bool,
    pub exclusive_group: Option<String>,
    /// Overrides the configured exclusion policy.
    pub exclusion_policy: Option<ExclusionPolicy>,

    pub serial: bool,
    /// `0` means no limit.
    pub max_concurrent: usize,
    pub queue_group: Option<String>,

    pub approval_id: Option<String>,
    pub checkpoint_id: Option<String>,
    pub depends_on: Vec<String>,

    pub timeout: Option<Duration>,
    pub timeout_signal: Option<String>,
    pub warn_times: Vec<String>,
    pub warn_outputs: Vec<String>,

    pub kv_filter: bool,
    /// `from=to` pairs.
    pub kv_aliases: Vec<String>,
    pub field_patterns: Vec<String>,
    /// Overrides the configured tail buffer size.
    pub tail_bytes: Option<usize>,

    pub dry_run: Option<DryRunStatus>,
    /// `name=value` metadata attached to the instance.
    pub params: Vec<(String, String)>,
}

impl RunOptions {
    /// Options for running `command` with the job id derived from the
    /// command line.
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        let command = command.into();
        let job_id = default_job_id(&command, &args);
        Self {
            job_id,
            command,
            args,
            ..Self::default()
        }
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = job_id.into();
        self
    }

    pub fn exclusion_group(&self) -> Option<&str> {
        match (&self.exclusive_group, self.exclusive) {
            (Some(group), _) => Some(group),
            (None, true) => Some(&self.job_id),
            (None, false) => None,
        }
    }

    pub fn queue_group_name(&self) -> &str {
        self.queue_group.as_deref().unwrap_or(&self.job_id)
    }
}

/// `./backup.sh --full` becomes `backup.sh --full`.
pub fn default_job_id(command: &str, args: &[String]) -> String {
    let program = command.strip_prefix("./").unwrap_or(command);
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split `name=value`; the value may itself contain `=`.
pub fn parse_param(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("invalid parameter '{s}': expected name=value")),
    }
}
