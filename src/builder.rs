// src/builder.rs

//! Turns [`RunOptions`] into a phase tree.
//!
//! Wrapping order, innermost first:
//!
//! ```text
//! program | dry run
//!   -> exclusion guard         (exclusive / exclusive_group)
//!   -> execution queue         (serial / max_concurrent)
//!   -> [checkpoint, inner]     (checkpoint_id)
//!   -> [dependency.., inner]   (depends_on)
//!   -> approval                (approval_id)
//!   -> timeout                 (timeout > 0)
//!   -> time warning            (warn_times)
//!   -> output warning          (warn_outputs, all patterns must compile)
//! ```

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::coord::ConcurrencyGroup;
use crate::errors::{Result, RunError};
use crate::options::RunOptions;
use crate::output::parser::{iso_date_time, parse_aliases};
use crate::output::{KvParser, OutputParser, RegexFieldParser};
use crate::phase::{
    ApprovalPhase, CheckpointPhase, DependencyPhase, DryRunPhase, ExecutionQueue,
    MutualExclusionGuard, OutputWarningExtension, Phase, ProgramPhase, SequencePhase,
    TimeWarningExtension, TimeoutExtension, WarnTime,
};
use crate::signal::parse_signal;
use crate::tracker::field;
use crate::types::ExclusionPolicy;

/// Value characters stripped by the key/value parser.
pub const KV_TRIM: &str = ",";

pub struct PhaseTreeBuilder<'a> {
    opts: &'a RunOptions,
    default_policy: ExclusionPolicy,
}

impl<'a> PhaseTreeBuilder<'a> {
    pub fn new(opts: &'a RunOptions) -> Self {
        Self {
            opts,
            default_policy: ExclusionPolicy::default(),
        }
    }

    /// Policy used when the options don't name one.
    pub fn with_exclusion_policy(mut self, policy: ExclusionPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    /// Validate the options and assemble the tree.
    ///
    /// Conflicting or invalid options fail here, before anything runs.
    pub fn build(self) -> Result<Box<dyn Phase>> {
        let opts = self.opts;

        if opts.serial && opts.max_concurrent > 0 {
            return Err(RunError::Config(
                "serial and max_concurrent are mutually exclusive".to_string(),
            ));
        }
        let timeout_signal = opts
            .timeout_signal
            .as_deref()
            .map(parse_signal)
            .transpose()?;
        let warn_times = opts
            .warn_times
            .iter()
            .map(|s| WarnTime::parse(s).map_err(RunError::Config))
            .collect::<Result<Vec<_>>>()?;

        let mut phase: Box<dyn Phase> = match opts.dry_run {
            Some(status) => Box::new(DryRunPhase::new(opts.command.clone(), status)),
            None => Box::new(
                ProgramPhase::new(opts.command.clone(), opts.args.clone())
                    .with_capture(!opts.bypass_output),
            ),
        };

        if let Some(group) = opts.exclusion_group() {
            let policy = opts.exclusion_policy.unwrap_or(self.default_policy);
            phase = Box::new(MutualExclusionGuard::new(group, policy, phase));
        }

        if opts.serial || opts.max_concurrent > 0 {
            let limit = if opts.serial { 1 } else { opts.max_concurrent };
            let group = ConcurrencyGroup::new(opts.queue_group_name(), limit);
            phase = Box::new(ExecutionQueue::new(group, phase));
        }

        if let Some(checkpoint) = &opts.checkpoint_id {
            phase = Box::new(SequencePhase::new(
                "checkpoint_sequence",
                vec![
                    Box::new(CheckpointPhase::new(checkpoint.clone())) as Box<dyn Phase>,
                    phase,
                ],
            ));
        }

        if !opts.depends_on.is_empty() {
            let mut children: Vec<Box<dyn Phase>> = opts
                .depends_on
                .iter()
                .map(|job| Box::new(DependencyPhase::new(job.clone())) as Box<dyn Phase>)
                .collect();
            children.push(phase);
            phase = Box::new(SequencePhase::new("dependency_sequence", children));
        }

        if let Some(approval) = &opts.approval_id {
            phase = Box::new(ApprovalPhase::new(approval.clone(), approval.clone(), phase));
        }

        if let Some(timeout) = opts.timeout.filter(|t| !t.is_zero()) {
            phase = Box::new(TimeoutExtension::new(timeout, timeout_signal, phase));
        }

        if !warn_times.is_empty() {
            phase = Box::new(TimeWarningExtension::new(warn_times, phase));
        }

        if !opts.warn_outputs.is_empty() {
            match OutputWarningExtension::compile(&opts.warn_outputs) {
                Ok(patterns) => {
                    phase = Box::new(OutputWarningExtension::from_compiled(patterns, phase));
                }
                Err(e) => {
                    warn!(job = %opts.job_id, error = %e, "output warnings disabled");
                }
            }
        }

        debug!(job = %opts.job_id, root = phase.id(), "phase tree built");
        Ok(phase)
    }
}

/// Output parsers requested by the options.
///
/// A field pattern that does not compile is an error.
pub fn build_parsers(opts: &RunOptions) -> Result<Vec<Box<dyn OutputParser>>> {
    let mut parsers: Vec<Box<dyn OutputParser>> = Vec::new();

    if opts.kv_filter {
        let aliases: HashMap<String, String> = parse_aliases(&opts.kv_aliases);
        parsers.push(Box::new(
            KvParser::new()
                .with_trim_value(KV_TRIM)
                .with_aliases(aliases)
                .with_post_processor(iso_date_time(field::TIMESTAMP)),
        ));
    }

    for pattern in &opts.field_patterns {
        parsers.push(Box::new(RegexFieldParser::new(pattern)?));
    }

    Ok(parsers)
}
