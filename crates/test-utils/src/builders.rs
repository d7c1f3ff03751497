#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use runjob::coord::Coordinator;
use runjob::environment::Settings;
use runjob::options::RunOptions;
use runjob::output::OutputRouter;
use runjob::phase::{DryRunStatus, RunContext};
use runjob::tracker::TaskTracker;
use runjob::types::{ExclusionPolicy, InstanceId};

/// Builder for `RunOptions` to simplify test setup.
pub struct RunOptionsBuilder {
    opts: RunOptions,
}

impl RunOptionsBuilder {
    /// Options running `sh -c <script>` under `job_id`.
    pub fn shell(job_id: &str, script: &str) -> Self {
        Self::command("sh", &["-c", script]).job_id(job_id)
    }

    pub fn command(command: &str, args: &[&str]) -> Self {
        Self {
            opts: RunOptions::new(command, args.iter().map(|a| a.to_string()).collect()),
        }
    }

    /// Options for a dry run that ends with `status`.
    pub fn dry_run(job_id: &str, status: DryRunStatus) -> Self {
        let mut builder = Self::command("true", &[]).job_id(job_id);
        builder.opts.dry_run = Some(status);
        builder
    }

    pub fn job_id(mut self, job_id: &str) -> Self {
        self.opts.job_id = job_id.to_string();
        self
    }

    pub fn run_id(mut self, run_id: &str) -> Self {
        self.opts.run_id = Some(run_id.to_string());
        self
    }

    pub fn exclusive(mut self, policy: ExclusionPolicy) -> Self {
        self.opts.exclusive = true;
        self.opts.exclusion_policy = Some(policy);
        self
    }

    pub fn serial(mut self) -> Self {
        self.opts.serial = true;
        self
    }

    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.opts.max_concurrent = n;
        self
    }

    pub fn queue_group(mut self, group: &str) -> Self {
        self.opts.queue_group = Some(group.to_string());
        self
    }

    pub fn approval(mut self, id: &str) -> Self {
        self.opts.approval_id = Some(id.to_string());
        self
    }

    pub fn checkpoint(mut self, id: &str) -> Self {
        self.opts.checkpoint_id = Some(id.to_string());
        self
    }

    pub fn depends_on(mut self, job: &str) -> Self {
        self.opts.depends_on.push(job.to_string());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.opts.timeout = Some(timeout);
        self
    }

    pub fn timeout_signal(mut self, signal: &str) -> Self {
        self.opts.timeout_signal = Some(signal.to_string());
        self
    }

    pub fn warn_time(mut self, time: &str) -> Self {
        self.opts.warn_times.push(time.to_string());
        self
    }

    pub fn warn_output(mut self, pattern: &str) -> Self {
        self.opts.warn_outputs.push(pattern.to_string());
        self
    }

    pub fn kv_filter(mut self) -> Self {
        self.opts.kv_filter = true;
        self
    }

    pub fn kv_alias(mut self, alias: &str) -> Self {
        self.opts.kv_aliases.push(alias.to_string());
        self
    }

    pub fn field_pattern(mut self, pattern: &str) -> Self {
        self.opts.field_patterns.push(pattern.to_string());
        self
    }

    pub fn tail_bytes(mut self, n: usize) -> Self {
        self.opts.tail_bytes = Some(n);
        self
    }

    pub fn param(mut self, name: &str, value: &str) -> Self {
        self.opts.params.push((name.to_string(), value.to_string()));
        self
    }

    pub fn build(self) -> RunOptions {
        self.opts
    }
}

/// Settings suitable for tests: no console echo, no output files, no gate or
/// instance directory, a short stop grace period.
pub fn quiet_settings() -> Settings {
    Settings {
        echo: false,
        output_dir: None,
        gate_dir: None,
        instance_dir: None,
        stop_grace: Duration::from_millis(500),
        ..Settings::default()
    }
}

/// A bare run context for driving phases directly.
pub fn run_context(coordinator: Arc<dyn Coordinator>, job_id: &str, run_id: &str) -> RunContext {
    let tracker = Arc::new(TaskTracker::new());
    let router = Arc::new(OutputRouter::new(1024, Arc::clone(&tracker)));
    RunContext::new(InstanceId::new(job_id, run_id), coordinator, tracker, router)
        .with_stop_grace(Duration::from_millis(500))
}
