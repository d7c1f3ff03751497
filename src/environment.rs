// src/environment.rs

//! Process-wide state shared by job instances: the coordination backend and
//! the resolved settings.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::builder::{PhaseTreeBuilder, build_parsers};
use crate::config::{ConfigFile, expand_user};
use crate::coord::{
    Coordinator, GateWatcher, InstanceRegistry, LocalCoordinator, write_release_marker,
};
use crate::errors::{Result, RunError};
use crate::instance::JobInstance;
use crate::options::RunOptions;
use crate::output::{ConsoleSink, FileSink, JsonLinesSink, OutputRouter, StorageSink};
use crate::phase::RunContext;
use crate::tracker::TaskTracker;
use crate::types::{ExclusionPolicy, InstanceId, OutputFormat, path_component};

/// Settings derived from the configuration file.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub tail_bytes: usize,
    pub echo: bool,
    pub output_dir: Option<PathBuf>,
    pub output_format: OutputFormat,
    pub exclusion_policy: ExclusionPolicy,
    pub max_rerun_suffix: u32,
    pub gate_dir: Option<PathBuf>,
    pub instance_dir: Option<PathBuf>,
    pub stop_grace: Duration,
}

impl Settings {
    pub fn from_config(cfg: &ConfigFile) -> Self {
        Self {
            tail_bytes: cfg.output.tail_bytes,
            echo: cfg.output.echo,
            output_dir: cfg.output.dir.as_deref().map(expand_user),
            output_format: cfg.output.format,
            exclusion_policy: cfg.coordination.exclusion_policy,
            max_rerun_suffix: cfg.coordination.max_rerun_suffix,
            gate_dir: cfg.coordination.gate_dir.as_deref().map(expand_user),
            instance_dir: cfg.coordination.instance_dir.as_deref().map(expand_user),
            stop_grace: Duration::from_secs(cfg.process.stop_grace_secs),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_config(&ConfigFile::default())
    }
}

pub struct Environment {
    coordinator: Arc<dyn Coordinator>,
    settings: Settings,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Environment {
    /// Environment backed by a [`LocalCoordinator`]. With an instance
    /// directory configured, its registry is shared with other processes.
    pub fn new(settings: Settings) -> Self {
        let coordinator = match &settings.instance_dir {
            Some(dir) => LocalCoordinator::with_registry(InstanceRegistry::new(dir.clone())),
            None => LocalCoordinator::new(),
        };
        Self::with_coordinator(Arc::new(coordinator), settings)
    }

    pub fn with_coordinator(coordinator: Arc<dyn Coordinator>, settings: Settings) -> Self {
        Self {
            coordinator,
            settings,
        }
    }

    pub fn coordinator(&self) -> Arc<dyn Coordinator> {
        Arc::clone(&self.coordinator)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Validate `opts`, register a unique instance id and assemble the
    /// instance. Nothing runs until [`JobInstance::run`].
    ///
    /// Must be called from within a Tokio runtime (sink workers are spawned
    /// here).
    pub fn create_instance(&self, opts: &RunOptions) -> Result<JobInstance> {
        let root = PhaseTreeBuilder::new(opts)
            .with_exclusion_policy(self.settings.exclusion_policy)
            .build()?;
        let parsers = build_parsers(opts)?;
        let id = self.register_id(opts)?;

        let tracker = Arc::new(TaskTracker::new());
        let tail_bytes = opts.tail_bytes.unwrap_or(self.settings.tail_bytes);
        let router = parsers
            .into_iter()
            .fold(OutputRouter::new(tail_bytes, Arc::clone(&tracker)), |r, p| {
                r.with_parser(p)
            });
        let router = Arc::new(router);

        let captures = !opts.bypass_output && opts.dry_run.is_none();
        if self.settings.echo && captures {
            router.add_sink(Box::new(ConsoleSink));
        }
        if let Some(dir) = &self.settings.output_dir {
            match open_storage(dir, self.settings.output_format, &id) {
                Ok(Some(sink)) => router.add_sink(sink),
                Ok(None) => {}
                Err(e) => warn!(
                    instance = %id,
                    error = %e,
                    "output storage unavailable; continuing without it"
                ),
            }
        }

        let ctx = RunContext::new(id.clone(), Arc::clone(&self.coordinator), tracker, router)
            .with_stop_grace(self.settings.stop_grace);
        debug!(instance = %id, "instance created");
        Ok(JobInstance::new(root, ctx, opts.params.clone()))
    }

    /// Pick a free run id: the requested one (or a fresh UUID), then
    /// `<run>-1` .. `<run>-<max_rerun_suffix>`.
    fn register_id(&self, opts: &RunOptions) -> Result<InstanceId> {
        let base_run = opts
            .run_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let base = InstanceId::new(opts.job_id.clone(), base_run.clone());
        if self.coordinator.register_instance(&base) {
            return Ok(base);
        }

        let max = self.settings.max_rerun_suffix;
        for n in 1..=max {
            let candidate = base.with_run_id(format!("{base_run}-{n}"));
            if self.coordinator.register_instance(&candidate) {
                info!(requested = %base, assigned = %candidate, "run id taken; using suffix");
                return Ok(candidate);
            }
        }

        Err(RunError::DuplicateInstance {
            job_id: opts.job_id.clone(),
            run_id: base_run,
            attempts: max,
        })
    }

    /// Release an approval / checkpoint gate for instances in this process
    /// and, when a gate directory is configured, for other processes too.
    pub fn release(&self, gate_id: &str) -> Result<()> {
        if let Some(dir) = &self.settings.gate_dir {
            let marker = write_release_marker(dir, gate_id)?;
            debug!(?marker, "release marker written");
        }
        self.coordinator.release(gate_id);
        Ok(())
    }

    /// Watch the configured gate directory. `None` when none is configured.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn_gate_watcher(&self) -> Result<Option<GateWatcher>> {
        match &self.settings.gate_dir {
            Some(dir) => Ok(Some(GateWatcher::spawn(dir.clone(), self.coordinator())?)),
            None => Ok(None),
        }
    }
}

fn open_storage(
    dir: &Path,
    format: OutputFormat,
    id: &InstanceId,
) -> anyhow::Result<Option<Box<dyn StorageSink>>> {
    let job_dir = dir.join(path_component(&id.job_id));
    let run = path_component(&id.run_id);
    let sink: Box<dyn StorageSink> = match format {
        OutputFormat::None => return Ok(None),
        OutputFormat::Text => Box::new(FileSink::create(job_dir.join(format!("{run}.log")))?),
        OutputFormat::Jsonl => {
            Box::new(JsonLinesSink::create(job_dir.join(format!("{run}.jsonl")))?)
        }
    };
    Ok(Some(sink))
}
