// src/config/model.rs

use std::path::PathBuf;

use serde::Deserialize;

use crate::types::{ExclusionPolicy, OutputFormat};

/// Configuration as read from `runjob.toml`, before validation.
///
/// ```toml
/// [log]
/// enabled = true
/// stdout_level = "warn"
/// file_level = "off"
///
/// [output]
/// tail_bytes = 4096
/// echo = true
/// dir = "~/.local/state/runjob/output"
/// format = "text"
///
/// [coordination]
/// exclusion_policy = "skip"
/// max_rerun_suffix = 9
/// gate_dir = "~/.local/state/runjob/gates"
/// instance_dir = "~/.local/state/runjob/instances"
///
/// [process]
/// stop_grace_secs = 5
/// ```
///
/// Every section and key is optional.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub log: LogSection,
    #[serde(default)]
    pub output: OutputSection,
    #[serde(default)]
    pub coordination: CoordinationSection,
    #[serde(default)]
    pub process: ProcessSection,
}

/// Validated configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    pub log: LogSection,
    pub output: OutputSection,
    pub coordination: CoordinationSection,
    pub process: ProcessSection,
}

impl ConfigFile {
    /// Internal constructor used after validation.
    pub(crate) fn new_unchecked(
        log: LogSection,
        output: OutputSection,
        coordination: CoordinationSection,
        process: ProcessSection,
    ) -> Self {
        Self {
            log,
            output,
            coordination,
            process,
        }
    }
}

/// `[log]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Level of the stderr layer (`off`, `error` .. `trace`).
    #[serde(default = "default_stdout_level")]
    pub stdout_level: String,
    /// Level of the file layer; `off` disables it.
    #[serde(default = "default_file_level")]
    pub file_level: String,
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_stdout_level() -> String {
    "warn".to_string()
}

fn default_file_level() -> String {
    "off".to_string()
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            enabled: true,
            stdout_level: default_stdout_level(),
            file_level: default_file_level(),
            file_path: None,
        }
    }
}

/// `[output]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSection {
    /// Size of the in-memory tail of each instance's output.
    #[serde(default = "default_tail_bytes")]
    pub tail_bytes: usize,
    /// Re-emit captured output on the supervisor's stdout/stderr.
    #[serde(default = "default_true")]
    pub echo: bool,
    /// Directory for per-instance output files; no files when absent.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub format: OutputFormat,
}

fn default_tail_bytes() -> usize {
    4096
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            tail_bytes: default_tail_bytes(),
            echo: true,
            dir: None,
            format: OutputFormat::default(),
        }
    }
}

/// `[coordination]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoordinationSection {
    #[serde(default)]
    pub exclusion_policy: ExclusionPolicy,
    /// How many `-N` suffixes are tried when a run id is taken.
    #[serde(default = "default_max_rerun_suffix")]
    pub max_rerun_suffix: u32,
    /// Directory watched for approval / checkpoint release markers.
    #[serde(default)]
    pub gate_dir: Option<PathBuf>,
    /// Registry of active instances shared by every process using it.
    #[serde(default)]
    pub instance_dir: Option<PathBuf>,
}

fn default_max_rerun_suffix() -> u32 {
    9
}

impl Default for CoordinationSection {
    fn default() -> Self {
        Self {
            exclusion_policy: ExclusionPolicy::default(),
            max_rerun_suffix: default_max_rerun_suffix(),
            gate_dir: None,
            instance_dir: None,
        }
    }
}

/// `[process]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessSection {
    /// Seconds between the termination signal and a hard kill.
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
}

fn default_stop_grace_secs() -> u64 {
    5
}

impl Default for ProcessSection {
    fn default() -> Self {
        Self {
            stop_grace_secs: default_stop_grace_secs(),
        }
    }
}
