// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::ConfigSource;
use crate::options::{RunOptions, default_job_id, parse_param};
use crate::phase::{DryRunStatus, WarnTime};
use crate::types::ExclusionPolicy;

/// Command-line arguments for `runjob`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "runjob",
    version,
    about = "Run a command as a supervised job instance.",
    long_about = None
)]
pub struct CliArgs {
    /// Logging level (off, error, warn, info, debug, trace).
    ///
    /// If omitted, `RUNJOB_LOG` or the configured level is used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Default, Args)]
pub struct ConfigArgs {
    /// Use this configuration file.
    #[arg(
        short = 'C',
        long = "config",
        value_name = "PATH",
        global = true,
        conflicts_with_all = ["def_config", "config_required"]
    )]
    pub path: Option<PathBuf>,

    /// Ignore configuration files and use the built-in defaults.
    #[arg(long, global = true, conflicts_with = "config_required")]
    pub def_config: bool,

    /// Fail if no configuration file is found.
    #[arg(long, global = true)]
    pub config_required: bool,

    /// Override a configuration value, e.g. `--set output.echo=false`.
    #[arg(long = "set", value_name = "KEY=VALUE", global = true)]
    pub overrides: Vec<String>,
}

impl ConfigArgs {
    pub fn source(&self) -> ConfigSource {
        match (&self.path, self.def_config, self.config_required) {
            (Some(path), _, _) => ConfigSource::Path(path.clone()),
            (None, true, _) => ConfigSource::Default,
            (None, false, true) => ConfigSource::SearchRequired,
            (None, false, false) => ConfigSource::Search,
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Run COMMAND as a job instance.
    Job(JobArgs),

    /// Release an approval or checkpoint gate.
    Release {
        /// Gate id given to `--approve` or `--checkpoint`.
        id: String,
    },

    /// Show or create the configuration file.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Clone, Subcommand)]
pub enum ConfigCommand {
    /// Print the configuration that would be used.
    Print,

    /// Write the default configuration file.
    Create {
        /// Replace an existing file.
        #[arg(long)]
        overwrite: bool,

        /// Target path (default: the user configuration path).
        #[arg(long, value_name = "PATH")]
        path: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Args)]
pub struct JobArgs {
    /// Job id (default: the command line).
    #[arg(long, value_name = "ID")]
    pub id: Option<String>,

    /// Run id (default: a random UUID).
    #[arg(long, value_name = "ID")]
    pub run_id: Option<String>,

    /// Let the command write directly to the terminal; no output capture.
    #[arg(short = 'b', long)]
    pub bypass_output: bool,

    /// Do not run concurrently with another instance of the same job.
    #[arg(short = 'x', long)]
    pub exclusive: bool,

    /// Exclusion group shared by different jobs (implies --exclusive).
    #[arg(long, value_name = "NAME")]
    pub exclusive_group: Option<String>,

    /// What to do when the exclusion group is held.
    #[arg(long, value_name = "POLICY")]
    pub exclusion_policy: Option<ExclusionPolicy>,

    /// Queue instances so that only one runs at a time.
    #[arg(short = 's', long)]
    pub serial: bool,

    /// Queue instances so that at most N run at a time.
    #[arg(short = 'm', long, value_name = "N", default_value_t = 0)]
    pub max_concurrent: usize,

    /// Queue shared by different jobs (default: the job id).
    #[arg(short = 'q', long, value_name = "NAME")]
    pub queue_group: Option<String>,

    /// Wait for `runjob release ID` before running.
    #[arg(short = 'A', long = "approve", value_name = "ID")]
    pub approval_id: Option<String>,

    /// Wait for `runjob release ID` before the command starts, after
    /// coordination.
    #[arg(long = "checkpoint", value_name = "ID")]
    pub checkpoint_id: Option<String>,

    /// Run only while an instance of JOB is active.
    #[arg(short = 'd', long = "depends-on", value_name = "JOB")]
    pub depends_on: Vec<String>,

    /// Stop the command after SECS seconds.
    #[arg(long, value_name = "SECS", value_parser = parse_secs)]
    pub timeout: Option<Duration>,

    /// Signal sent to the command on timeout; receiving it also times the
    /// instance out.
    #[arg(short = 't', long, value_name = "SIG")]
    pub timeout_signal: Option<String>,

    /// Warn when execution exceeds this time (e.g. 30s, 5m, 1h, 2d).
    #[arg(long = "warn-time", value_name = "TIME", value_parser = parse_warn_time)]
    pub warn_times: Vec<String>,

    /// Warn for every output line matching REGEX.
    #[arg(long = "warn-output", value_name = "REGEX")]
    pub warn_outputs: Vec<String>,

    /// Extract `key=[value]` fields from output.
    #[arg(short = 'k', long)]
    pub kv_filter: bool,

    /// Rename an extracted key.
    #[arg(long = "kv-alias", value_name = "FROM=TO")]
    pub kv_aliases: Vec<String>,

    /// Extract fields from named capture groups of REGEX.
    #[arg(short = 'p', long = "pattern", value_name = "REGEX")]
    pub field_patterns: Vec<String>,

    /// Bytes of recent output kept in memory.
    #[arg(long, value_name = "N")]
    pub tail_bytes: Option<usize>,

    /// Go through coordination but don't execute the command.
    #[arg(
        long,
        value_enum,
        value_name = "STATUS",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "completed"
    )]
    pub dry_run: Option<DryRunStatus>,

    /// Instance metadata.
    #[arg(long = "param", value_name = "NAME=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, String)>,

    /// Command to run, followed by its arguments.
    #[arg(
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "COMMAND"
    )]
    pub command: Vec<String>,
}

impl JobArgs {
    pub fn to_run_options(&self) -> RunOptions {
        let (command, args) = match self.command.split_first() {
            Some((command, args)) => (command.clone(), args.to_vec()),
            None => (String::new(), Vec::new()),
        };
        let job_id = self
            .id
            .clone()
            .unwrap_or_else(|| default_job_id(&command, &args));

        RunOptions {
            job_id,
            run_id: self.run_id.clone(),
            command,
            args,
            bypass_output: self.bypass_output,
            exclusive: self.exclusive,
            exclusive_group: self.exclusive_group.clone(),
            exclusion_policy: self.exclusion_policy,
            serial: self.serial,
            max_concurrent: self.max_concurrent,
            queue_group: self.queue_group.clone(),
            approval_id: self.approval_id.clone(),
            checkpoint_id: self.checkpoint_id.clone(),
            depends_on: self.depends_on.clone(),
            timeout: self.timeout,
            timeout_signal: self.timeout_signal.clone(),
            warn_times: self.warn_times.clone(),
            warn_outputs: self.warn_outputs.clone(),
            kv_filter: self.kv_filter,
            kv_aliases: self.kv_aliases.clone(),
            field_patterns: self.field_patterns.clone(),
            tail_bytes: self.tail_bytes,
            dry_run: self.dry_run,
            params: self.params.clone(),
        }
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

fn parse_secs(s: &str) -> Result<Duration, String> {
    let secs: f64 = s
        .trim()
        .parse()
        .map_err(|e| format!("invalid number of seconds '{s}': {e}"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid timeout '{s}': {e}"))
}

fn parse_warn_time(s: &str) -> Result<String, String> {
    WarnTime::parse(s).map(|w| w.as_str().to_string())
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
