// src/lib.rs

pub mod builder;
pub mod cli;
pub mod config;
pub mod coord;
pub mod environment;
pub mod errors;
pub mod instance;
pub mod logging;
pub mod options;
pub mod output;
pub mod phase;
pub mod signal;
pub mod stop;
pub mod tracker;
pub mod types;

use tracing::{debug, info};

use crate::cli::{CliArgs, Commands, ConfigArgs, ConfigCommand, JobArgs};
use crate::config::ConfigFile;
use crate::config::loader::{create_config_file, read_source};
use crate::coord::write_release_marker;
use crate::errors::{Result, RunError};

pub use crate::builder::PhaseTreeBuilder;
pub use crate::environment::{Environment, Settings};
pub use crate::instance::{InstanceHandle, JobInstance};
pub use crate::options::RunOptions;
pub use crate::types::{InstanceId, StopReason, Termination};

/// `runjob config ...`; works without a valid configuration.
pub fn run_config_command(config: &ConfigArgs, command: &ConfigCommand) -> Result<i32> {
    match command {
        ConfigCommand::Print => {
            let (path, contents) = read_source(&config.source())?;
            match path {
                Some(path) => println!("# {}", path.display()),
                None => println!("# built-in default"),
            }
            print!("{contents}");
        }
        ConfigCommand::Create { overwrite, path } => {
            let written = create_config_file(path.as_deref(), *overwrite)?;
            println!("created {}", written.display());
        }
    }
    Ok(0)
}

/// High-level entry point used by `main.rs`. Returns the process exit code.
///
/// This wires together:
/// - settings from the loaded configuration
/// - the environment and the job instance
/// - the gate watcher (when approvals / checkpoints are used)
/// - SIGTERM / timeout signal handling
pub async fn run(args: CliArgs, cfg: ConfigFile) -> Result<i32> {
    let settings = Settings::from_config(&cfg);
    match &args.command {
        Commands::Config(command) => run_config_command(&args.config, command),
        Commands::Release { id } => {
            let dir = settings.gate_dir.ok_or_else(|| {
                RunError::Config("no [coordination].gate_dir configured".to_string())
            })?;
            let marker = write_release_marker(&dir, id)?;
            info!(gate = %id, ?marker, "gate released");
            Ok(0)
        }
        Commands::Job(job) => run_job(job, settings).await,
    }
}

async fn run_job(job: &JobArgs, settings: Settings) -> Result<i32> {
    let opts = job.to_run_options();
    let env = Environment::new(settings);

    let _gate_watcher = if opts.approval_id.is_some() || opts.checkpoint_id.is_some() {
        env.spawn_gate_watcher()?
    } else {
        None
    };

    let instance = env.create_instance(&opts)?;

    #[cfg(unix)]
    let _signals = {
        let timeout_signal = opts
            .timeout_signal
            .as_deref()
            .map(signal::parse_signal)
            .transpose()?;
        signal::SignalController::new(std::sync::Arc::new(instance.handle()), timeout_signal)
            .install()?
    };

    let termination = instance.run().await?;
    debug!(instance = %instance.id(), tail = ?instance.output().tail_lines(), "final output tail");
    Ok(termination.exit_code())
}
