// src/main.rs

use runjob::cli::{self, Commands};
use runjob::errors::Result;
use runjob::{config, logging, run, run_config_command};

#[tokio::main]
async fn main() {
    match run_main().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("runjob error: {err}");
            std::process::exit(err.exit_code());
        }
    }
}

async fn run_main() -> Result<i32> {
    let args = cli::parse();
    if let Commands::Config(command) = &args.command {
        return run_config_command(&args.config, command);
    }
    let cfg = config::load(&args.config.source(), &args.config.overrides)?;
    logging::init_logging(args.log_level, &cfg.log)?;
    run(args, cfg).await
}
