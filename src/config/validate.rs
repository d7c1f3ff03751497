// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Result, RunError};
use crate::logging::parse_level_filter;
use crate::types::OutputFormat;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = RunError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(
            raw.log,
            raw.output,
            raw.coordination,
            raw.process,
        ))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_log(cfg)?;
    validate_output(cfg)?;
    Ok(())
}

fn validate_log(cfg: &RawConfigFile) -> Result<()> {
    for (key, value) in [
        ("stdout_level", &cfg.log.stdout_level),
        ("file_level", &cfg.log.file_level),
    ] {
        if parse_level_filter(value).is_none() {
            return Err(RunError::Config(format!(
                "[log].{key}: unknown level '{value}' (expected off, error, warn, info, debug or trace)"
            )));
        }
    }

    let file_enabled = parse_level_filter(&cfg.log.file_level)
        .is_some_and(|l| l != tracing_subscriber::filter::LevelFilter::OFF);
    if cfg.log.enabled && file_enabled && cfg.log.file_path.is_none() {
        return Err(RunError::Config(
            "[log].file_path is required when [log].file_level is not \"off\"".to_string(),
        ));
    }
    Ok(())
}

fn validate_output(cfg: &RawConfigFile) -> Result<()> {
    let Some(dir) = &cfg.output.dir else {
        return Ok(());
    };
    if dir.as_os_str().is_empty() && cfg.output.format != OutputFormat::None {
        return Err(RunError::Config("[output].dir must not be empty".to_string()));
    }
    Ok(())
}
