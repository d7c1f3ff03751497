// src/errors.rs

//! Crate-wide error aliases and helpers.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunError {
    /// Conflicting or invalid options; raised before any phase starts.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An output pattern that failed to compile.
    #[error("Invalid pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    /// The supervised command exited with a non-zero code or was killed by a
    /// signal (`128 + signal`).
    #[error("Program execution failed with exit code {code}")]
    ProgramExecution { code: i32 },

    #[error("Instance {job_id}@{run_id} already exists (tried {attempts} suffixes)")]
    DuplicateInstance {
        job_id: String,
        run_id: String,
        attempts: u32,
    },

    #[error("Config file not found: {0:?}")]
    ConfigFileNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RunError {
    /// Exit status the CLI reports for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::ProgramExecution { code } => *code,
            _ => 1,
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, RunError>;
