// src/config/mod.rs

//! Configuration loading and validation for runjob.
//!
//! - `model.rs`: the TOML-backed data model.
//! - `loader.rs`: file lookup, `--set` overrides, default template.
//! - `validate.rs`: `RawConfigFile` -> `ConfigFile`.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{ConfigSource, create_config_file, expand_user, load, load_from_path, load_from_str};
pub use model::{
    ConfigFile, CoordinationSection, LogSection, OutputSection, ProcessSection, RawConfigFile,
};
