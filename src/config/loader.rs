// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Result, RunError};

pub const CONFIG_FILE: &str = "runjob.toml";

/// Configuration used when no file is found, and the template written by
/// `runjob config create`.
pub const DEFAULT_CONFIG: &str = include_str!("default.toml");

/// Where the configuration should come from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    /// Exactly this file; missing is an error.
    Path(PathBuf),
    /// The embedded default, ignoring any file on disk.
    Default,
    /// First file found in [`search_paths`], else the embedded default.
    #[default]
    Search,
    /// First file found in [`search_paths`]; none found is an error.
    SearchRequired,
}

/// Candidate locations, most specific first.
pub fn search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        paths.push(PathBuf::from(xdg).join("runjob").join(CONFIG_FILE));
    }
    if let Some(home) = dirs::home_dir() {
        let path = home.join(".config").join("runjob").join(CONFIG_FILE);
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
    paths.push(PathBuf::from("/etc/xdg/runjob").join(CONFIG_FILE));
    paths
}

/// Path `runjob config create` writes to by default.
pub fn default_config_path() -> PathBuf {
    search_paths()
        .into_iter()
        .next()
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE))
}

/// Resolve `source` to a file. `None` means the embedded default.
pub fn resolve(source: &ConfigSource) -> Result<Option<PathBuf>> {
    match source {
        ConfigSource::Path(path) => {
            let path = expand_user(path);
            if path.is_file() {
                Ok(Some(path))
            } else {
                Err(RunError::ConfigFileNotFound(path))
            }
        }
        ConfigSource::Default => Ok(None),
        ConfigSource::Search | ConfigSource::SearchRequired => {
            let candidates = search_paths();
            if let Some(found) = candidates.iter().find(|p| p.is_file()) {
                return Ok(Some(found.clone()));
            }
            if *source == ConfigSource::SearchRequired {
                let first = candidates
                    .into_iter()
                    .next()
                    .unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
                return Err(RunError::ConfigFileNotFound(first));
            }
            Ok(None)
        }
    }
}

/// Raw text of the configuration selected by `source`.
pub fn read_source(source: &ConfigSource) -> Result<(Option<PathBuf>, String)> {
    match resolve(source)? {
        Some(path) => {
            let contents = fs::read_to_string(&path)?;
            Ok((Some(path), contents))
        }
        None => Ok((None, DEFAULT_CONFIG.to_string())),
    }
}

/// Load, apply `key.path=value` overrides, and validate.
pub fn load(source: &ConfigSource, overrides: &[String]) -> Result<ConfigFile> {
    let (path, contents) = read_source(source)?;
    debug!(path = ?path, overrides = overrides.len(), "loading configuration");
    load_from_str(&contents, overrides)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    load_from_str::<&str>(&contents, &[])
}

pub fn load_from_str<S: AsRef<str>>(contents: &str, overrides: &[S]) -> Result<ConfigFile> {
    let mut table: toml::Table = toml::from_str(contents)?;
    apply_overrides(&mut table, overrides)?;
    let raw: RawConfigFile = toml::Value::Table(table).try_into()?;
    ConfigFile::try_from(raw)
}

/// Apply `section.key=value` assignments to a parsed TOML tree.
///
/// Values are read as TOML literals (`5`, `true`, `"x"`); anything that is
/// not a valid literal is taken as a plain string.
pub fn apply_overrides<S: AsRef<str>>(table: &mut toml::Table, overrides: &[S]) -> Result<()> {
    for item in overrides {
        let item = item.as_ref();
        let Some((key, raw)) = item.split_once('=') else {
            return Err(RunError::Config(format!(
                "invalid override '{item}': expected key.path=value"
            )));
        };
        let segments: Vec<&str> = key.trim().split('.').map(str::trim).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(RunError::Config(format!("invalid override key '{key}'")));
        }
        set_path(table, &segments, parse_literal(raw.trim()), key)?;
    }
    Ok(())
}

fn parse_literal(raw: &str) -> toml::Value {
    toml::from_str::<toml::Table>(&format!("v = {raw}"))
        .ok()
        .and_then(|mut t| t.remove("v"))
        .unwrap_or_else(|| toml::Value::String(raw.to_string()))
}

fn set_path(table: &mut toml::Table, segments: &[&str], value: toml::Value, key: &str) -> Result<()> {
    let Some((last, parents)) = segments.split_last() else {
        return Ok(());
    };
    let mut current = table;
    for segment in parents {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        current = entry.as_table_mut().ok_or_else(|| {
            RunError::Config(format!("override '{key}': '{segment}' is not a table"))
        })?;
    }
    current.insert(last.to_string(), value);
    Ok(())
}

/// Write the default configuration to `path` (or [`default_config_path`]).
pub fn create_config_file(path: Option<&Path>, overwrite: bool) -> Result<PathBuf> {
    let path = path.map(expand_user).unwrap_or_else(default_config_path);
    if path.exists() && !overwrite {
        return Err(RunError::Config(format!(
            "{} already exists (use --overwrite to replace it)",
            path.display()
        )));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, DEFAULT_CONFIG)?;
    Ok(path)
}

/// Replace a leading `~` with the home directory.
pub fn expand_user(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}
