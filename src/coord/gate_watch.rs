// src/coord/gate_watch.rs

//! Filesystem trigger for approval / checkpoint gates.
//!
//! A gate `ID` is released by creating a file named `ID` inside the gate
//! directory (`runjob release ID` does exactly that). The watcher releases
//! markers that already exist at startup as well as ones created later, and
//! removes each marker it acts on, so one release opens one gate.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use super::Coordinator;
use crate::errors::{Result, RunError};

/// Keeps the underlying `notify` watcher alive. Dropping it stops watching.
pub struct GateWatcher {
    _inner: RecommendedWatcher,
    dir: PathBuf,
}

impl std::fmt::Debug for GateWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateWatcher").field("dir", &self.dir).finish()
    }
}

fn validate_gate_id(gate_id: &str) -> Result<()> {
    if gate_id.is_empty()
        || gate_id == "."
        || gate_id == ".."
        || gate_id.contains(['/', '\\'])
    {
        return Err(RunError::Config(format!(
            "invalid gate id '{gate_id}': must be a plain file name"
        )));
    }
    Ok(())
}

/// Create the release marker for `gate_id` in `dir`.
pub fn write_release_marker(dir: &Path, gate_id: &str) -> Result<PathBuf> {
    validate_gate_id(gate_id)?;
    std::fs::create_dir_all(dir)?;
    let path = dir.join(gate_id);
    std::fs::write(&path, b"")?;
    Ok(path)
}

fn release_from_path(coordinator: &dyn Coordinator, path: &Path) {
    let Some(gate_id) = path.file_name().and_then(|n| n.to_str()) else {
        return;
    };
    if !path.is_file() {
        return;
    }
    // Whoever removes the marker releases the gate.
    match std::fs::remove_file(path) {
        Ok(()) => debug!(?path, "gate marker consumed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
        Err(e) => warn!(?path, error = %e, "failed to remove gate marker"),
    }
    coordinator.release(gate_id);
}

impl GateWatcher {
    /// Start watching `dir` (created if missing).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(dir: impl Into<PathBuf>, coordinator: Arc<dyn Coordinator>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating gate directory {:?}", dir))?;

        let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel::<Event>();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event_tx.send(event).is_err() {
                        eprintln!("runjob: gate watcher channel closed");
                    }
                }
                Err(err) => eprintln!("runjob: gate watch error: {err}"),
            },
            Config::default(),
        )
        .context("creating gate watcher")?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("watching gate directory {:?}", dir))?;

        // Markers written before we started watching.
        for entry in std::fs::read_dir(&dir)? {
            release_from_path(coordinator.as_ref(), &entry?.path());
        }

        info!(?dir, "gate watcher started");

        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    continue;
                }
                for path in &event.paths {
                    release_from_path(coordinator.as_ref(), path);
                }
            }
            debug!("gate watcher event loop finished");
        });

        Ok(Self {
            _inner: watcher,
            dir,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
