// src/coord/registry.rs

//! Registry of active instances shared between processes.
//!
//! Every active instance owns one record file, `<dir>/<job>/<run>.json`.
//! Creating that file is the registration, so two processes never hold the
//! same id. Records left by processes that died are removed when they are
//! listed or collide with a new registration.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::{InstanceId, path_component};

#[derive(Debug, Serialize, Deserialize)]
struct Record {
    job_id: String,
    run_id: String,
    pid: u32,
    started_at: String,
}

/// Directory-backed instance registry.
#[derive(Debug, Clone)]
pub struct InstanceRegistry {
    dir: PathBuf,
}

impl InstanceRegistry {
    /// The directory is created on first registration.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &InstanceId) -> PathBuf {
        self.dir
            .join(path_component(&id.job_id))
            .join(format!("{}.json", path_component(&id.run_id)))
    }

    /// Claim `id` for this process. `Ok(false)` if a live instance holds it.
    pub fn register(&self, id: &InstanceId) -> anyhow::Result<bool> {
        let path = self.record_path(id);
        if let Some(job_dir) = path.parent() {
            std::fs::create_dir_all(job_dir)
                .with_context(|| format!("creating instance directory {:?}", job_dir))?;
        }

        // Second attempt only after a stale record was removed.
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let record = Record {
                        job_id: id.job_id.clone(),
                        run_id: id.run_id.clone(),
                        pid: std::process::id(),
                        started_at: chrono::Utc::now().to_rfc3339(),
                    };
                    serde_json::to_writer(&mut file, &record)?;
                    file.write_all(b"\n")?;
                    debug!(instance = %id, ?path, "instance record written");
                    return Ok(true);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if !remove_if_stale(&path) {
                        return Ok(false);
                    }
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("creating instance record {:?}", path));
                }
            }
        }
        Ok(false)
    }

    pub fn unregister(&self, id: &InstanceId) -> anyhow::Result<()> {
        let path = self.record_path(id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing instance record {:?}", path)),
        }
    }

    /// Ids of every live instance with a record in the directory.
    pub fn active(&self) -> anyhow::Result<Vec<InstanceId>> {
        let mut ids = Vec::new();
        let jobs = match std::fs::read_dir(&self.dir) {
            Ok(jobs) => jobs,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ids),
            Err(e) => {
                return Err(e).with_context(|| format!("reading instance directory {:?}", self.dir));
            }
        };

        for job in jobs {
            let job = job?;
            if !job.file_type()?.is_dir() {
                continue;
            }
            for entry in std::fs::read_dir(job.path())? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                // Unreadable records may still be half written.
                let Some(record) = read_record(&path) else {
                    continue;
                };
                if is_alive(record.pid) {
                    ids.push(InstanceId::new(record.job_id, record.run_id));
                } else {
                    remove_stale(&path, record.pid);
                }
            }
        }
        Ok(ids)
    }
}

fn read_record(path: &Path) -> Option<Record> {
    let contents = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

fn remove_if_stale(path: &Path) -> bool {
    match read_record(path) {
        Some(record) if !is_alive(record.pid) => remove_stale(path, record.pid),
        _ => false,
    }
}

fn remove_stale(path: &Path, pid: u32) -> bool {
    warn!(?path, pid, "removing record of an instance whose process is gone");
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => true,
        Err(e) => {
            warn!(?path, error = %e, "failed to remove stale instance record");
            false
        }
    }
}

#[cfg(unix)]
fn is_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 performs the permission and existence checks only.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn is_alive(_pid: u32) -> bool {
    true
}
