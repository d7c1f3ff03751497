// src/coord/mod.rs

//! Coordination backend contract.
//!
//! Phases never talk to each other directly; they go through a
//! [`Coordinator`], which is responsible for:
//! - concurrency-group admission (capacity + FIFO fairness),
//! - approval / checkpoint gates keyed by id,
//! - the registry of active instances (run-id collisions, dependencies).
//!
//! [`LocalCoordinator`] implements this for instances living in the same
//! process. [`gate_watch`] lets gate releases arrive as marker files, and an
//! [`InstanceRegistry`] shares the active instances with other processes.

pub mod gate_watch;
pub mod local;
pub mod registry;

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::stop::StopSignal;
use crate::types::InstanceId;

pub use gate_watch::{GateWatcher, write_release_marker};
pub use local::LocalCoordinator;
pub use registry::InstanceRegistry;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A named capacity bound. Membership is by name only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConcurrencyGroup {
    pub name: String,
    pub max_concurrent: usize,
}

impl ConcurrencyGroup {
    /// `max_concurrent` is clamped to at least 1.
    pub fn new(name: impl Into<String>, max_concurrent: usize) -> Self {
        Self {
            name: name.into(),
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn exclusive(name: impl Into<String>) -> Self {
        Self::new(name, 1)
    }
}

/// Separate namespaces so an exclusion group and an execution queue with the
/// same name never compete for the same slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Lane {
    Exclusion,
    Queue,
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lane::Exclusion => f.write_str("exclusion"),
            Lane::Queue => f.write_str("queue"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdmissionRequest {
    pub lane: Lane,
    pub group: ConcurrencyGroup,
    pub instance: InstanceId,
}

/// A granted admission slot. Dropping it releases the slot, exactly once.
pub struct Permit {
    group: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl fmt::Debug for Permit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permit")
            .field("group", &self.group)
            .field("armed", &self.release.is_some())
            .finish()
    }
}

impl Permit {
    pub fn new(group: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            group: group.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Drop without running the release hook.
    pub(crate) fn defuse(mut self) {
        self.release = None;
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Backend consulted by coordination phases.
pub trait Coordinator: Send + Sync {
    /// Wait for a slot in the request's group. Returns `None` if `stop` fires
    /// first; in that case no slot is held.
    fn admit<'a>(
        &'a self,
        request: AdmissionRequest,
        stop: &'a StopSignal,
    ) -> BoxFuture<'a, Option<Permit>>;

    /// Take a slot only if one is free and nobody is queued for the group.
    fn try_admit(&self, request: AdmissionRequest) -> Option<Permit>;

    /// Wait until `gate_id` is released. Returns `false` if `stop` fires first.
    fn await_release<'a>(&'a self, gate_id: &'a str, stop: &'a StopSignal) -> BoxFuture<'a, bool>;

    /// Release a gate. Releases that arrive before anyone waits are kept.
    fn release(&self, gate_id: &str);

    /// Record an active instance. Returns `false` if the id is taken.
    fn register_instance(&self, id: &InstanceId) -> bool;

    fn unregister_instance(&self, id: &InstanceId);

    fn active_instances(&self) -> Vec<InstanceId>;

    fn is_job_active(&self, job_id: &str) -> bool {
        self.active_instances().iter().any(|id| id.job_id == job_id)
    }
}
