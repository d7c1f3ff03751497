// src/coord/local.rs

//! In-process coordination backend.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use super::{AdmissionRequest, BoxFuture, Coordinator, InstanceRegistry, Lane, Permit};
use crate::stop::StopSignal;
use crate::types::InstanceId;

type GroupKey = (Lane, String);

struct Waiter {
    ticket: u64,
    capacity: usize,
    instance: InstanceId,
    tx: oneshot::Sender<Permit>,
}

/// Per-group admission state.
///
/// `running` counts granted permits that have not been dropped yet.
/// `waiters` is strictly ordered by arrival.
#[derive(Default)]
struct GroupState {
    running: usize,
    waiters: VecDeque<Waiter>,
}

#[derive(Default)]
struct Inner {
    groups: Mutex<HashMap<GroupKey, GroupState>>,
    next_ticket: AtomicU64,
    gates: Mutex<HashMap<String, watch::Sender<bool>>>,
    active: Mutex<BTreeSet<InstanceId>>,
    known: Mutex<BTreeSet<InstanceId>>,
    registry: Option<InstanceRegistry>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Inner {
    fn permit(self: &Arc<Self>, key: GroupKey) -> Permit {
        let inner = Arc::clone(self);
        let group = key.1.clone();
        Permit::new(group, move || inner.release_slot(&key))
    }

    fn release_slot(self: &Arc<Self>, key: &GroupKey) {
        let mut groups = lock(&self.groups);
        let Some(state) = groups.get_mut(key) else {
            return;
        };
        state.running = state.running.saturating_sub(1);
        debug!(lane = %key.0, group = %key.1, running = state.running, "admission slot released");
        self.dispatch(key, state);
        if state.running == 0 && state.waiters.is_empty() {
            groups.remove(key);
        }
    }

    /// Hand free slots to waiters at the head of the queue, in order.
    ///
    /// Must be called with the groups lock held.
    fn dispatch(self: &Arc<Self>, key: &GroupKey, state: &mut GroupState) {
        while let Some(front) = state.waiters.front() {
            if state.running >= front.capacity {
                break;
            }
            let Some(waiter) = state.waiters.pop_front() else {
                break;
            };
            state.running += 1;
            let permit = self.permit(key.clone());
            match waiter.tx.send(permit) {
                Ok(()) => {
                    info!(
                        lane = %key.0,
                        group = %key.1,
                        instance = %waiter.instance,
                        ticket = waiter.ticket,
                        "admission granted to waiter"
                    );
                }
                Err(permit) => {
                    // Waiter went away; undo without re-entering the lock.
                    permit.defuse();
                    state.running -= 1;
                }
            }
        }
    }

    /// Remove a still-queued waiter. Returns `false` if it was already served.
    fn withdraw(self: &Arc<Self>, key: &GroupKey, ticket: u64) -> bool {
        let mut groups = lock(&self.groups);
        let Some(state) = groups.get_mut(key) else {
            return false;
        };
        let Some(pos) = state.waiters.iter().position(|w| w.ticket == ticket) else {
            return false;
        };
        state.waiters.remove(pos);
        // A narrower head may have been blocking wider requests behind it.
        self.dispatch(key, state);
        if state.running == 0 && state.waiters.is_empty() {
            groups.remove(key);
        }
        true
    }
}

/// Coordinator for instances sharing one process.
#[derive(Clone, Default)]
pub struct LocalCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LocalCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCoordinator").finish_non_exhaustive()
    }
}

impl LocalCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also record instances in `registry`, so that other processes see them
    /// and cannot take their ids.
    pub fn with_registry(registry: InstanceRegistry) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Some(registry),
                ..Inner::default()
            }),
        }
    }

    /// Number of granted, unreleased slots for a group.
    pub fn running(&self, lane: Lane, group: &str) -> usize {
        lock(&self.inner.groups)
            .get(&(lane, group.to_string()))
            .map_or(0, |s| s.running)
    }

    /// Number of queued requests for a group.
    pub fn waiting(&self, lane: Lane, group: &str) -> usize {
        lock(&self.inner.groups)
            .get(&(lane, group.to_string()))
            .map_or(0, |s| s.waiters.len())
    }

    fn gate_receiver(&self, gate_id: &str) -> watch::Receiver<bool> {
        lock(&self.inner.gates)
            .entry(gate_id.to_string())
            .or_insert_with(|| watch::channel(false).0)
            .subscribe()
    }
}

async fn wait_released(mut rx: watch::Receiver<bool>) -> bool {
    loop {
        if *rx.borrow_and_update() {
            return true;
        }
        if rx.changed().await.is_err() {
            return false;
        }
    }
}

impl Coordinator for LocalCoordinator {
    fn admit<'a>(
        &'a self,
        request: AdmissionRequest,
        stop: &'a StopSignal,
    ) -> BoxFuture<'a, Option<Permit>> {
        Box::pin(async move {
            if stop.is_stopped() {
                return None;
            }

            let key: GroupKey = (request.lane, request.group.name.clone());
            let capacity = request.group.max_concurrent.max(1);

            let (ticket, mut rx) = {
                let mut groups = lock(&self.inner.groups);
                let state = groups.entry(key.clone()).or_default();
                if state.waiters.is_empty() && state.running < capacity {
                    state.running += 1;
                    debug!(
                        lane = %key.0,
                        group = %key.1,
                        instance = %request.instance,
                        running = state.running,
                        capacity,
                        "admission granted immediately"
                    );
                    return Some(self.inner.permit(key));
                }

                let ticket = self.inner.next_ticket.fetch_add(1, Ordering::SeqCst);
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(Waiter {
                    ticket,
                    capacity,
                    instance: request.instance.clone(),
                    tx,
                });
                info!(
                    lane = %key.0,
                    group = %key.1,
                    instance = %request.instance,
                    ticket,
                    position = state.waiters.len(),
                    "waiting for admission"
                );
                (ticket, rx)
            };

            tokio::select! {
                biased;
                granted = &mut rx => granted.ok(),
                _ = stop.stopped() => {
                    if !self.inner.withdraw(&key, ticket) {
                        // Served concurrently: the permit sits in the channel
                        // and releases the slot when dropped with it.
                        drop(rx);
                    }
                    debug!(group = %key.1, ticket, "admission wait aborted by stop");
                    None
                }
            }
        })
    }

    fn try_admit(&self, request: AdmissionRequest) -> Option<Permit> {
        let key: GroupKey = (request.lane, request.group.name.clone());
        let capacity = request.group.max_concurrent.max(1);
        let mut groups = lock(&self.inner.groups);
        let state = groups.entry(key.clone()).or_default();
        if state.waiters.is_empty() && state.running < capacity {
            state.running += 1;
            Some(self.inner.permit(key))
        } else {
            None
        }
    }

    fn await_release<'a>(&'a self, gate_id: &'a str, stop: &'a StopSignal) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let rx = self.gate_receiver(gate_id);
            tokio::select! {
                biased;
                _ = stop.stopped() => false,
                released = wait_released(rx) => released,
            }
        })
    }

    fn release(&self, gate_id: &str) {
        let mut gates = lock(&self.inner.gates);
        let tx = gates
            .entry(gate_id.to_string())
            .or_insert_with(|| watch::channel(false).0);
        tx.send_replace(true);
        info!(gate = %gate_id, "gate released");
    }

    fn register_instance(&self, id: &InstanceId) -> bool {
        let mut known = lock(&self.inner.known);
        if known.contains(id) {
            return false;
        }
        if let Some(registry) = &self.inner.registry {
            match registry.register(id) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(instance = %id, "id held by another process");
                    return false;
                }
                Err(e) => warn!(
                    instance = %id,
                    error = %e,
                    "instance registry unavailable; registering in this process only"
                ),
            }
        }
        known.insert(id.clone());
        drop(known);
        lock(&self.inner.active).insert(id.clone());
        true
    }

    fn unregister_instance(&self, id: &InstanceId) {
        lock(&self.inner.active).remove(id);
        if let Some(registry) = &self.inner.registry {
            if let Err(e) = registry.unregister(id) {
                warn!(instance = %id, error = %e, "failed to remove instance record");
            }
        }
    }

    fn active_instances(&self) -> Vec<InstanceId> {
        let mut active = lock(&self.inner.active).clone();
        if let Some(registry) = &self.inner.registry {
            match registry.active() {
                Ok(ids) => active.extend(ids),
                Err(e) => warn!(error = %e, "failed to list instance records"),
            }
        }
        active.into_iter().collect()
    }
}
