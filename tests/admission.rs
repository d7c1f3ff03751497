// tests/admission.rs

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use runjob::coord::{AdmissionRequest, ConcurrencyGroup, Coordinator, Lane, LocalCoordinator};
use runjob::errors::RunError;
use runjob::phase::{
    DryRunPhase, DryRunStatus, ExecutionQueue, MutualExclusionGuard, Phase, TimeoutExtension,
};
use runjob::stop::StopSignal;
use runjob::types::{ExclusionPolicy, InstanceId, PhaseState, StopReason, Termination};
use runjob_test_utils::builders::run_context;
use runjob_test_utils::fakes::{Gauge, GaugePhase};
use runjob_test_utils::{eventually, init_tracing, with_timeout};

fn request(lane: Lane, group: &str, capacity: usize, run: &str) -> AdmissionRequest {
    AdmissionRequest {
        lane,
        group: ConcurrencyGroup::new(group, capacity),
        instance: InstanceId::new("job", run),
    }
}

/// Run `phase` on its own task with a fresh context.
fn spawn_phase(
    coordinator: &Arc<LocalCoordinator>,
    run: &str,
    phase: Arc<dyn Phase>,
) -> (
    Arc<runjob::phase::RunContext>,
    tokio::task::JoinHandle<runjob::errors::Result<Termination>>,
) {
    let ctx = Arc::new(run_context(coordinator.clone(), "job", run));
    let task_ctx = Arc::clone(&ctx);
    let handle = tokio::spawn(async move { phase.run(&task_ctx).await });
    (ctx, handle)
}

#[tokio::test]
async fn queue_never_exceeds_capacity() {
    init_tracing();

    let coordinator = Arc::new(LocalCoordinator::new());
    let gauge = Gauge::new();

    let mut handles = Vec::new();
    for i in 0..6 {
        let label = format!("p{i}");
        let phase: Arc<dyn Phase> = Arc::new(ExecutionQueue::new(
            ConcurrencyGroup::new("g", 2),
            Box::new(GaugePhase::sleeping(
                &label,
                gauge.clone(),
                Duration::from_millis(30),
            )),
        ));
        handles.push(spawn_phase(&coordinator, &label, phase).1);
    }

    for handle in handles {
        let result = with_timeout(handle).await.unwrap();
        assert_eq!(result.unwrap(), Termination::Completed);
    }

    assert_eq!(gauge.max_concurrent(), 2);
    assert_eq!(gauge.finished().len(), 6);
    assert_eq!(coordinator.running(Lane::Queue, "g"), 0);
    assert_eq!(coordinator.waiting(Lane::Queue, "g"), 0);
}

#[tokio::test]
async fn waiters_are_admitted_in_arrival_order() {
    init_tracing();

    let coordinator = Arc::new(LocalCoordinator::new());
    let gauge = Gauge::new();
    let release = Arc::new(Notify::new());
    let group = ConcurrencyGroup::exclusive("fifo");

    let holder: Arc<dyn Phase> = Arc::new(ExecutionQueue::new(
        group.clone(),
        Box::new(GaugePhase::until("first", gauge.clone(), release.clone())),
    ));
    let (_, first) = spawn_phase(&coordinator, "first", holder);
    eventually(|| gauge.running() == 1).await;

    let mut rest = Vec::new();
    for (n, label) in ["second", "third", "fourth"].into_iter().enumerate() {
        let phase: Arc<dyn Phase> = Arc::new(ExecutionQueue::new(
            group.clone(),
            Box::new(GaugePhase::sleeping(
                label,
                gauge.clone(),
                Duration::from_millis(5),
            )),
        ));
        rest.push(spawn_phase(&coordinator, label, phase).1);
        eventually(|| coordinator.waiting(Lane::Queue, "fifo") == n + 1).await;
    }

    release.notify_one();
    with_timeout(first).await.unwrap().unwrap();
    for handle in rest {
        with_timeout(handle).await.unwrap().unwrap();
    }

    assert_eq!(gauge.started(), vec!["first", "second", "third", "fourth"]);
    assert_eq!(gauge.max_concurrent(), 1);
}

#[tokio::test]
async fn stop_while_waiting_withdraws_without_running() {
    init_tracing();

    let coordinator = Arc::new(LocalCoordinator::new());
    let gauge = Gauge::new();
    let release = Arc::new(Notify::new());
    let group = ConcurrencyGroup::exclusive("busy");

    let holder: Arc<dyn Phase> = Arc::new(ExecutionQueue::new(
        group.clone(),
        Box::new(GaugePhase::until("holder", gauge.clone(), release.clone())),
    ));
    let (_, holder_task) = spawn_phase(&coordinator, "holder", holder);
    eventually(|| gauge.running() == 1).await;

    let waiter = Arc::new(ExecutionQueue::new(
        group,
        Box::new(GaugePhase::sleeping(
            "waiter",
            gauge.clone(),
            Duration::from_millis(1),
        )),
    ));
    let (ctx, waiter_task) = spawn_phase(&coordinator, "waiter", waiter.clone());
    eventually(|| waiter.state() == PhaseState::Waiting).await;

    assert!(ctx.stop(StopReason::Requested));
    let result = with_timeout(waiter_task).await.unwrap().unwrap();

    assert_eq!(result, Termination::Stopped(StopReason::Requested));
    assert_eq!(waiter.state(), PhaseState::Stopped);
    assert_eq!(coordinator.waiting(Lane::Queue, "busy"), 0);
    assert_eq!(gauge.started(), vec!["holder"]);

    release.notify_one();
    with_timeout(holder_task).await.unwrap().unwrap();
    assert_eq!(coordinator.running(Lane::Queue, "busy"), 0);
}

#[tokio::test]
async fn stopped_signal_is_never_admitted() {
    let coordinator = LocalCoordinator::new();
    let stop = StopSignal::new();
    stop.stop(StopReason::Signal);

    let permit = with_timeout(coordinator.admit(request(Lane::Queue, "g", 1, "r"), &stop)).await;
    assert!(permit.is_none());
    assert_eq!(coordinator.running(Lane::Queue, "g"), 0);
}

#[tokio::test]
async fn slot_is_released_when_the_inner_phase_fails() {
    init_tracing();

    let coordinator = Arc::new(LocalCoordinator::new());
    let ctx = run_context(coordinator.clone(), "job", "r1");
    let queue = ExecutionQueue::new(
        ConcurrencyGroup::exclusive("g"),
        Box::new(DryRunPhase::new("true", DryRunStatus::Failed)),
    );

    let result = queue.run(&ctx).await;
    assert!(matches!(result, Err(RunError::ProgramExecution { code: 1 })));
    assert_eq!(queue.state(), PhaseState::Failed);
    assert_eq!(coordinator.running(Lane::Queue, "g"), 0);
    assert!(coordinator.try_admit(request(Lane::Queue, "g", 1, "r2")).is_some());
}

#[tokio::test]
async fn timeout_fires_while_waiting_in_a_queue() {
    init_tracing();

    let coordinator = Arc::new(LocalCoordinator::new());
    let held = coordinator
        .try_admit(request(Lane::Queue, "nightly", 1, "holder"))
        .unwrap();

    let gauge = Gauge::new();
    let phase = TimeoutExtension::new(
        Duration::from_millis(100),
        None,
        Box::new(ExecutionQueue::new(
            ConcurrencyGroup::new("nightly", 1),
            Box::new(GaugePhase::sleeping(
                "queued",
                gauge.clone(),
                Duration::from_millis(1),
            )),
        )),
    );
    let ctx = run_context(coordinator.clone(), "job", "r2");

    let started = Instant::now();
    let result = with_timeout(phase.run(&ctx)).await.unwrap();

    assert_eq!(result, Termination::Stopped(StopReason::Timeout));
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(gauge.started().is_empty());
    assert_eq!(coordinator.waiting(Lane::Queue, "nightly"), 0);
    assert_eq!(coordinator.running(Lane::Queue, "nightly"), 1);

    drop(held);
    assert_eq!(coordinator.running(Lane::Queue, "nightly"), 0);
    assert!(coordinator.try_admit(request(Lane::Queue, "nightly", 1, "r3")).is_some());
}

#[tokio::test]
async fn dropping_a_permit_frees_the_slot() {
    let coordinator = LocalCoordinator::new();

    let first = coordinator.try_admit(request(Lane::Queue, "g", 1, "a"));
    assert!(first.is_some());
    assert!(coordinator.try_admit(request(Lane::Queue, "g", 1, "b")).is_none());

    drop(first);
    assert!(coordinator.try_admit(request(Lane::Queue, "g", 1, "c")).is_some());
}

#[tokio::test]
async fn exclusion_and_queue_groups_do_not_share_slots() {
    let coordinator = LocalCoordinator::new();

    let _exclusion = coordinator
        .try_admit(request(Lane::Exclusion, "same", 1, "a"))
        .unwrap();
    let queue = coordinator.try_admit(request(Lane::Queue, "same", 1, "b"));
    assert!(queue.is_some());
}

#[tokio::test]
async fn exclusion_skip_policy_skips_while_held() {
    init_tracing();

    let coordinator = Arc::new(LocalCoordinator::new());
    let gauge = Gauge::new();
    let release = Arc::new(Notify::new());

    let holder: Arc<dyn Phase> = Arc::new(MutualExclusionGuard::new(
        "backup",
        ExclusionPolicy::Skip,
        Box::new(GaugePhase::until("holder", gauge.clone(), release.clone())),
    ));
    let (_, holder_task) = spawn_phase(&coordinator, "holder", holder);
    eventually(|| gauge.running() == 1).await;

    let ctx = run_context(coordinator.clone(), "job", "second");
    let second = MutualExclusionGuard::new(
        "backup",
        ExclusionPolicy::Skip,
        Box::new(GaugePhase::sleeping(
            "second",
            gauge.clone(),
            Duration::from_millis(1),
        )),
    );
    let result = with_timeout(second.run(&ctx)).await.unwrap();

    match result {
        Termination::Skipped { reason } => assert!(reason.contains("backup")),
        other => panic!("expected Skipped, got {other:?}"),
    }
    assert_eq!(second.state(), PhaseState::Skipped);
    assert_eq!(gauge.started(), vec!["holder"]);

    release.notify_one();
    with_timeout(holder_task).await.unwrap().unwrap();
}

#[tokio::test]
async fn exclusion_wait_policy_runs_after_the_holder() {
    init_tracing();

    let coordinator = Arc::new(LocalCoordinator::new());
    let gauge = Gauge::new();
    let release = Arc::new(Notify::new());

    let holder: Arc<dyn Phase> = Arc::new(MutualExclusionGuard::new(
        "backup",
        ExclusionPolicy::Wait,
        Box::new(GaugePhase::until("holder", gauge.clone(), release.clone())),
    ));
    let (_, holder_task) = spawn_phase(&coordinator, "holder", holder);
    eventually(|| gauge.running() == 1).await;

    let second = Arc::new(MutualExclusionGuard::new(
        "backup",
        ExclusionPolicy::Wait,
        Box::new(GaugePhase::sleeping(
            "second",
            gauge.clone(),
            Duration::from_millis(1),
        )),
    ));
    let (_, second_task) = spawn_phase(&coordinator, "second", second.clone());
    eventually(|| second.state() == PhaseState::Waiting).await;
    assert_eq!(gauge.started(), vec!["holder"]);

    release.notify_one();
    with_timeout(holder_task).await.unwrap().unwrap();
    let result = with_timeout(second_task).await.unwrap().unwrap();

    assert_eq!(result, Termination::Completed);
    assert_eq!(gauge.started(), vec!["holder", "second"]);
    assert_eq!(gauge.max_concurrent(), 1);
}
