// tests/gates.rs

use std::sync::Arc;
use std::time::{Duration, Instant};

use runjob::coord::{Coordinator, GateWatcher, LocalCoordinator, write_release_marker};
use runjob::errors::RunError;
use runjob::phase::{
    ApprovalPhase, CheckpointPhase, DependencyPhase, DryRunStatus, Phase, TimeoutExtension, find,
};
use runjob::stop::StopSignal;
use runjob::types::{PhaseState, StopReason, Termination};
use runjob::{Environment, Settings};
use runjob_test_utils::builders::{RunOptionsBuilder, quiet_settings, run_context};
use runjob_test_utils::fakes::{Gauge, GaugePhase};
use runjob_test_utils::{eventually, init_tracing, with_timeout};

#[tokio::test]
async fn approval_holds_the_inner_phase_until_released() {
    init_tracing();

    let coordinator = Arc::new(LocalCoordinator::new());
    let gauge = Gauge::new();
    let approval = Arc::new(ApprovalPhase::new(
        "deploy-ok",
        "deploy-ok",
        Box::new(GaugePhase::sleeping(
            "inner",
            gauge.clone(),
            Duration::from_millis(1),
        )),
    ));

    let ctx = Arc::new(run_context(coordinator.clone(), "deploy", "r1"));
    let (phase, task_ctx) = (approval.clone(), ctx.clone());
    let task = tokio::spawn(async move { phase.run(&task_ctx).await });

    eventually(|| approval.state() == PhaseState::Pending).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(gauge.started().is_empty());

    coordinator.release("deploy-ok");
    let result = with_timeout(task).await.unwrap().unwrap();

    assert_eq!(result, Termination::Completed);
    assert_eq!(approval.state(), PhaseState::Completed);
    assert_eq!(gauge.started(), vec!["inner"]);
}

#[tokio::test]
async fn stop_while_pending_cancels() {
    init_tracing();

    let coordinator = Arc::new(LocalCoordinator::new());
    let gauge = Gauge::new();
    let approval = Arc::new(ApprovalPhase::new(
        "never",
        "never",
        Box::new(GaugePhase::sleeping(
            "inner",
            gauge.clone(),
            Duration::from_millis(1),
        )),
    ));

    let ctx = Arc::new(run_context(coordinator, "deploy", "r1"));
    let (phase, task_ctx) = (approval.clone(), ctx.clone());
    let task = tokio::spawn(async move { phase.run(&task_ctx).await });

    eventually(|| approval.state() == PhaseState::Pending).await;
    ctx.stop(StopReason::Signal);
    let result = with_timeout(task).await.unwrap().unwrap();

    assert_eq!(result, Termination::Cancelled(StopReason::Signal));
    assert_eq!(result.exit_code(), 143);
    assert_eq!(approval.state(), PhaseState::Cancelled);
    assert_eq!(approval.children()[0].state(), PhaseState::Created);
    assert!(gauge.started().is_empty());
}

#[tokio::test]
async fn release_before_waiting_is_remembered() {
    let coordinator = Arc::new(LocalCoordinator::new());
    coordinator.release("early");

    let ctx = run_context(coordinator.clone(), "job", "r1");
    let checkpoint = CheckpointPhase::new("early");
    let result = with_timeout(checkpoint.run(&ctx)).await.unwrap();

    assert_eq!(result, Termination::Completed);
    assert_eq!(checkpoint.state(), PhaseState::Completed);

    // The same gate stays open for later waiters.
    let stop = StopSignal::new();
    assert!(with_timeout(coordinator.await_release("early", &stop)).await);
}

#[tokio::test]
async fn checkpoint_runs_after_dependencies_and_before_coordination() {
    init_tracing();

    let env = Environment::new(quiet_settings());
    let opts = RunOptionsBuilder::dry_run("report", DryRunStatus::Completed)
        .serial()
        .checkpoint("data-ready")
        .build();
    let instance = Arc::new(env.create_instance(&opts).unwrap());

    let runner = Arc::clone(&instance);
    let task = tokio::spawn(async move { runner.run().await });

    eventually(|| {
        find(instance.root(), "checkpoint").map(|p| p.state()) == Some(PhaseState::Pending)
    })
    .await;
    assert_eq!(
        find(instance.root(), "queue").unwrap().state(),
        PhaseState::Created
    );

    env.release("data-ready").unwrap();
    let result = with_timeout(task).await.unwrap().unwrap();

    assert_eq!(result, Termination::Completed);
    assert_eq!(
        find(instance.root(), "queue").unwrap().state(),
        PhaseState::Completed
    );
}

#[tokio::test]
async fn dependency_requires_another_active_instance() {
    init_tracing();

    let env = Environment::new(quiet_settings());

    let upstream = env
        .create_instance(&RunOptionsBuilder::dry_run("db", DryRunStatus::Completed).build())
        .unwrap();

    let satisfied = env
        .create_instance(
            &RunOptionsBuilder::dry_run("report", DryRunStatus::Completed)
                .depends_on("db")
                .build(),
        )
        .unwrap();
    assert_eq!(satisfied.run().await.unwrap(), Termination::Completed);

    drop(upstream);

    let unsatisfied = env
        .create_instance(
            &RunOptionsBuilder::dry_run("report", DryRunStatus::Completed)
                .depends_on("db")
                .build(),
        )
        .unwrap();
    match unsatisfied.run().await.unwrap() {
        Termination::Skipped { reason } => assert!(reason.contains("db")),
        other => panic!("expected Skipped, got {other:?}"),
    }
    assert_eq!(
        find(unsatisfied.root(), "program").unwrap().state(),
        PhaseState::Created
    );
}

#[tokio::test]
async fn an_instance_does_not_satisfy_its_own_dependency() {
    let coordinator = Arc::new(LocalCoordinator::new());
    let ctx = run_context(coordinator.clone(), "loop", "r1");
    assert!(coordinator.register_instance(ctx.instance_id()));

    let dependency = DependencyPhase::new("loop");
    let result = dependency.run(&ctx).await.unwrap();

    assert!(matches!(result, Termination::Skipped { .. }));
    assert_eq!(dependency.state(), PhaseState::Skipped);
}

#[tokio::test]
async fn marker_files_release_gates() {
    init_tracing();

    let dir = tempfile::tempdir().unwrap();
    let coordinator = Arc::new(LocalCoordinator::new());
    let stop = StopSignal::new();

    write_release_marker(dir.path(), "before").unwrap();
    let _watcher = GateWatcher::spawn(dir.path(), coordinator.clone()).unwrap();
    assert!(with_timeout(coordinator.await_release("before", &stop)).await);

    let waiter = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            let stop = StopSignal::new();
            coordinator.await_release("after", &stop).await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    write_release_marker(dir.path(), "after").unwrap();

    assert!(with_timeout(waiter).await.unwrap());
}

#[tokio::test]
async fn a_release_marker_opens_one_run_only() {
    init_tracing();

    let dir = tempfile::tempdir().unwrap();
    let settings = Settings {
        gate_dir: Some(dir.path().to_path_buf()),
        ..quiet_settings()
    };
    let opts = RunOptionsBuilder::dry_run("nightly", DryRunStatus::Completed)
        .approval("nightly")
        .build();

    let first_env = Environment::new(settings.clone());
    let _first_watcher = first_env.spawn_gate_watcher().unwrap();
    let marker = write_release_marker(dir.path(), "nightly").unwrap();
    let first = first_env.create_instance(&opts).unwrap();
    assert_eq!(with_timeout(first.run()).await.unwrap(), Termination::Completed);
    assert!(!marker.exists());

    let second_env = Environment::new(settings);
    let _second_watcher = second_env.spawn_gate_watcher().unwrap();
    let second = Arc::new(second_env.create_instance(&opts).unwrap());
    let runner = Arc::clone(&second);
    let task = tokio::spawn(async move { runner.run().await });

    let approval_state = || find(second.root(), "approval").map(|p| p.state());
    eventually(|| approval_state() == Some(PhaseState::Pending)).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(approval_state(), Some(PhaseState::Pending));

    assert!(second.stop(StopReason::Requested));
    let result = with_timeout(task).await.unwrap().unwrap();
    assert_eq!(result, Termination::Cancelled(StopReason::Requested));
    assert_eq!(
        find(second.root(), "program").unwrap().state(),
        PhaseState::Created
    );
}

#[tokio::test]
async fn timeout_fires_while_pending_on_approval() {
    init_tracing();

    let coordinator = Arc::new(LocalCoordinator::new());
    let gauge = Gauge::new();
    let phase = TimeoutExtension::new(
        Duration::from_millis(100),
        None,
        Box::new(ApprovalPhase::new(
            "never",
            "never",
            Box::new(GaugePhase::sleeping(
                "inner",
                gauge.clone(),
                Duration::from_millis(1),
            )),
        )),
    );
    let ctx = run_context(coordinator.clone(), "deploy", "r1");

    let started = Instant::now();
    let result = with_timeout(phase.run(&ctx)).await.unwrap();

    assert_eq!(result, Termination::Cancelled(StopReason::Timeout));
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(phase.children()[0].state(), PhaseState::Cancelled);
    assert!(gauge.started().is_empty());

    // The abandoned wait leaves nothing behind: a later release is simply kept.
    coordinator.release("never");
    let stop = StopSignal::new();
    assert!(with_timeout(coordinator.await_release("never", &stop)).await);
}

#[test]
fn marker_names_must_be_plain_file_names() {
    let dir = tempfile::tempdir().unwrap();
    for bad in ["", "..", "a/b"] {
        assert!(matches!(
            write_release_marker(dir.path(), bad),
            Err(RunError::Config(_))
        ));
    }
}

#[tokio::test]
async fn environment_release_writes_a_marker_when_configured() {
    let dir = tempfile::tempdir().unwrap();
    let env = Environment::new(Settings {
        gate_dir: Some(dir.path().to_path_buf()),
        ..quiet_settings()
    });

    env.release("nightly").unwrap();

    assert!(dir.path().join("nightly").is_file());
    let stop = StopSignal::new();
    assert!(with_timeout(env.coordinator().await_release("nightly", &stop)).await);
}
