// tests/signals.rs

use std::sync::Arc;

use runjob::errors::RunError;
use runjob::signal::{SignalController, parse_signal};
use runjob::stop::StopSignal;
use runjob::types::StopReason;
use runjob_test_utils::fakes::RecordingRequester;
use runjob_test_utils::init_tracing;

#[test]
fn signals_parse_by_number_and_name() {
    assert_eq!(parse_signal("15").unwrap(), 15);
    assert_eq!(parse_signal("SIGTERM").unwrap(), 15);
    assert_eq!(parse_signal("term").unwrap(), 15);
    assert_eq!(parse_signal(" SigInt ").unwrap(), 2);
    assert_eq!(parse_signal("KILL").unwrap(), 9);
}

#[cfg(unix)]
#[test]
fn platform_signals_match_their_names() {
    assert_eq!(parse_signal("usr1").unwrap(), parse_signal("SIGUSR1").unwrap());
    assert_ne!(parse_signal("USR1").unwrap(), parse_signal("USR2").unwrap());
}

#[test]
fn unknown_signals_are_config_errors() {
    for bad in ["", "0", "-5", "SIGNOPE", "TERMINATE"] {
        assert!(
            matches!(parse_signal(bad), Err(RunError::Config(_))),
            "'{bad}' should be rejected"
        );
    }
}

#[test]
fn controller_forwards_stop_reasons() {
    init_tracing();

    let requester = Arc::new(RecordingRequester::new());
    let controller = SignalController::new(requester.clone(), Some(10));
    assert_eq!(controller.timeout_signal(), Some(10));

    controller.on_terminate();
    controller.on_timeout_signal();

    assert_eq!(
        requester.requests(),
        vec![StopReason::Signal, StopReason::Timeout]
    );
}

#[test]
fn first_signal_decides_the_stop_reason() {
    let stop = StopSignal::new();
    let controller = SignalController::new(Arc::new(stop.clone()), None);

    controller.on_timeout_signal();
    controller.on_terminate();

    assert!(stop.is_stopped());
    assert_eq!(stop.reason(), Some(StopReason::Timeout));
}

#[cfg(unix)]
#[tokio::test]
async fn installed_handler_turns_sigterm_into_a_stop() {
    init_tracing();

    let stop = StopSignal::new();
    let _guard = SignalController::new(Arc::new(stop.clone()), None)
        .install()
        .unwrap();

    let status = std::process::Command::new("kill")
        .args(["-TERM", &std::process::id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    let reason = runjob_test_utils::with_timeout(stop.stopped()).await;
    assert_eq!(reason, StopReason::Signal);
}
