// tests/phase_tree.rs

use std::time::Duration;

use runjob::builder::{PhaseTreeBuilder, build_parsers};
use runjob::errors::RunError;
use runjob::options::RunOptions;
use runjob::phase::{Phase, find, walk};
use runjob::types::{ExclusionPolicy, PhaseState};
use runjob_test_utils::builders::RunOptionsBuilder;
use runjob_test_utils::init_tracing;

fn ids(opts: &RunOptions) -> Vec<String> {
    let tree = PhaseTreeBuilder::new(opts).build().unwrap();
    walk(tree.as_ref()).into_iter().map(|s| s.id).collect()
}

#[test]
fn bare_command_is_a_single_program_phase() {
    let opts = RunOptionsBuilder::command("echo", &["hi"]).build();
    assert_eq!(ids(&opts), vec!["program"]);
}

#[test]
fn decorators_wrap_inside_out() {
    init_tracing();

    let opts = RunOptionsBuilder::shell("backup", "true")
        .exclusive(ExclusionPolicy::Skip)
        .serial()
        .checkpoint("cp")
        .depends_on("db")
        .approval("ok")
        .timeout(Duration::from_secs(10))
        .warn_time("1h")
        .warn_output("ERROR")
        .build();

    let tree = PhaseTreeBuilder::new(&opts).build().unwrap();
    let snapshot = walk(tree.as_ref());
    let order: Vec<(&str, usize)> = snapshot
        .iter()
        .map(|s| (s.id.as_str(), s.depth))
        .collect();

    assert_eq!(
        order,
        vec![
            ("output_warning", 0),
            ("time_warning", 1),
            ("timeout", 2),
            ("approval", 3),
            ("dependency_sequence", 4),
            ("dependency", 5),
            ("checkpoint_sequence", 5),
            ("checkpoint", 6),
            ("queue", 6),
            ("exclusion", 7),
            ("program", 8),
        ]
    );
    assert!(snapshot.iter().all(|s| s.state == PhaseState::Created));
}

#[test]
fn serial_and_max_concurrent_conflict() {
    let opts = RunOptionsBuilder::command("true", &[])
        .serial()
        .max_concurrent(2)
        .build();

    match PhaseTreeBuilder::new(&opts).build() {
        Err(RunError::Config(msg)) => assert!(msg.contains("serial")),
        Err(e) => panic!("expected Config error, got {e:?}"),
        Ok(_) => panic!("expected Config error, got a tree"),
    }
}

#[test]
fn queue_group_defaults_to_the_job_id() {
    let opts = RunOptionsBuilder::shell("nightly", "true").serial().build();
    let tree = PhaseTreeBuilder::new(&opts).build().unwrap();
    assert_eq!(find(tree.as_ref(), "queue").unwrap().name(), "nightly");

    let opts = RunOptionsBuilder::shell("nightly", "true")
        .max_concurrent(3)
        .queue_group("shared")
        .build();
    let tree = PhaseTreeBuilder::new(&opts).build().unwrap();
    assert_eq!(find(tree.as_ref(), "queue").unwrap().name(), "shared");
}

#[test]
fn explicit_exclusion_group_overrides_job_id() {
    let mut opts = RunOptionsBuilder::shell("a", "true").build();
    opts.exclusive_group = Some("db-maintenance".to_string());

    let tree = PhaseTreeBuilder::new(&opts).build().unwrap();
    assert_eq!(
        find(tree.as_ref(), "exclusion").unwrap().name(),
        "db-maintenance"
    );
}

#[test]
fn zero_timeout_adds_no_timeout_phase() {
    let opts = RunOptionsBuilder::shell("j", "true")
        .timeout(Duration::ZERO)
        .build();
    assert_eq!(ids(&opts), vec!["program"]);
}

#[test]
fn invalid_warn_output_pattern_skips_the_decorator() {
    init_tracing();

    let opts = RunOptionsBuilder::shell("j", "true")
        .warn_output("fine")
        .warn_output("(unclosed")
        .build();
    let ids = ids(&opts);
    assert!(!ids.contains(&"output_warning".to_string()));
    assert_eq!(ids, vec!["program"]);
}

#[test]
fn invalid_warn_time_is_a_config_error() {
    let opts = RunOptionsBuilder::shell("j", "true").warn_time("1w").build();
    assert!(matches!(
        PhaseTreeBuilder::new(&opts).build(),
        Err(RunError::Config(_))
    ));
}

#[test]
fn unknown_timeout_signal_is_a_config_error() {
    let opts = RunOptionsBuilder::shell("j", "true")
        .timeout(Duration::from_secs(1))
        .timeout_signal("SIGNOPE")
        .build();
    assert!(matches!(
        PhaseTreeBuilder::new(&opts).build(),
        Err(RunError::Config(_))
    ));
}

#[test]
fn invalid_field_pattern_is_fatal() {
    let opts = RunOptionsBuilder::shell("j", "true")
        .field_pattern("(?P<ms>\\d+")
        .build();
    match build_parsers(&opts) {
        Err(RunError::Pattern { pattern, .. }) => assert_eq!(pattern, "(?P<ms>\\d+"),
        Err(e) => panic!("expected Pattern error, got {e:?}"),
        Ok(_) => panic!("expected Pattern error"),
    }
}

#[test]
fn parsers_follow_the_options() {
    let plain = RunOptionsBuilder::shell("j", "true").build();
    assert!(build_parsers(&plain).unwrap().is_empty());

    let both = RunOptionsBuilder::shell("j", "true")
        .kv_filter()
        .field_pattern(r"took (?P<ms>\d+)ms")
        .build();
    assert_eq!(build_parsers(&both).unwrap().len(), 2);
}

#[test]
fn dry_run_replaces_the_program() {
    let opts = RunOptionsBuilder::dry_run("j", runjob::phase::DryRunStatus::Skipped)
        .serial()
        .build();
    let tree = PhaseTreeBuilder::new(&opts).build().unwrap();
    let program = find(tree.as_ref(), "program").unwrap();
    assert!(program.children().is_empty());
    assert_eq!(ids(&opts), vec!["queue", "program"]);
}
