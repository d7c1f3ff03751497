// tests/output_routing.rs

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use runjob::output::parser::{iso_date_time, normalize_date_time, parse_aliases};
use runjob::output::{
    FileSink, JsonLinesSink, KvParser, OutputLine, OutputObserver, OutputParser, OutputRouter,
    RegexFieldParser, StorageSink,
};
use runjob::tracker::TaskTracker;
use runjob_test_utils::fakes::{FailingSink, RecordingSink, SlowSink};
use runjob_test_utils::{init_tracing, with_timeout};

fn line(seq: u64, text: &str) -> OutputLine {
    OutputLine {
        seq,
        text: text.to_string(),
        is_error: false,
        source: "program".to_string(),
    }
}

#[test]
fn kv_parser_reads_bracketed_and_plain_values() {
    let parser = KvParser::new();

    let fields = parser.parse("event=[downloading] completed=[3] total=[5]");
    assert_eq!(fields.get("event").map(String::as_str), Some("downloading"));
    assert_eq!(fields.get("completed").map(String::as_str), Some("3"));
    assert_eq!(fields.get("total").map(String::as_str), Some("5"));
    assert_eq!(fields.len(), 3);

    let fields = parser.parse("status=ok message=[disk almost full]");
    assert_eq!(fields.get("status").map(String::as_str), Some("ok"));
    assert_eq!(
        fields.get("message").map(String::as_str),
        Some("disk almost full")
    );

    assert!(parser.parse("nothing to see here").is_empty());
}

#[test]
fn kv_parser_trims_and_renames() {
    let aliases: HashMap<String, String> = parse_aliases(&["count=completed", "bogus", "=x"]);
    assert_eq!(aliases.len(), 1);

    let parser = KvParser::new().with_trim_value(",").with_aliases(aliases);
    let fields = parser.parse("count=[3,] total=[5,]");

    assert_eq!(fields.get("completed").map(String::as_str), Some("3"));
    assert_eq!(fields.get("total").map(String::as_str), Some("5"));
    assert!(!fields.contains_key("count"));
}

#[test]
fn timestamps_are_normalised() {
    assert_eq!(
        normalize_date_time("2024-01-02 03:04:05").as_deref(),
        Some("2024-01-02T03:04:05Z")
    );
    assert_eq!(
        normalize_date_time("2024-01-02T03:04:05+02:00").as_deref(),
        Some("2024-01-02T03:04:05+02:00")
    );
    assert_eq!(normalize_date_time("yesterday"), None);

    let parser = KvParser::new().with_post_processor(iso_date_time("timestamp"));
    let fields = parser.parse("timestamp=[2024-01-02 03:04:05] event=[tick]");
    assert_eq!(
        fields.get("timestamp").map(String::as_str),
        Some("2024-01-02T03:04:05Z")
    );

    let fields = parser.parse("timestamp=[soon]");
    assert_eq!(fields.get("timestamp").map(String::as_str), Some("soon"));
}

#[test]
fn regex_parser_uses_named_groups() {
    let parser = RegexFieldParser::new(r"took (?P<ms>\d+)ms(?: for (?P<what>\w+))?").unwrap();

    let fields = parser.parse("request took 42ms");
    assert_eq!(fields.get("ms").map(String::as_str), Some("42"));
    assert!(!fields.contains_key("what"));

    let fields = parser.parse("took 7ms for upload");
    assert_eq!(fields.get("what").map(String::as_str), Some("upload"));

    assert!(parser.parse("no timing").is_empty());
}

#[tokio::test]
async fn router_feeds_tracker_tail_and_sinks_in_order() {
    init_tracing();

    let tracker = Arc::new(TaskTracker::new());
    let router = OutputRouter::new(1024, tracker.clone()).with_parser(Box::new(KvParser::new()));
    let sink = RecordingSink::new();
    router.add_sink(Box::new(sink.clone()));

    router.route_text("program", "event=[start] completed=[1] total=[2]", false);
    router.route_text("program", "plain line", true);
    router.route_text("program", "event=[done] completed=[2]", false);
    with_timeout(router.close()).await;

    assert_eq!(
        sink.texts(),
        vec![
            "event=[start] completed=[1] total=[2]",
            "plain line",
            "event=[done] completed=[2]"
        ]
    );
    let seqs: Vec<u64> = sink.lines().iter().map(|(l, _)| l.seq).collect();
    assert_eq!(seqs, vec![0, 1, 2]);
    assert!(sink.lines()[1].0.is_error);
    assert!(sink.lines()[1].1.is_empty());

    assert_eq!(tracker.events(), vec!["start", "done"]);
    assert_eq!(tracker.update_count(), 2);
    let progress = tracker.progress().unwrap();
    assert_eq!(progress.completed, "2");
    assert_eq!(progress.total.as_deref(), Some("2"));

    assert_eq!(router.tail_lines().len(), 3);
}

#[tokio::test]
async fn failing_sink_does_not_affect_others() {
    init_tracing();

    let router = OutputRouter::new(64, Arc::new(TaskTracker::new()));
    let failing = FailingSink::new();
    let recording = RecordingSink::new();
    router.add_sink(Box::new(failing.clone()));
    router.add_sink(Box::new(recording.clone()));

    for i in 0..5 {
        router.route_text("program", format!("line {i}"), false);
    }
    with_timeout(router.close()).await;

    assert_eq!(failing.attempts(), 5);
    assert_eq!(recording.texts().len(), 5);
}

#[tokio::test]
async fn slow_sink_does_not_block_routing() {
    init_tracing();

    let router = OutputRouter::new(64, Arc::new(TaskTracker::new()));
    let slow = SlowSink::new(Duration::from_millis(50));
    router.add_sink(Box::new(slow.clone()));

    let started = Instant::now();
    for i in 0..10 {
        router.route_text("program", format!("line {i}"), false);
    }
    assert!(started.elapsed() < Duration::from_millis(250));
    assert_eq!(router.tail_lines().len(), 10);

    with_timeout(router.close()).await;
    let expected: Vec<String> = (0..10).map(|i| format!("line {i}")).collect();
    assert_eq!(slow.texts(), expected);
}

#[tokio::test]
async fn tail_keeps_only_the_most_recent_bytes() {
    let router = OutputRouter::new(8, Arc::new(TaskTracker::new()));
    router.route_text("program", "abcdef", false);
    router.route_text("program", "ghij", false);

    assert_eq!(router.tail(), b"ef\nghij\n".to_vec());
    assert_eq!(router.tail_lines(), vec!["ef", "ghij"]);
}

#[derive(Default)]
struct Collect(Mutex<Vec<String>>);

impl OutputObserver for Collect {
    fn new_output(&self, line: &OutputLine) {
        self.0.lock().unwrap().push(line.text.clone());
    }
}

#[tokio::test]
async fn observers_see_lines_synchronously() {
    let router = OutputRouter::new(64, Arc::new(TaskTracker::new()));
    let observer = Arc::new(Collect::default());
    router.add_observer(observer.clone());

    router.route(line(router.next_seq(), "one"));
    router.route(line(router.next_seq(), "two"));

    assert_eq!(*observer.0.lock().unwrap(), vec!["one", "two"]);
}

#[test]
fn jsonl_sink_writes_one_record_per_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("job").join("run.jsonl");

    let mut sink = JsonLinesSink::create(&path).unwrap();
    let mut fields = runjob::output::Fields::new();
    fields.insert("completed".to_string(), "3".to_string());
    sink.write_line(&line(0, "completed=[3]"), &fields).unwrap();
    let mut err = line(1, "boom");
    err.is_error = true;
    sink.write_line(&err, &runjob::output::Fields::new()).unwrap();
    sink.flush().unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    let records: Vec<serde_json::Value> = contents
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["seq"], 0);
    assert_eq!(records[0]["stream"], "stdout");
    assert_eq!(records[0]["line"], "completed=[3]");
    assert_eq!(records[0]["fields"]["completed"], "3");
    assert!(records[0]["timestamp"].as_str().unwrap().ends_with('Z'));
    assert_eq!(records[1]["stream"], "stderr");
    assert!(records[1].get("fields").is_none());
}

#[test]
fn file_sink_appends_raw_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.log");

    for text in ["first", "second"] {
        let mut sink = FileSink::create(&path).unwrap();
        sink.write_line(&line(0, text), &runjob::output::Fields::new())
            .unwrap();
        sink.flush().unwrap();
    }

    assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
}
