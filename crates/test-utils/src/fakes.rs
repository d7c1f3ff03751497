#![allow(dead_code)]

//! Test doubles for sinks, cancellation requesters and phases.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use tokio::sync::Notify;

use runjob::output::{Fields, OutputLine, StorageSink};
use runjob::phase::{Phase, PhaseFuture, RunContext, StateCell};
use runjob::stop::CancellationRequester;
use runjob::types::{PhaseState, StopReason, Termination};

/// Sink that keeps every line it receives.
#[derive(Clone, Default)]
pub struct RecordingSink {
    lines: Arc<Mutex<Vec<(OutputLine, Fields)>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn texts(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .map(|(l, _)| l.text.clone())
            .collect()
    }

    pub fn lines(&self) -> Vec<(OutputLine, Fields)> {
        self.lines.lock().unwrap().clone()
    }
}

impl StorageSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    fn write_line(&mut self, line: &OutputLine, fields: &Fields) -> Result<()> {
        self.lines
            .lock()
            .unwrap()
            .push((line.clone(), fields.clone()));
        Ok(())
    }
}

/// Sink that fails every write and counts the attempts.
#[derive(Clone, Default)]
pub struct FailingSink {
    attempts: Arc<AtomicUsize>,
}

impl FailingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl StorageSink for FailingSink {
    fn name(&self) -> &str {
        "failing"
    }

    fn write_line(&mut self, _line: &OutputLine, _fields: &Fields) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!("disk full"))
    }
}

/// Sink that blocks for `delay` on every write before recording it.
#[derive(Clone)]
pub struct SlowSink {
    delay: Duration,
    inner: RecordingSink,
}

impl SlowSink {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            inner: RecordingSink::new(),
        }
    }

    pub fn texts(&self) -> Vec<String> {
        self.inner.texts()
    }
}

impl StorageSink for SlowSink {
    fn name(&self) -> &str {
        "slow"
    }

    fn write_line(&mut self, line: &OutputLine, fields: &Fields) -> Result<()> {
        std::thread::sleep(self.delay);
        self.inner.write_line(line, fields)
    }
}

/// Records stop requests instead of acting on them.
#[derive(Default)]
pub struct RecordingRequester {
    requests: Mutex<Vec<StopReason>>,
}

impl RecordingRequester {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<StopReason> {
        self.requests.lock().unwrap().clone()
    }
}

impl CancellationRequester for RecordingRequester {
    fn request_stop(&self, reason: StopReason) {
        self.requests.lock().unwrap().push(reason);
    }
}

/// Shared observations of a set of [`GaugePhase`]s.
#[derive(Default)]
pub struct Gauge {
    current: AtomicUsize,
    max: AtomicUsize,
    started: Mutex<Vec<String>>,
    finished: Mutex<Vec<String>>,
}

impl Gauge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Highest number of gauges observed running at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub fn finished(&self) -> Vec<String> {
        self.finished.lock().unwrap().clone()
    }

    fn enter(&self, label: &str) {
        self.started.lock().unwrap().push(label.to_string());
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self, label: &str) {
        self.current.fetch_sub(1, Ordering::SeqCst);
        self.finished.lock().unwrap().push(label.to_string());
    }
}

enum Hold {
    Sleep(Duration),
    Until(Arc<Notify>),
}

/// Leaf phase that reports to a [`Gauge`] and holds "running" for a while.
pub struct GaugePhase {
    label: String,
    gauge: Arc<Gauge>,
    hold: Hold,
    state: StateCell,
}

impl GaugePhase {
    pub fn sleeping(label: &str, gauge: Arc<Gauge>, duration: Duration) -> Self {
        Self {
            label: label.to_string(),
            gauge,
            hold: Hold::Sleep(duration),
            state: StateCell::new("gauge"),
        }
    }

    /// Runs until `release` is notified.
    pub fn until(label: &str, gauge: Arc<Gauge>, release: Arc<Notify>) -> Self {
        Self {
            label: label.to_string(),
            gauge,
            hold: Hold::Until(release),
            state: StateCell::new("gauge"),
        }
    }
}

impl Phase for GaugePhase {
    fn id(&self) -> &str {
        "gauge"
    }

    fn name(&self) -> &str {
        &self.label
    }

    fn state(&self) -> PhaseState {
        self.state.get()
    }

    fn run<'a>(&'a self, ctx: &'a RunContext) -> PhaseFuture<'a> {
        Box::pin(async move {
            self.state.set(PhaseState::Running);
            self.gauge.enter(&self.label);
            let hold = async {
                match &self.hold {
                    Hold::Sleep(d) => tokio::time::sleep(*d).await,
                    Hold::Until(n) => n.notified().await,
                }
            };
            let result = tokio::select! {
                _ = hold => Ok(Termination::Completed),
                reason = ctx.stop_signal().stopped() => Ok(Termination::Stopped(reason)),
            };
            self.gauge.exit(&self.label);
            self.state.finish(&result);
            result
        })
    }
}
