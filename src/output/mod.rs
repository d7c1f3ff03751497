// src/output/mod.rs

//! Output routing.
//!
//! Every line produced by the supervised process goes through
//! [`OutputRouter::route`], which:
//! - runs the configured [`parser`]s and forwards the merged fields to the
//!   [`TaskTracker`],
//! - appends the raw bytes to the [`TailBuffer`],
//! - hands the line to every [`StorageSink`], each on its own worker,
//! - notifies registered [`OutputObserver`]s (output warnings).
//!
//! Sink failures are logged and never reach the caller.

pub mod parser;
pub mod sink;
pub mod tail;

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::tracker::TaskTracker;

pub use parser::{Fields, KvParser, OutputParser, RegexFieldParser};
pub use sink::{ConsoleSink, FileSink, JsonLinesSink, StorageSink};
pub use tail::TailBuffer;

/// One line of process output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    /// Position in the instance's output, starting at 0.
    pub seq: u64,
    pub text: String,
    /// True for stderr.
    pub is_error: bool,
    /// Phase that produced the line.
    pub source: String,
}

/// Synchronous hook invoked for every routed line.
pub trait OutputObserver: Send + Sync {
    fn new_output(&self, line: &OutputLine);
}

type SinkMessage = (OutputLine, Arc<Fields>);

struct SinkWorker {
    name: String,
    tx: mpsc::UnboundedSender<SinkMessage>,
    handle: JoinHandle<()>,
}

/// Fans output lines out to parsers, the tail buffer, sinks and observers.
pub struct OutputRouter {
    parsers: Vec<Box<dyn OutputParser>>,
    tracker: Arc<TaskTracker>,
    tail: Mutex<TailBuffer>,
    sinks: Mutex<Vec<SinkWorker>>,
    observers: Mutex<Vec<Arc<dyn OutputObserver>>>,
    next_seq: Mutex<u64>,
}

impl std::fmt::Debug for OutputRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputRouter")
            .field("parsers", &self.parsers.len())
            .field("tail_capacity", &lock(&self.tail).capacity())
            .finish_non_exhaustive()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl OutputRouter {
    pub fn new(tail_capacity: usize, tracker: Arc<TaskTracker>) -> Self {
        Self {
            parsers: Vec::new(),
            tracker,
            tail: Mutex::new(TailBuffer::new(tail_capacity)),
            sinks: Mutex::new(Vec::new()),
            observers: Mutex::new(Vec::new()),
            next_seq: Mutex::new(0),
        }
    }

    pub fn with_parser(mut self, parser: Box<dyn OutputParser>) -> Self {
        self.parsers.push(parser);
        self
    }

    /// Attach a sink; it gets a dedicated worker on the blocking pool.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn add_sink(&self, sink: Box<dyn StorageSink>) {
        let name = sink.name().to_string();
        let (tx, rx) = mpsc::unbounded_channel::<SinkMessage>();
        let handle = spawn_sink_worker(sink, rx);
        debug!(sink = %name, "storage sink attached");
        lock(&self.sinks).push(SinkWorker { name, tx, handle });
    }

    pub fn add_observer(&self, observer: Arc<dyn OutputObserver>) {
        lock(&self.observers).push(observer);
    }

    /// Allocate the next sequence number.
    pub fn next_seq(&self) -> u64 {
        let mut seq = lock(&self.next_seq);
        let current = *seq;
        *seq += 1;
        current
    }

    /// Route one line. Never blocks on sinks and never fails.
    pub fn route(&self, line: OutputLine) {
        let mut fields = Fields::new();
        for parser in &self.parsers {
            fields.extend(parser.parse(&line.text));
        }
        self.tracker.update(&fields);

        {
            let mut tail = lock(&self.tail);
            tail.write(line.text.as_bytes());
            tail.write(b"\n");
        }

        let fields = Arc::new(fields);
        for worker in lock(&self.sinks).iter() {
            if worker.tx.send((line.clone(), Arc::clone(&fields))).is_err() {
                warn!(sink = %worker.name, "sink worker gone; line not delivered");
            }
        }

        let observers: Vec<_> = lock(&self.observers).iter().cloned().collect();
        for observer in observers {
            observer.new_output(&line);
        }
    }

    /// Convenience for producers that don't track sequence numbers.
    pub fn route_text(&self, source: &str, text: impl Into<String>, is_error: bool) {
        let line = OutputLine {
            seq: self.next_seq(),
            text: text.into(),
            is_error,
            source: source.to_string(),
        };
        self.route(line);
    }

    pub fn tail(&self) -> Vec<u8> {
        lock(&self.tail).contents()
    }

    pub fn tail_lines(&self) -> Vec<String> {
        lock(&self.tail).lines()
    }

    /// Close all sinks and wait for them to drain and flush.
    ///
    /// Lines routed after this call are kept in the tail buffer only.
    pub async fn close(&self) {
        let workers: Vec<SinkWorker> = lock(&self.sinks).drain(..).collect();
        for SinkWorker { name, tx, handle } in workers {
            drop(tx);
            if let Err(e) = handle.await {
                warn!(sink = %name, error = %e, "sink worker panicked");
            }
        }
    }
}

fn spawn_sink_worker(
    mut sink: Box<dyn StorageSink>,
    mut rx: mpsc::UnboundedReceiver<SinkMessage>,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let mut failures: u64 = 0;
        while let Some((line, fields)) = rx.blocking_recv() {
            if let Err(e) = sink.write_line(&line, &fields) {
                failures += 1;
                // Log the first failure and then every 100th to avoid flooding.
                if failures == 1 || failures % 100 == 0 {
                    warn!(sink = sink.name(), failures, error = %e, "failed to store output line");
                }
            }
        }
        if let Err(e) = sink.flush() {
            warn!(sink = sink.name(), error = %e, "failed to flush sink");
        }
        debug!(sink = sink.name(), "sink worker finished");
    })
}
