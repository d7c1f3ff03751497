// src/phase/warning.rs

//! Warning decorators. They raise task warnings and never change the
//! outcome of the phase they wrap.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tokio::time::Instant;

use super::{Phase, PhaseFuture, RunContext, StateCell, sleep_until_opt};
use crate::errors::{Result, RunError};
use crate::output::{OutputLine, OutputObserver};
use crate::tracker::TaskTracker;
use crate::types::PhaseState;

pub const TIME_WARNING: &str = "time_warning";
pub const OUTPUT_WARNING: &str = "output_warning";

/// Execution time threshold written as `<integer><s|m|h|d>`, e.g. `90s`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarnTime {
    text: String,
    duration: Duration,
}

impl WarnTime {
    pub fn parse(s: &str) -> std::result::Result<Self, String> {
        let s = s.trim();
        let idx = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("warn time '{s}' is missing a unit (s, m, h or d)"))?;
        let (num, unit) = s.split_at(idx);
        if num.is_empty() {
            return Err(format!("warn time '{s}' must start with a number"));
        }
        let value: u64 = num
            .parse()
            .map_err(|e| format!("invalid warn time number '{num}': {e}"))?;
        let multiplier = match unit {
            "s" => 1,
            "m" => 60,
            "h" => 60 * 60,
            "d" => 24 * 60 * 60,
            _ => {
                return Err(format!(
                    "unsupported warn time unit '{unit}'; expected s, m, h or d"
                ));
            }
        };
        let secs = value
            .checked_mul(multiplier)
            .ok_or_else(|| format!("warn time '{s}' is too large"))?;
        Ok(Self {
            text: s.to_string(),
            duration: Duration::from_secs(secs),
        })
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl FromStr for WarnTime {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Raises `exec_time><threshold>` once for every threshold the wrapped
/// phase outlives.
pub struct TimeWarningExtension {
    thresholds: Vec<WarnTime>,
    inner: Box<dyn Phase>,
    state: StateCell,
}

impl TimeWarningExtension {
    pub fn new(mut thresholds: Vec<WarnTime>, inner: Box<dyn Phase>) -> Self {
        thresholds.sort_by_key(|w| w.duration);
        thresholds.dedup_by_key(|w| w.duration);
        Self {
            thresholds,
            inner,
            state: StateCell::new(TIME_WARNING),
        }
    }

    pub fn thresholds(&self) -> &[WarnTime] {
        &self.thresholds
    }
}

impl Phase for TimeWarningExtension {
    fn id(&self) -> &str {
        TIME_WARNING
    }

    fn name(&self) -> &str {
        TIME_WARNING
    }

    fn state(&self) -> PhaseState {
        self.state.get()
    }

    fn children(&self) -> Vec<&dyn Phase> {
        vec![self.inner.as_ref()]
    }

    fn run<'a>(&'a self, ctx: &'a RunContext) -> PhaseFuture<'a> {
        Box::pin(async move {
            self.state.set(PhaseState::Running);
            let started = Instant::now();
            let mut remaining = self.thresholds.iter();
            let mut next = remaining.next();
            let mut inner = self.inner.run(ctx);

            let result = loop {
                let deadline = next.and_then(|w| started.checked_add(w.duration));
                tokio::select! {
                    result = &mut inner => break result,
                    _ = sleep_until_opt(deadline), if deadline.is_some() => {
                        if let Some(threshold) = next {
                            ctx.tracker().warning(format!("exec_time>{}", threshold.text));
                        }
                        next = remaining.next();
                    }
                }
            };

            self.state.finish(&result);
            result
        })
    }
}

struct OutputMatcher {
    patterns: Vec<Regex>,
    tracker: Arc<TaskTracker>,
}

impl OutputObserver for OutputMatcher {
    fn new_output(&self, line: &OutputLine) {
        for pattern in &self.patterns {
            if pattern.is_match(&line.text) {
                self.tracker.warning(format!("output=~{}", pattern.as_str()));
            }
        }
    }
}

/// Raises `output=~<pattern>` for every output line matching one of the
/// patterns.
pub struct OutputWarningExtension {
    patterns: Vec<Regex>,
    inner: Box<dyn Phase>,
    state: StateCell,
}

impl OutputWarningExtension {
    /// Fails on the first pattern that does not compile.
    pub fn new<S: AsRef<str>>(patterns: &[S], inner: Box<dyn Phase>) -> Result<Self> {
        Ok(Self::from_compiled(Self::compile(patterns)?, inner))
    }

    /// Compile without consuming an inner phase.
    pub fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Regex>> {
        patterns
            .iter()
            .map(|p| {
                Regex::new(p.as_ref()).map_err(|e| RunError::Pattern {
                    pattern: p.as_ref().to_string(),
                    message: e.to_string(),
                })
            })
            .collect()
    }

    pub fn from_compiled(patterns: Vec<Regex>, inner: Box<dyn Phase>) -> Self {
        Self {
            patterns,
            inner,
            state: StateCell::new(OUTPUT_WARNING),
        }
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(Regex::as_str)
    }
}

impl Phase for OutputWarningExtension {
    fn id(&self) -> &str {
        OUTPUT_WARNING
    }

    fn name(&self) -> &str {
        OUTPUT_WARNING
    }

    fn state(&self) -> PhaseState {
        self.state.get()
    }

    fn children(&self) -> Vec<&dyn Phase> {
        vec![self.inner.as_ref()]
    }

    fn run<'a>(&'a self, ctx: &'a RunContext) -> PhaseFuture<'a> {
        Box::pin(async move {
            self.state.set(PhaseState::Running);
            ctx.output().add_observer(Arc::new(OutputMatcher {
                patterns: self.patterns.clone(),
                tracker: Arc::clone(ctx.tracker()),
            }));
            let result = self.inner.run(ctx).await;
            self.state.finish(&result);
            result
        })
    }
}
