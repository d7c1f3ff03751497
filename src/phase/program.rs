// src/phase/program.rs

//! The leaf phase: spawn the supervised command and stream its output.

use std::process::{ExitStatus, Stdio};
use std::sync::Mutex;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{Phase, PhaseFuture, PhaseResult, RunContext, StateCell, sleep_until_opt};
use crate::errors::RunError;
use crate::output::OutputLine;
use crate::types::{PhaseState, StopReason, Termination};

pub const PROGRAM: &str = "program";

/// Lines buffered between the pipe readers and the phase loop.
const LINE_CHANNEL_CAPACITY: usize = 256;

#[cfg(unix)]
const DEFAULT_KILL_SIGNAL: i32 = libc::SIGTERM;
#[cfg(not(unix))]
const DEFAULT_KILL_SIGNAL: i32 = 15;

/// Map a raw return code to a failure code.
///
/// `0` is success; a positive code is reported as is; a negative code means
/// "killed by signal N" and becomes `128 + N`.
pub fn map_return_code(rc: i32) -> Option<i32> {
    match rc {
        0 => None,
        rc if rc > 0 => Some(rc),
        rc => Some(128 + rc.saturating_abs()),
    }
}

#[cfg(unix)]
fn return_code(status: &ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => -signal,
        (None, None) => -1,
    }
}

#[cfg(not(unix))]
fn return_code(status: &ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

pub struct ProgramPhase {
    program: String,
    args: Vec<String>,
    capture: bool,
    state: StateCell,
    exit_code: Mutex<Option<i32>>,
}

impl ProgramPhase {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            capture: true,
            state: StateCell::new(PROGRAM),
            exit_code: Mutex::new(None),
        }
    }

    /// When disabled the child inherits the supervisor's stdout/stderr and no
    /// output reaches the router.
    pub fn with_capture(mut self, capture: bool) -> Self {
        self.capture = capture;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Raw return code of the finished process (negative: killed by signal).
    pub fn exit_code(&self) -> Option<i32> {
        *self.exit_code.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn execute(&self, ctx: &RunContext) -> PhaseResult {
        let stream = || {
            if self.capture {
                Stdio::piped()
            } else {
                Stdio::inherit()
            }
        };

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdout(stream())
            .stderr(stream())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning '{}'", self.program))?;

        info!(
            instance = %ctx.instance_id(),
            program = %self.program,
            pid = child.id(),
            "process started"
        );

        let (line_tx, mut line_rx) = mpsc::channel::<(String, bool)>(LINE_CHANNEL_CAPACITY);
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, false, line_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, true, line_tx.clone());
        }
        drop(line_tx);

        let stop = ctx.stop_signal();
        let mut status: Option<ExitStatus> = None;
        let mut lines_open = true;
        let mut stop_seen = false;
        let mut stopped_by: Option<StopReason> = None;
        let mut kill_at: Option<Instant> = None;
        // After a stop, output keeps draining until it stays idle for the grace period.
        let mut drain_until: Option<Instant> = None;
        let mut pipes_closed = false;

        let status = loop {
            if let Some(status) = status {
                if !lines_open {
                    break status;
                }
                if stop_seen && !pipes_closed && drain_until.is_none() {
                    drain_until = Some(Instant::now() + ctx.stop_grace());
                }
            }

            tokio::select! {
                reason = stop.stopped(), if !stop_seen => {
                    stop_seen = true;
                    if status.is_none() {
                        stopped_by = Some(reason);
                        let signal = ctx.kill_signal().unwrap_or(DEFAULT_KILL_SIGNAL);
                        info!(
                            instance = %ctx.instance_id(),
                            %reason,
                            signal,
                            "stopping process"
                        );
                        send_signal(&mut child, signal);
                        kill_at = Some(Instant::now() + ctx.stop_grace());
                    } else {
                        debug!(instance = %ctx.instance_id(), %reason, "stop after process exit");
                    }
                }
                _ = sleep_until_opt(kill_at), if kill_at.is_some() && status.is_none() => {
                    warn!(
                        instance = %ctx.instance_id(),
                        grace = ?ctx.stop_grace(),
                        "process ignored termination signal; killing"
                    );
                    if let Err(e) = child.start_kill() {
                        warn!(error = %e, "failed to kill child process");
                    }
                    kill_at = None;
                }
                _ = sleep_until_opt(drain_until), if drain_until.is_some() => {
                    warn!(
                        instance = %ctx.instance_id(),
                        "output pipes still open after exit; closing"
                    );
                    line_rx.close();
                    pipes_closed = true;
                    drain_until = None;
                }
                line = line_rx.recv(), if lines_open => match line {
                    Some((text, is_error)) => {
                        let output = ctx.output();
                        output.route(OutputLine {
                            seq: output.next_seq(),
                            text,
                            is_error,
                            source: PROGRAM.to_string(),
                        });
                        if drain_until.is_some() {
                            drain_until = Some(Instant::now() + ctx.stop_grace());
                        }
                    }
                    None => lines_open = false,
                },
                res = child.wait(), if status.is_none() => {
                    status = Some(res.with_context(|| format!("waiting for '{}'", self.program))?);
                }
            }
        };

        let rc = return_code(&status);
        *self.exit_code.lock().unwrap_or_else(|e| e.into_inner()) = Some(rc);
        info!(instance = %ctx.instance_id(), exit_code = rc, "process exited");

        if let Some(reason) = stopped_by {
            return Ok(Termination::Stopped(reason));
        }
        match map_return_code(rc) {
            None => Ok(Termination::Completed),
            Some(code) => Err(RunError::ProgramExecution { code }),
        }
    }
}

#[cfg(unix)]
fn send_signal(child: &Child, signal: i32) {
    let Some(pid) = child.id() else {
        return;
    };
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: plain kill(2) on a pid we spawned and have not reaped yet.
    let rc = unsafe { libc::kill(pid, signal) };
    if rc != 0 {
        warn!(
            pid,
            signal,
            error = %std::io::Error::last_os_error(),
            "failed to signal child process"
        );
    }
}

#[cfg(not(unix))]
fn send_signal(child: &mut Child, _signal: i32) {
    if let Err(e) = child.start_kill() {
        warn!(error = %e, "failed to kill child process");
    }
}

fn spawn_reader<R>(reader: R, is_error: bool, tx: mpsc::Sender<(String, bool)>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    if buf.last() == Some(&b'\n') {
                        buf.pop();
                        if buf.last() == Some(&b'\r') {
                            buf.pop();
                        }
                    }
                    let line = String::from_utf8_lossy(&buf).into_owned();
                    if tx.send((line, is_error)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(is_error, error = %e, "output pipe read failed");
                    break;
                }
            }
        }
    });
}

impl Phase for ProgramPhase {
    fn id(&self) -> &str {
        PROGRAM
    }

    fn name(&self) -> &str {
        &self.program
    }

    fn state(&self) -> PhaseState {
        self.state.get()
    }

    fn run<'a>(&'a self, ctx: &'a RunContext) -> PhaseFuture<'a> {
        Box::pin(async move {
            if let Some(reason) = ctx.stop_signal().reason() {
                self.state.set(PhaseState::Stopped);
                return Ok(Termination::Stopped(reason));
            }
            self.state.set(PhaseState::Running);
            let result = self.execute(ctx).await;
            self.state.finish(&result);
            result
        })
    }
}

