//! # guestrs Subprocess Runner (`common::process::runner`)
//!
//! File: engine/src/common/process/runner.rs
//!
//! ## Overview
//!
//! Runs a local process (usually the elevation tool) with redirected
//! stdout/stderr and returns everything it printed together with its exit
//! metadata, under an optional execution timeout.
//!
//! ## Architecture
//!
//! - Each output stream is drained by its own tokio task which reads
//!   line by line and forwards every line over an unbounded channel. When the
//!   stream reaches end-of-data the task returns and drops its sender: a
//!   closed channel *is* the "stream closed" signal, an empty line is just an
//!   empty line.
//! - The caller's future collects lines into two accumulators and completes
//!   only when **all three** conditions hold: the process exited, stdout
//!   closed, stderr closed. All three share one deadline.
//! - A timeout is a result, not an error: the returned `CommandResult` has
//!   `has_exited == false` and carries the partial text gathered so far.
//! - The drain tasks are owned by a guard that aborts them on drop, so they
//!   are released on every exit path. The child handle is dropped on return;
//!   a timed-out process keeps running (it is not killed here).
//!
//! The `ProcessRunner` trait is the seam the elevation tool invoker and the
//! concrete collaborators (`wmic`, `taskkill`, `net use`) run through; tests
//! substitute scripted runners.
//!
use crate::common::process::command_spec::CommandSpec;
use crate::core::error::{GuestError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of one local process run.
///
/// If `has_exited` is `true`, `exit_code` and `exit_time` are present. After a
/// timeout `has_exited` is `false` and `stdout`/`stderr` hold whatever was
/// captured before the deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub exit_time: Option<DateTime<Local>>,
    pub has_exited: bool,
}

impl CommandResult {
    /// A completed run.
    pub fn exited(stdout: String, stderr: String, exit_code: i32, exit_time: DateTime<Local>) -> Self {
        Self {
            stdout,
            stderr,
            exit_code: Some(exit_code),
            exit_time: Some(exit_time),
            has_exited: true,
        }
    }

    /// A run that did not finish before its deadline.
    pub fn timed_out(stdout: String, stderr: String) -> Self {
        Self {
            stdout,
            stderr,
            exit_code: None,
            exit_time: None,
            has_exited: false,
        }
    }

    /// Exited with code 0.
    pub fn success(&self) -> bool {
        self.has_exited && self.exit_code == Some(0)
    }

    /// Both streams in the `StdErr:...StdOut:...` shape used in logs, with
    /// line breaks flattened.
    pub fn combined_output(&self) -> String {
        format!("StdErr:{}StdOut:{}", self.stderr, self.stdout)
            .replace(['\r', '\n'], " ")
    }
}

/// A local process started without waiting for it.
#[async_trait]
pub trait LocalProcess: Send {
    /// OS process id, if the process is still known to the runtime.
    fn id(&self) -> Option<u32>;
    /// Forcefully terminates the process.
    async fn kill(&mut self) -> Result<()>;
}

/// Runs local processes.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runs `spec` to completion or until `execution_timeout` elapses
    /// (`None` waits indefinitely). Only a failure to start is an error.
    async fn run(
        &self,
        spec: &CommandSpec,
        execution_timeout: Option<Duration>,
    ) -> Result<CommandResult>;

    /// Starts `spec` in the background with its output discarded.
    fn spawn_background(&self, spec: &CommandSpec) -> Result<Box<dyn LocalProcess>>;
}

/// The real runner, backed by `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct SubprocessRunner {
    /// Value masked out of log lines (the guest password).
    secret: Option<String>,
}

impl SubprocessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// A runner that never logs `secret` verbatim.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            secret: Some(secret.into()),
        }
    }
}

#[async_trait]
impl ProcessRunner for SubprocessRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        execution_timeout: Option<Duration>,
    ) -> Result<CommandResult> {
        info!("Running: {}", spec.display_masked(self.secret.as_deref()));

        let mut child = spec
            .to_command(Stdio::piped(), Stdio::piped())
            .spawn()
            .map_err(|e| GuestError::Spawn {
                program: spec.program_display(),
                source: e,
            })?;

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (err_tx, err_rx) = mpsc::unbounded_channel();
        let mut drains = DrainTasks::default();
        if let Some(stdout) = child.stdout.take() {
            drains.push(tokio::spawn(pump_lines(stdout, out_tx)));
        }
        if let Some(stderr) = child.stderr.take() {
            drains.push(tokio::spawn(pump_lines(stderr, err_tx)));
        }

        let deadline = execution_timeout.map(|t| Instant::now() + t);
        let result = collect(&mut child, out_rx, err_rx, deadline).await?;
        if result.has_exited {
            debug!("{}", result.combined_output());
        } else {
            warn!(
                "'{}' did not finish within {:?}; returning partial output. {}",
                spec.program_display(),
                execution_timeout,
                result.combined_output()
            );
        }
        // `drains` is dropped here: any task still reading is aborted.
        Ok(result)
    }

    fn spawn_background(&self, spec: &CommandSpec) -> Result<Box<dyn LocalProcess>> {
        info!(
            "Starting in background: {}",
            spec.display_masked(self.secret.as_deref())
        );
        let child = spec
            .to_command(Stdio::null(), Stdio::null())
            .spawn()
            .map_err(|e| GuestError::Spawn {
                program: spec.program_display(),
                source: e,
            })?;
        Ok(Box::new(BackgroundChild { child }))
    }
}

/// Owns the stream drain tasks; aborts whatever is still running on drop.
#[derive(Default)]
struct DrainTasks(Vec<JoinHandle<()>>);

impl DrainTasks {
    fn push(&mut self, handle: JoinHandle<()>) {
        self.0.push(handle);
    }
}

impl Drop for DrainTasks {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Forwards each line of `stream` (without its line terminator) until
/// end-of-data. Invalid UTF-8 is replaced, not fatal.
async fn pump_lines<R>(stream: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                if tx.send(String::from_utf8_lossy(&buf).into_owned()).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("Output stream read failed, treating as closed: {}", e);
                break;
            }
        }
    }
}

enum Event {
    Exited(std::io::Result<ExitStatus>),
    Stdout(Option<String>),
    Stderr(Option<String>),
}

/// Waits for exit + stdout closed + stderr closed, or the deadline.
async fn collect(
    child: &mut Child,
    mut out_rx: mpsc::UnboundedReceiver<String>,
    mut err_rx: mpsc::UnboundedReceiver<String>,
    deadline: Option<Instant>,
) -> Result<CommandResult> {
    let mut stdout = String::new();
    let mut stderr = String::new();
    let mut stdout_open = true;
    let mut stderr_open = true;
    let mut exit: Option<(i32, DateTime<Local>)> = None;

    loop {
        if let (Some((code, time)), false, false) = (exit, stdout_open, stderr_open) {
            return Ok(CommandResult::exited(stdout, stderr, code, time));
        }

        let next = async {
            tokio::select! {
                status = child.wait(), if exit.is_none() => Event::Exited(status),
                line = out_rx.recv(), if stdout_open => Event::Stdout(line),
                line = err_rx.recv(), if stderr_open => Event::Stderr(line),
            }
        };
        let event = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, next).await {
                Ok(event) => event,
                Err(_) => return Ok(CommandResult::timed_out(stdout, stderr)),
            },
            None => next.await,
        };

        match event {
            Event::Exited(status) => {
                let status = status.map_err(|e| GuestError::io("Failed to wait for local process", e))?;
                exit = Some((exit_code_of(status), Local::now()));
            }
            Event::Stdout(Some(line)) => {
                stdout.push_str(&line);
                stdout.push('\n');
            }
            Event::Stdout(None) => stdout_open = false,
            Event::Stderr(Some(line)) => {
                stderr.push_str(&line);
                stderr.push('\n');
            }
            Event::Stderr(None) => stderr_open = false,
        }
    }
}

/// Exit code of a finished process; signal terminations map to `128 + signal`.
fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

struct BackgroundChild {
    child: Child,
}

#[async_trait]
impl LocalProcess for BackgroundChild {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn kill(&mut self) -> Result<()> {
        match self.child.kill().await {
            Ok(()) => Ok(()),
            // Already exited and reaped.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(GuestError::io("Failed to kill local process", e)),
        }
    }
}

// --- Unit Tests ---
// These run real local processes through the platform shell.
#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn shell(script: &str) -> CommandSpec {
        CommandSpec::new("sh").args(["-c", script])
    }

    #[cfg(windows)]
    fn shell(script: &str) -> CommandSpec {
        CommandSpec::new("cmd.exe").args(["/C", script])
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_captures_both_streams_and_exit_code() {
        let runner = SubprocessRunner::new();
        let result = runner
            .run(
                &shell("echo out1; echo err1 1>&2; echo; echo out2; exit 3"),
                Some(Duration::from_secs(10)),
            )
            .await
            .unwrap();

        assert!(result.has_exited);
        assert_eq!(result.exit_code, Some(3));
        assert!(result.exit_time.is_some());
        // The empty line is kept: only end-of-data closes a stream.
        assert_eq!(result.stdout, "out1\n\nout2\n");
        assert_eq!(result.stderr, "err1\n");
        assert!(!result.success());
    }

    #[cfg(windows)]
    #[tokio::test]
    async fn test_run_captures_both_streams_and_exit_code() {
        let runner = SubprocessRunner::new();
        let result = runner
            .run(&shell("echo out1& echo err1 1>&2& exit /b 3"), Some(Duration::from_secs(10)))
            .await
            .unwrap();

        assert!(result.has_exited);
        assert_eq!(result.exit_code, Some(3));
        assert!(result.stdout.contains("out1"));
        assert!(result.stderr.contains("err1"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_returns_partial_output_instead_of_error() {
        let runner = SubprocessRunner::new();
        let result = runner
            .run(&shell("echo partial; sleep 5"), Some(Duration::from_secs(1)))
            .await
            .expect("a timeout is a result, not an error");

        assert!(!result.has_exited);
        assert_eq!(result.exit_code, None);
        assert_eq!(result.exit_time, None);
        assert_eq!(result.stdout, "partial\n");
        assert_eq!(result.stderr, "");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_waits_for_streams_to_close_after_exit() {
        // The shell exits immediately but a background child keeps stdout
        // open, so the run is not complete until the deadline.
        let runner = SubprocessRunner::new();
        let result = runner
            .run(&shell("(sleep 5; echo late) & echo early"), Some(Duration::from_millis(800)))
            .await
            .unwrap();
        assert!(!result.has_exited);
        assert_eq!(result.stdout, "early\n");
    }

    #[tokio::test]
    async fn test_spawn_failure_is_an_error() {
        let runner = SubprocessRunner::new();
        let err = runner
            .run(&CommandSpec::new("definitely-not-a-real-program-guestrs"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, GuestError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_background_process_can_be_killed() {
        let runner = SubprocessRunner::new();
        let mut process = runner.spawn_background(&shell("sleep 30")).unwrap();
        assert!(process.id().is_some());
        process.kill().await.unwrap();
        // Killing again after it is gone is not an error.
        process.kill().await.unwrap();
    }

    #[test]
    fn test_combined_output_flattens_lines() {
        let result = CommandResult::timed_out("a\r\nb\n".into(), "e\n".into());
        assert_eq!(result.combined_output(), "StdErr:e StdOut:a  b ");
    }
}
