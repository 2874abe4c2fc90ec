//! # guestrs Remote Shell (`remote::shell`)
//!
//! File: engine/src/remote/shell.rs
//!
//! ## Overview
//!
//! Emulates a synchronous "run a command, get its stdout/stderr/exit code"
//! contract on a guest that has no remote-shell protocol, on top of the
//! elevation tool and the file-transfer collaborator.
//!
//! ## Architecture
//!
//! `execute` works in four steps:
//!
//! 1. Allocate guest temp files for stdout and stderr (created empty in the
//!    guest temp directory) and write a local batch script
//!    (`@echo off` + the caller's command) named `<tempname>.bat`.
//! 2. Copy the batch to the guest temp directory.
//! 3. Run the batch through the elevation tool with its output redirected:
//!    `<batch> > "<stdout>" 2>"<stderr>"`. Redirecting the batch invocation
//!    captures every line of a multi-command script.
//! 4. Copy both files back, read them (lossy UTF-8), and return a
//!    `ShellOutput` whose exit code is the tool's.
//!
//! Every guest file allocated so far is deleted after step 4, whether the
//! steps succeeded or failed; deletion failures are logged and swallowed. The
//! local batch file lives in a `NamedTempFile` and is removed when dropped.
//!
//! `execute_no_output` skips the temp-file machinery and relies on the
//! tool's exit code only. `detach` hands the command to the configured
//! `ProcessCorrelator` and wraps the PID it finds in a handle.
//!
//! ## Ordering
//!
//! Within one `execute` the temp files exist before the batch runs and are
//! read only after the tool returns. Temp names are unique per call, so
//! concurrent `execute`s do not share paths.
//!
use crate::common::transfer::path::{guest_file_name, guest_join, quote_if_needed};
use crate::common::transfer::FileTransfer;
use crate::core::error::{GuestError, Result};
use crate::core::retry::RetryPolicy;
use crate::remote::correlator::ProcessCorrelator;
use crate::remote::parse::parse_environment;
use crate::remote::process::{ProcessControl, RemoteProcessHandle};
use crate::remote::tool::ElevatedExecutor;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{Builder, NamedTempFile};
use tracing::{debug, info, warn, Instrument, Span};

/// Trivial command run once per session to absorb first-contact flakiness.
pub const WARM_UP_COMMAND: &str = r#"cmd.exe /c echo "cmd was run ok.""#;

/// Shell warm-up: 50 attempts, 2 s apart.
pub const WARM_UP_BOOTSTRAP: RetryPolicy = RetryPolicy {
    max_attempts: 50,
    delay: Duration::from_secs(2),
};

const TEMP_PREFIX: &str = "guestrs";

/// Result of a guest command, after the redirection round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code of the guest command; `None` if the elevation tool did not
    /// finish within the execution timeout.
    pub exit_code: Option<i32>,
}

/// Runs `command` through the elevation tool without capturing guest output.
///
/// Returns the exit code. A non-zero code is logged, not raised; callers
/// that need success check it. A tool that does not finish within the
/// timeout is a `GuestError::Timeout`, since there is nothing else to return.
pub async fn run_without_output(
    executor: &dyn ElevatedExecutor,
    command: &str,
    start_timeout: Duration,
    execution_timeout: Option<Duration>,
) -> Result<i32> {
    let result = executor
        .invoke_synchronous(command, start_timeout, execution_timeout)
        .await?;
    match (result.has_exited, result.exit_code) {
        (true, Some(code)) => {
            if code != 0 {
                warn!("Guest command '{}' exited with code {}", command, code);
            }
            Ok(code)
        }
        _ => Err(GuestError::Timeout {
            operation: format!("Guest command '{command}'"),
            timeout: execution_timeout.unwrap_or(start_timeout),
        }),
    }
}

/// Command execution and file access on one guest.
pub struct RemoteShell {
    executor: Arc<dyn ElevatedExecutor>,
    transfer: Arc<dyn FileTransfer>,
    correlator: Arc<dyn ProcessCorrelator>,
    control: Arc<ProcessControl>,
    temp_dir: String,
    span: Span,
}

impl RemoteShell {
    pub fn new(
        executor: Arc<dyn ElevatedExecutor>,
        transfer: Arc<dyn FileTransfer>,
        correlator: Arc<dyn ProcessCorrelator>,
        control: Arc<ProcessControl>,
        temp_dir: impl Into<String>,
        span: Span,
    ) -> Self {
        Self {
            executor,
            transfer,
            correlator,
            control,
            temp_dir: temp_dir.into(),
            span,
        }
    }

    pub fn temp_dir(&self) -> &str {
        &self.temp_dir
    }

    /// Runs `command_line` on the guest and returns its stdout, stderr and
    /// exit code.
    ///
    /// # Errors
    ///
    /// File-transfer failures (after their retry) and local I/O failures.
    /// A non-zero exit code is not an error.
    pub async fn execute(
        &self,
        command_line: &str,
        start_timeout: Duration,
        execution_timeout: Option<Duration>,
    ) -> Result<ShellOutput> {
        async {
            let mut guest_files = Vec::with_capacity(3);
            let result = self
                .execute_with_redirection(command_line, start_timeout, execution_timeout, &mut guest_files)
                .await;
            self.delete_guest_files(&guest_files).await;
            result
        }
        .instrument(self.span.clone())
        .await
    }

    async fn execute_with_redirection(
        &self,
        command_line: &str,
        start_timeout: Duration,
        execution_timeout: Option<Duration>,
        guest_files: &mut Vec<String>,
    ) -> Result<ShellOutput> {
        let stdout_path = self.create_temp_file_in_guest().await?;
        guest_files.push(stdout_path.clone());
        let stderr_path = self.create_temp_file_in_guest().await?;
        guest_files.push(stderr_path.clone());

        let batch = write_local_batch(command_line)?;
        let batch_name = batch
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| GuestError::Config("Local batch file has no name".to_string()))?;
        let batch_path = guest_join(&self.temp_dir, &batch_name);
        guest_files.push(batch_path.clone());
        self.transfer.copy_to_guest(batch.path(), &batch_path).await?;

        let invocation = format!("{batch_path} > \"{stdout_path}\" 2>\"{stderr_path}\"");
        info!("Executing on guest: {}", command_line);
        let result = self
            .executor
            .invoke_synchronous(&invocation, start_timeout, execution_timeout)
            .await?;
        if !result.has_exited {
            warn!(
                "Guest command '{}' did not finish within {:?}; reading partial output",
                command_line, execution_timeout
            );
        }

        let stdout = self.read_file(&stdout_path).await?;
        let stderr = self.read_file(&stderr_path).await?;
        debug!("Guest command exit code: {:?}", result.exit_code);
        Ok(ShellOutput {
            stdout,
            stderr,
            exit_code: result.exit_code,
        })
    }

    async fn delete_guest_files(&self, guest_files: &[String]) {
        for path in guest_files {
            if let Err(e) = self.transfer.delete_file(path, true).await {
                debug!("Leaving guest temp file {} behind: {}", path, e);
            }
        }
    }

    /// Runs `command_line` and returns only its exit code.
    pub async fn execute_no_output(
        &self,
        command_line: &str,
        start_timeout: Duration,
        execution_timeout: Option<Duration>,
    ) -> Result<i32> {
        run_without_output(
            self.executor.as_ref(),
            command_line,
            start_timeout,
            execution_timeout,
        )
        .instrument(self.span.clone())
        .await
    }

    /// Runs `program` with `args`, quoting the program path if it contains
    /// spaces.
    pub async fn execute_with_args(
        &self,
        program: &str,
        args: &[&str],
        start_timeout: Duration,
        execution_timeout: Option<Duration>,
    ) -> Result<ShellOutput> {
        let mut command_line = quote_if_needed(program);
        for arg in args {
            command_line.push(' ');
            command_line.push_str(arg);
        }
        self.execute(&command_line, start_timeout, execution_timeout)
            .await
    }

    /// Starts `command_line` detached and returns a handle to the guest
    /// process it created.
    pub async fn detach(&self, command_line: &str, start_timeout: Duration) -> Result<RemoteProcessHandle> {
        let pid = self
            .correlator
            .correlate(command_line, start_timeout)
            .instrument(self.span.clone())
            .await?;
        info!(parent: &self.span, "Detached '{}' as guest process {}", command_line, pid);
        Ok(RemoteProcessHandle::new(pid, Arc::clone(&self.control)))
    }

    /// Runs the warm-up command until it completes, at most `policy.max_attempts` times.
    ///
    /// # Errors
    ///
    /// `GuestError::Startup` with stage `"warm-up"` once the attempts are used up.
    pub async fn warm_up(&self, timeout: Duration, policy: RetryPolicy) -> Result<()> {
        policy
            .run(
                "shell warm-up",
                || async {
                    let output = self.execute(WARM_UP_COMMAND, timeout, Some(timeout)).await?;
                    match output.exit_code {
                        Some(_) => Ok(()),
                        None => Err(GuestError::Timeout {
                            operation: "Shell warm-up".to_string(),
                            timeout,
                        }),
                    }
                },
                GuestError::is_transient,
            )
            .await
            .map_err(|e| e.into_startup("warm-up"))
    }

    /// Reads the guest's environment by running `set`.
    pub async fn get_environment_variables(&self, timeout: Duration) -> Result<HashMap<String, String>> {
        let output = self.execute("set", timeout, Some(timeout)).await?;
        parse_environment(&output.stdout)
    }

    /// Creates an empty, uniquely named file in the guest temp directory and
    /// returns its guest path.
    pub async fn create_temp_file_in_guest(&self) -> Result<String> {
        let local = Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile()
            .map_err(|e| GuestError::io("Failed to create local temp file", e))?;
        let name = local
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| GuestError::Config("Local temp file has no name".to_string()))?;
        let guest_path = guest_join(&self.temp_dir, &name);
        self.transfer.copy_to_guest(local.path(), &guest_path).await?;
        debug!("Created guest temp file {}", guest_path);
        Ok(guest_path)
    }

    /// Reads a guest file as bytes through a local temporary copy.
    pub async fn read_file_bytes(&self, guest_path: &str) -> Result<Vec<u8>> {
        let dir = tempfile::tempdir()
            .map_err(|e| GuestError::io("Failed to create local temp directory", e))?;
        let local = dir.path().join(guest_file_name(guest_path));
        self.transfer.copy_from_guest(guest_path, &local).await?;
        tokio::fs::read(&local)
            .await
            .map_err(|e| GuestError::io(format!("Failed to read local copy of {guest_path}"), e))
        // `dir` is removed on drop, on every path.
    }

    /// Reads a guest file as text (invalid UTF-8 replaced).
    pub async fn read_file(&self, guest_path: &str) -> Result<String> {
        let bytes = self.read_file_bytes(guest_path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Reads a guest file as lines, without line terminators.
    pub async fn read_file_lines(&self, guest_path: &str) -> Result<Vec<String>> {
        let text = self.read_file(guest_path).await?;
        Ok(text
            .lines()
            .map(|l| l.trim_end_matches('\r').to_string())
            .collect())
    }
}

/// Writes `@echo off` and `command_line` to a local `<tempname>.bat`.
fn write_local_batch(command_line: &str) -> Result<NamedTempFile> {
    let mut batch = Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(".bat")
        .tempfile()
        .map_err(|e| GuestError::io("Failed to create local batch file", e))?;
    write!(batch, "@echo off\r\n{command_line}\r\n")
        .and_then(|()| batch.flush())
        .map_err(|e| GuestError::io("Failed to write local batch file", e))?;
    Ok(batch)
}
