//! # guestrs Elevated Tool Invoker (`remote::tool`)
//!
//! File: engine/src/remote/tool.rs
//!
//! ## Overview
//!
//! Runs a command on the guest with elevated rights by invoking the external
//! elevation tool (PsExec-compatible) on the host. The tool's argument vector
//! is built from the session parameters:
//!
//! ```text
//! <tool> -accepteula \\<address> -h [-i] [-d] -n <startTimeoutSecs> -u <user> -p <password> <targetCommand>
//! ```
//!
//! - `-h` runs with the account's elevated token.
//! - `-i` lets the process interact with the guest desktop (configurable).
//! - `-d` (detached mode) makes the tool return as soon as the guest process
//!   has started instead of waiting for it to finish.
//! - `-n` bounds how long the tool waits to connect to the guest; this is
//!   where the caller's start timeout goes.
//!
//! The target command is passed as a raw command-line tail so redirections
//! and quoting reach the tool as written.
//!
//! ## Architecture
//!
//! `ElevatedExecutor` is the seam the shell and both correlation strategies
//! run through. `ElevationTool` implements it on top of a `ProcessRunner`;
//! tests script it directly.
//!
use crate::common::process::{CommandResult, CommandSpec, LocalProcess, ProcessRunner};
use crate::core::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, Instrument, Span};

/// Elevated execution of guest command lines.
#[async_trait]
pub trait ElevatedExecutor: Send + Sync {
    /// Runs `command` on the guest and waits for it (bounded by
    /// `execution_timeout`). The result describes the local tool process; its
    /// exit code is the guest command's exit code.
    async fn invoke_synchronous(
        &self,
        command: &str,
        start_timeout: Duration,
        execution_timeout: Option<Duration>,
    ) -> Result<CommandResult>;

    /// Starts `command` without waiting for it and returns the tool's
    /// diagnostic text (stderr followed by stdout).
    async fn invoke_detached(&self, command: &str, start_timeout: Duration) -> Result<String>;

    /// Starts the tool in detached mode in the background and returns the
    /// local tool process.
    fn launch_background(&self, command: &str, start_timeout: Duration)
        -> Result<Box<dyn LocalProcess>>;

    /// Program name and masked argument string of a detached launch, for
    /// error messages.
    fn describe_launch(&self, command: &str, start_timeout: Duration) -> (String, String);
}

/// Connection and behavior settings of the elevation tool.
#[derive(Debug, Clone)]
pub struct ElevationToolSettings {
    pub tool_path: String,
    pub address: String,
    pub username: String,
    pub password: String,
    pub interactive: bool,
}

/// The real elevation tool, run through a `ProcessRunner`.
pub struct ElevationTool {
    settings: ElevationToolSettings,
    runner: Arc<dyn ProcessRunner>,
    span: Span,
}

impl ElevationTool {
    pub fn new(settings: ElevationToolSettings, runner: Arc<dyn ProcessRunner>, span: Span) -> Self {
        Self {
            settings,
            runner,
            span,
        }
    }

    /// Builds the tool invocation for `command`.
    pub fn command_spec(&self, command: &str, start_timeout: Duration, detached: bool) -> CommandSpec {
        let s = &self.settings;
        let mut spec = CommandSpec::new(&s.tool_path)
            .arg("-accepteula")
            .arg(format!(r"\\{}", s.address))
            .arg("-h");
        if s.interactive {
            spec = spec.arg("-i");
        }
        if detached {
            spec = spec.arg("-d");
        }
        spec.arg("-n")
            .arg(start_timeout.as_secs().max(1).to_string())
            .args(["-u", s.username.as_str(), "-p", s.password.as_str()])
            .raw_tail(command)
    }
}

#[async_trait]
impl ElevatedExecutor for ElevationTool {
    async fn invoke_synchronous(
        &self,
        command: &str,
        start_timeout: Duration,
        execution_timeout: Option<Duration>,
    ) -> Result<CommandResult> {
        let spec = self.command_spec(command, start_timeout, false);
        async {
            debug!("Elevated command: {}", command);
            self.runner.run(&spec, execution_timeout).await
        }
        .instrument(self.span.clone())
        .await
    }

    async fn invoke_detached(&self, command: &str, start_timeout: Duration) -> Result<String> {
        let spec = self.command_spec(command, start_timeout, true);
        async {
            debug!("Detached elevated command: {}", command);
            // The tool returns once the guest process is started, which it
            // must do within the start timeout.
            let result = self.runner.run(&spec, Some(start_timeout)).await?;
            Ok(format!("{}{}", result.stderr, result.stdout))
        }
        .instrument(self.span.clone())
        .await
    }

    fn launch_background(
        &self,
        command: &str,
        start_timeout: Duration,
    ) -> Result<Box<dyn LocalProcess>> {
        let _entered = self.span.enter();
        self.runner
            .spawn_background(&self.command_spec(command, start_timeout, true))
    }

    fn describe_launch(&self, command: &str, start_timeout: Duration) -> (String, String) {
        let spec = self.command_spec(command, start_timeout, true);
        (
            spec.program_display(),
            spec.args_display_masked(Some(&self.settings.password)),
        )
    }
}
