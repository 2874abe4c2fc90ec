//! # guestrs Exec and Detach Handlers
//!
//! File: cli/src/commands/exec.rs
//!
//! ## Overview
//!
//! `guestrs exec` runs a command line on the guest, waits for it, prints the
//! captured stdout/stderr and exits with the guest command's exit code.
//! `guestrs detach` starts a command without waiting and prints the guest PID
//! it was correlated to, for later use with `kill` and `children`.
//!
//! ## Usage
//!
//! ```bash
//! guestrs exec -- ipconfig /all
//! guestrs exec --no-output --exec-timeout 600 -- msiexec /i C:\TMP1\app.msi /qn
//! guestrs exec --program "C:\Program Files\App\app.exe" -- --version
//! guestrs detach -- notepad.exe
//! ```
//!
use super::{seconds_or, ConnectionArgs};
use anyhow::{bail, Context, Result};
use clap::Parser;
use guestrs_engine::RemoteSession;
use std::io::Write;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    about = "Run a command on the guest and wait for it",
    long_about = "Runs the command line on the guest through a batch file, prints its stdout and\n\
                  stderr, and exits with its exit code."
)]
pub struct ExecArgs {
    /// Seconds to wait for the elevation tool to start the command.
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Seconds to wait for the command to finish (unbounded if omitted).
    #[arg(long, value_name = "SECS")]
    exec_timeout: Option<u64>,

    /// Do not capture output; only report the exit code.
    #[arg(long)]
    no_output: bool,

    /// Run this program with the trailing arguments, quoting its path as needed.
    #[arg(long, value_name = "PATH", conflicts_with = "no_output")]
    program: Option<String>,

    /// The command line to run (or the program's arguments with `--program`).
    #[arg(last = true)]
    command: Vec<String>,
}

#[derive(Parser, Debug)]
#[command(about = "Start a command on the guest without waiting and print its PID")]
pub struct DetachArgs {
    /// Seconds to wait for the command to start.
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// The command line to start.
    #[arg(required = true, last = true)]
    command: Vec<String>,
}

/// Runs the command and returns the exit code to leave the CLI with.
pub async fn handle_exec(connection: &ConnectionArgs, args: ExecArgs) -> Result<i32> {
    if args.program.is_none() && args.command.is_empty() {
        bail!("No command provided to execute.");
    }
    let command_line = args.command.join(" ");

    let session = connection.connect().await?;
    let result = run_exec(&session, &args, &command_line).await;
    connection.finish(session, result).await
}

async fn run_exec(session: &RemoteSession, args: &ExecArgs, command_line: &str) -> Result<i32> {
    let start = seconds_or(args.timeout, session.default_start_timeout());
    let execution = args.exec_timeout.map(Duration::from_secs);

    if args.no_output {
        return session
            .execute_no_output(command_line, start, execution)
            .await
            .with_context(|| format!("Failed to run '{}' on the guest", command_line));
    }

    let output = match &args.program {
        Some(program) => {
            let tail: Vec<&str> = args.command.iter().map(String::as_str).collect();
            session
                .execute_with_args(program, &tail, start, execution)
                .await
                .with_context(|| format!("Failed to run '{}' on the guest", program))?
        }
        None => session
            .execute(command_line, start, execution)
            .await
            .with_context(|| format!("Failed to run '{}' on the guest", command_line))?,
    };

    print!("{}", output.stdout);
    eprint!("{}", output.stderr);
    std::io::stdout().flush().context("Failed to flush stdout")?;

    match output.exit_code {
        Some(code) => {
            info!("Guest command exited with code {}", code);
            Ok(code)
        }
        None => {
            warn!("Guest command did not finish within {:?}", execution);
            bail!(
                "Command '{}' was still running when the execution timeout expired",
                command_line
            )
        }
    }
}

/// Starts the command detached and prints the guest PID.
pub async fn handle_detach(connection: &ConnectionArgs, args: DetachArgs) -> Result<i32> {
    let command_line = args.command.join(" ");
    let session = connection.connect().await?;
    let start = seconds_or(args.timeout, session.default_start_timeout());

    let result = session
        .detach(&command_line, start)
        .await
        .with_context(|| format!("Failed to start '{}' on the guest", command_line))
        .map(|process| {
            info!("Started {} as {}", command_line, process);
            println!("{}", process.pid());
            0
        });
    connection.finish(session, result).await
}
