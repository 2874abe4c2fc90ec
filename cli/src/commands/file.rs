//! # guestrs File Transfer Command Group
//!
//! File: cli/src/commands/file.rs
//!
//! ## Overview
//!
//! `guestrs file` moves files between this host and the guest over the
//! guest's administrative share, and does simple housekeeping on guest
//! paths. Guest paths are local to the guest (`C:\...`).
//!
//! ```bash
//! guestrs file push ./setup.msi 'C:\TMP1\setup.msi'
//! guestrs file pull 'C:\Windows\Logs\CBS\CBS.log' ./CBS.log
//! guestrs file cat 'C:\TMP1\result.txt'
//! guestrs file rm -r 'C:\TMP1\build'
//! ```
//!
use super::ConnectionArgs;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use guestrs_engine::RemoteSession;
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser, Debug)]
pub struct FileArgs {
    #[command(subcommand)]
    command: FileCommand,
}

#[derive(Subcommand, Debug)]
enum FileCommand {
    /// Copy a local file or directory to the guest.
    Push { local: PathBuf, guest: String },
    /// Copy a guest file or directory to this host.
    Pull { guest: String, local: PathBuf },
    /// Print a guest file.
    Cat { guest: String },
    /// Delete a guest file, or a directory with `--recursive`.
    Rm {
        guest: String,
        #[arg(long, short = 'r')]
        recursive: bool,
    },
    /// Create a guest directory (and its parents).
    Mkdir { guest: String },
    /// Exit 0 if the guest path exists, 1 otherwise.
    Exists { guest: String },
}

pub async fn handle_file(connection: &ConnectionArgs, args: FileArgs) -> Result<i32> {
    let session = connection.connect().await?;
    let result = run_file(&session, args.command).await;
    connection.finish(session, result).await
}

async fn run_file(session: &RemoteSession, command: FileCommand) -> Result<i32> {
    match command {
        FileCommand::Push { local, guest } => {
            session
                .copy_file_to_guest(&local, &guest)
                .await
                .with_context(|| format!("Failed to copy {} to guest {}", local.display(), guest))?;
        }
        FileCommand::Pull { guest, local } => {
            session
                .copy_file_from_guest(&guest, &local)
                .await
                .with_context(|| format!("Failed to copy guest {} to {}", guest, local.display()))?;
        }
        FileCommand::Cat { guest } => {
            let bytes = session
                .read_file_bytes(&guest)
                .await
                .with_context(|| format!("Failed to read guest file {}", guest))?;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&bytes).context("Failed to write to stdout")?;
            stdout.flush().context("Failed to flush stdout")?;
        }
        FileCommand::Rm { guest, recursive } => {
            let outcome = if recursive {
                session.delete_directory_in_guest(&guest, true).await
            } else {
                session.delete_file_in_guest(&guest, false).await
            };
            outcome.with_context(|| format!("Failed to delete guest path {}", guest))?;
        }
        FileCommand::Mkdir { guest } => {
            session
                .create_directory_in_guest(&guest)
                .await
                .with_context(|| format!("Failed to create guest directory {}", guest))?;
        }
        FileCommand::Exists { guest } => {
            let exists = session.file_exists_in_guest(&guest).await?
                || session.directory_exists_in_guest(&guest).await?;
            return Ok(if exists { 0 } else { 1 });
        }
    }
    Ok(0)
}
