//! # guestrs Process Handlers
//!
//! File: cli/src/commands/process.rs
//!
//! ## Overview
//!
//! `guestrs kill <PID>` kills a guest process and all its descendants (a
//! process that is already gone counts as killed). `guestrs children <PID>`
//! lists the direct children of a guest process, one PID per line.
//!
//! ```bash
//! guestrs kill 4242
//! guestrs children 4242
//! ```
//!
use super::{seconds_or, ConnectionArgs};
use anyhow::{Context, Result};
use clap::Parser;
use guestrs_engine::GuestPid;
use tracing::info;

#[derive(Parser, Debug)]
#[command(about = "Kill a guest process and its descendants")]
pub struct KillArgs {
    /// Guest process ID.
    pid: GuestPid,

    /// Seconds to wait for the kill to complete.
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,
}

#[derive(Parser, Debug)]
#[command(about = "List the direct children of a guest process")]
pub struct ChildrenArgs {
    /// Guest process ID.
    pid: GuestPid,
}

pub async fn handle_kill(connection: &ConnectionArgs, args: KillArgs) -> Result<i32> {
    let session = connection.connect().await?;
    let timeout = seconds_or(args.timeout, session.default_start_timeout());
    let process = session.process(args.pid);

    let result = process
        .kill_tree(timeout)
        .await
        .with_context(|| format!("Failed to kill guest process {}", process))
        .map(|()| 0);
    connection.finish(session, result).await
}

pub async fn handle_children(connection: &ConnectionArgs, args: ChildrenArgs) -> Result<i32> {
    let session = connection.connect().await?;
    let process = session.process(args.pid);

    let result = process
        .children()
        .await
        .with_context(|| format!("Failed to list children of guest process {}", process))
        .map(|children| {
            info!("{} has {} direct children", process, children.len());
            for child in children {
                println!("{}", child);
            }
            0
        });
    connection.finish(session, result).await
}
