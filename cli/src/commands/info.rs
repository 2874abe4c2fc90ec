//! # guestrs Guest Info Handler
//!
//! File: cli/src/commands/info.rs
//!
//! ## Overview
//!
//! `guestrs info` connects to the guest and prints what the session learned
//! about it: computer name, OS caption and version, Windows directory and
//! whether UAC is enabled. Useful as a connectivity check.
//!
use super::ConnectionArgs;
use anyhow::{Context, Result};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(about = "Show guest OS facts and UAC state")]
pub struct InfoArgs {}

pub async fn handle_info(connection: &ConnectionArgs, _args: InfoArgs) -> Result<i32> {
    let session = connection.connect().await?;
    let result = session
        .os_info()
        .await
        .context("Failed to query the guest operating system")
        .map(|os| {
            println!("Guest:        {}", session.address());
            println!("User:         {}", session.username());
            println!("Computer:     {}", os.computer_name);
            println!("OS:           {} ({})", os.caption, os.version);
            println!("Windows dir:  {}", os.windows_directory);
            println!("UAC:          {}", if session.uac_enabled() { "enabled" } else { "disabled" });
            0
        });
    connection.finish(session, result).await
}
