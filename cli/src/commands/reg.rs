//! # guestrs Registry Handler
//!
//! File: cli/src/commands/reg.rs
//!
//! ## Overview
//!
//! `guestrs reg <KEY> <VALUE>` prints one registry value as seen by 32-bit
//! processes on the guest (it queries through `SysWOW64\reg.exe` on 64-bit
//! Windows).
//!
//! ```bash
//! guestrs reg "HKLM\SOFTWARE\Microsoft\Windows NT\CurrentVersion" ProductName
//! ```
//!
use super::ConnectionArgs;
use anyhow::{Context, Result};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(about = "Read a registry value through the guest's 32-bit reg.exe")]
pub struct RegArgs {
    /// Full key path, e.g. `HKLM\SOFTWARE\Vendor\Product`.
    key: String,
    /// Name of the value under the key.
    value: String,
}

pub async fn handle_reg(connection: &ConnectionArgs, args: RegArgs) -> Result<i32> {
    let session = connection.connect().await?;
    let result = session
        .read_registry_value_32(&args.key, &args.value)
        .await
        .with_context(|| format!("Failed to read '{}' under '{}'", args.value, args.key))
        .map(|data| {
            println!("{}", data);
            0
        });
    connection.finish(session, result).await
}
