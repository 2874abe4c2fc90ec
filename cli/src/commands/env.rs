//! # guestrs Guest Environment Command Group
//!
//! File: cli/src/commands/env.rs
//!
//! ## Overview
//!
//! `guestrs env` reads and writes the guest's environment variables. Reads
//! come from the session's environment cache, which is filled once while
//! connecting; writes go through `setx` and affect processes started later.
//!
//! ```bash
//! guestrs env list
//! guestrs env get APPDATA
//! guestrs env set BUILD_ID 42 --global
//! ```
//!
use super::ConnectionArgs;
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use guestrs_engine::RemoteSession;

#[derive(Parser, Debug)]
pub struct EnvArgs {
    #[command(subcommand)]
    command: EnvCommand,
}

#[derive(Subcommand, Debug)]
enum EnvCommand {
    /// Print every variable of the guest user's environment as NAME=VALUE.
    #[command(alias = "ls")]
    List,
    /// Print one variable (names are case-insensitive).
    Get { name: String },
    /// Set a variable with `setx`.
    Set {
        name: String,
        value: String,
        /// Set it machine-wide instead of for the session user.
        #[arg(long, short = 'g')]
        global: bool,
    },
}

pub async fn handle_env(connection: &ConnectionArgs, args: EnvArgs) -> Result<i32> {
    let session = connection.connect().await?;
    let result = run_env(&session, args.command).await;
    connection.finish(session, result).await
}

async fn run_env(session: &RemoteSession, command: EnvCommand) -> Result<i32> {
    match command {
        EnvCommand::List => {
            let mut variables: Vec<_> = session.cached_environment_variables().iter().collect();
            variables.sort_by_key(|(name, _)| name.to_ascii_uppercase());
            for (name, value) in variables {
                println!("{}={}", name, value);
            }
            Ok(0)
        }
        EnvCommand::Get { name } => {
            let value = session
                .get_cached_environment_variable(&name)
                .ok_or_else(|| anyhow!("Variable '{}' is not set on the guest", name))?;
            println!("{}", value);
            Ok(0)
        }
        EnvCommand::Set {
            name,
            value,
            global,
        } => {
            let scope = if global { "machine" } else { "user" };
            let outcome = if global {
                session.set_global_environment_variable(&name, &value).await
            } else {
                session.set_user_environment_variable(&name, &value).await
            };
            outcome.with_context(|| format!("Failed to set {} variable '{}'", scope, name))?;
            Ok(0)
        }
    }
}
