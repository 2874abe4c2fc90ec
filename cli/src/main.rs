//! # guestrs Main Entry Point
//!
//! File: cli/src/main.rs
//!
//! ## Overview
//!
//! This file is the entry point of the `guestrs` CLI, a thin front end over
//! `guestrs_engine`. It handles:
//! - Command-line argument parsing using Clap
//! - Setting up the logging system based on verbosity flags
//! - Routing execution to the command handlers
//!
//! ## Architecture
//!
//! - Connection flags (`--config`, `--address`, `--user`, `--password`, ...)
//!   are global and collected into `commands::ConnectionArgs`.
//! - Each top-level command is a variant of the `Commands` enum, mapped to a
//!   handler in its module under `commands/`.
//! - Handlers return the process exit code: `exec` passes the guest command's
//!   exit code through, everything else exits 0 on success.
//! - All errors are propagated to this level and reported once.
//!
//! ## Examples
//!
//! ```bash
//! # Run a command on the guest and print its output
//! guestrs --address 192.168.75.128 --user Administrator exec -- ver
//!
//! # Start notepad without waiting for it, then kill it by PID
//! guestrs detach -- notepad.exe
//! guestrs kill 4242
//!
//! # More logging
//! guestrs -vv env list
//! ```
//!
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

mod commands;

/// Top-level command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "guestrs",
    about = "Run commands on a Windows guest from the host",
    long_about = "Drive commands on a Windows guest through an elevated-execution tool:\n\
                  run them synchronously with their output, launch them detached and\n\
                  manage the resulting guest processes.",
    propagate_version = true,
    version
)]
struct Cli {
    #[command(flatten)]
    connection: commands::ConnectionArgs,
    #[command(subcommand)]
    command: Commands,
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Parser, Debug)]
enum Commands {
    #[command(alias = "x")]
    Exec(commands::exec::ExecArgs),
    #[command(alias = "d")]
    Detach(commands::exec::DetachArgs),
    Kill(commands::process::KillArgs),
    Children(commands::process::ChildrenArgs),
    #[command(alias = "e")]
    Env(commands::env::EnvArgs),
    Reg(commands::reg::RegArgs),
    #[command(alias = "f")]
    File(commands::file::FileArgs),
    Info(commands::info::InfoArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    tracing::debug!("Parsed command: {:?}", cli.command);

    let connection = &cli.connection;
    let command_result = match cli.command {
        Commands::Exec(args) => commands::exec::handle_exec(connection, args).await,
        Commands::Detach(args) => commands::exec::handle_detach(connection, args).await,
        Commands::Kill(args) => commands::process::handle_kill(connection, args).await,
        Commands::Children(args) => commands::process::handle_children(connection, args).await,
        Commands::Env(args) => commands::env::handle_env(connection, args).await,
        Commands::Reg(args) => commands::reg::handle_reg(connection, args).await,
        Commands::File(args) => commands::file::handle_file(connection, args).await,
        Commands::Info(args) => commands::info::handle_info(connection, args).await,
    };

    match command_result {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!("Command execution failed: {:?}", e);
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
