//! # guestrs Command Modules
//!
//! File: cli/src/commands/mod.rs
//!
//! ## Overview
//!
//! This module aggregates the commands of the guestrs CLI and the connection
//! flags they share. Every command opens one `RemoteSession`, does its work
//! and hands the session to `ConnectionArgs::finish`. With `--stop-service`
//! that shuts the session down, stopping the elevation tool's guest service
//! and with it every process started through it (including `detach`ed ones).
//!
//! ## Command Groups
//!
//! - `exec`: `exec` (synchronous, with output) and `detach` (returns a PID)
//! - `process`: `kill` and `children` for a known guest PID
//! - `env`: the guest environment (`list`, `get`, `set`)
//! - `reg`: 32-bit registry value reads
//! - `file`: file transfer (`push`, `pull`, `cat`, `rm`, `mkdir`, `exists`)
//! - `info`: guest OS facts and UAC state
//!
//! ## Connection flags
//!
//! Values come from the configuration files (see `guestrs_engine::core::config`)
//! and can be overridden per invocation with global flags. The password is
//! best passed through `GUESTRS_PASSWORD`.
//!
use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use guestrs_engine::core::config::{self, Config, CorrelationStrategyKind};
use guestrs_engine::RemoteSession;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

pub mod env;
pub mod exec;
pub mod file;
pub mod info;
pub mod process;
pub mod reg;

/// Global flags describing which guest to drive and how.
#[derive(Args)]
pub struct ConnectionArgs {
    /// Read configuration from this file instead of the user/project files.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Guest IP address or host name.
    #[arg(long, short = 'a', global = true)]
    address: Option<String>,

    /// Guest account name.
    #[arg(long, short = 'u', global = true)]
    user: Option<String>,

    /// Password of the guest account.
    #[arg(long, global = true, env = "GUESTRS_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Path of the elevation tool executable on this host.
    #[arg(long, global = true, value_name = "PATH")]
    tool: Option<String>,

    /// How detached launches are matched to their guest process.
    #[arg(long, global = true, value_enum)]
    strategy: Option<Strategy>,

    /// Stop the elevation tool's guest service when done. This also ends
    /// processes started with `detach`.
    #[arg(long, global = true)]
    stop_service: bool,
}

impl fmt::Debug for ConnectionArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionArgs")
            .field("config", &self.config)
            .field("address", &self.address)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "********"))
            .field("tool", &self.tool)
            .field("strategy", &self.strategy)
            .field("stop_service", &self.stop_service)
            .finish()
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Strategy {
    /// Read the spawned PID from the tool's diagnostic output.
    Scrape,
    /// Diff the children of the tool's guest service.
    TreeDiff,
}

impl From<Strategy> for CorrelationStrategyKind {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Scrape => CorrelationStrategyKind::Scrape,
            Strategy::TreeDiff => CorrelationStrategyKind::TreeDiff,
        }
    }
}

impl ConnectionArgs {
    /// Loads the configuration and applies the flag overrides.
    pub fn config(&self) -> Result<Config> {
        let mut cfg = match &self.config {
            Some(path) => config::load_config_from_path(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => config::load_config().context("Failed to load guestrs configuration")?,
        };
        if let Some(address) = &self.address {
            cfg.guest.address = address.clone();
        }
        if let Some(user) = &self.user {
            cfg.guest.username = user.clone();
        }
        if let Some(password) = &self.password {
            cfg.guest.password = password.clone();
        }
        if let Some(tool) = &self.tool {
            cfg.tool.path = tool.clone();
        }
        if let Some(strategy) = self.strategy {
            cfg.correlation.strategy = strategy.into();
        }
        Ok(cfg)
    }

    /// Loads the configuration and bootstraps a session on the guest.
    pub async fn connect(&self) -> Result<RemoteSession> {
        let cfg = self.config()?;
        let address = cfg.guest.address.clone();
        let session = RemoteSession::connect(cfg)
            .await
            .with_context(|| format!("Failed to connect to guest '{}'", address))?;
        debug!("Connected to {}", session.address());
        Ok(session)
    }

    /// Ends the command: shuts `session` down if `--stop-service` was given
    /// (whether or not the command succeeded) and hands back its result.
    pub async fn finish<T>(&self, session: RemoteSession, result: Result<T>) -> Result<T> {
        if self.stop_service {
            session.shutdown().await;
        }
        result
    }
}

/// Converts a `--timeout`-style flag to a `Duration`, falling back to `default`.
pub fn seconds_or(secs: Option<u64>, default: Duration) -> Duration {
    secs.map(Duration::from_secs).unwrap_or(default)
}
