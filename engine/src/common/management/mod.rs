//! # guestrs Guest Management (`common::management`)
//!
//! File: engine/src/common/management/mod.rs
//!
//! ## Overview
//!
//! Host-side access to the guest's process table, independent of the
//! elevation tool:
//!
//! - `ManagementQuery` answers "which PID does service X run as" and "which
//!   processes are children of PID Y". `WmicQuery` implements it with the
//!   `wmic` command line; `LazyManagement` wraps any query with a one-time,
//!   retried connection bootstrap.
//! - `DirectKill` terminates a guest process tree with its own network call.
//!   `TaskkillCommand` implements it with `taskkill /S`.
//!
//! Process identifiers are `GuestPid` values: decimal-digit strings, never
//! native integers.
//!
use crate::core::error::{GuestError, Result};
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub mod lazy;
pub mod taskkill;
pub mod wmic;

pub use lazy::LazyManagement;
pub use taskkill::TaskkillCommand;
pub use wmic::WmicQuery;

/// A guest process identifier, kept as its decimal string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GuestPid(String);

impl GuestPid {
    /// Accepts a non-empty string of ASCII digits (surrounding whitespace is
    /// trimmed).
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(GuestError::Parse {
                what: "process id".to_string(),
                raw: raw.to_string(),
            })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GuestPid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for GuestPid {
    type Err = GuestError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Guest operating system facts read when the management connection is
/// first established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsInfo {
    pub computer_name: String,
    pub windows_directory: String,
    pub caption: String,
    pub version: String,
}

/// Queries the guest's services and processes.
///
/// Lookups of things that do not exist return `None` or an empty list,
/// never an error.
#[async_trait]
pub trait ManagementQuery: Send + Sync {
    async fn operating_system(&self) -> Result<OsInfo>;
    /// PID of the running service `service_name`, `None` if it is not
    /// installed or not running.
    async fn service_pid(&self, service_name: &str) -> Result<Option<GuestPid>>;
    /// Direct children of `parent`.
    async fn child_pids(&self, parent: &GuestPid) -> Result<Vec<GuestPid>>;
}

/// What a kill attempt found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    Killed,
    AlreadyAbsent,
}

/// Kills a guest process tree without going through the elevation tool.
#[async_trait]
pub trait DirectKill: Send + Sync {
    async fn kill_tree(&self, pid: &GuestPid, timeout: Duration) -> Result<KillOutcome>;
}
