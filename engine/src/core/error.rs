//! # guestrs Error Types
//!
//! File: engine/src/core/error.rs
//!
//! ## Overview
//!
//! This module defines the error type used throughout the guestrs engine.
//! Every failure the engine can surface maps onto one `GuestError` variant, so
//! callers (and the retry policy in `core::retry`) can decide what to do by
//! matching on the variant instead of inspecting message text.
//!
//! ## Architecture
//!
//! - `GuestError`: a `thiserror` enum, one variant per failure class
//!   (transient network failure, timeout, parse failure, tool-reported failure,
//!   startup failure, ...).
//! - `Result<T>`: alias for `std::result::Result<T, GuestError>`.
//!
//! Note what is *not* an error here: a local tool process that outlives its
//! execution timeout is a normal `CommandResult` with `has_exited == false`,
//! and a lookup for a service or process that does not exist returns `None`.
//!
//! ## Examples
//!
//! ```rust
//! use guestrs_engine::core::error::GuestError;
//!
//! let err = GuestError::Parse {
//!     what: "environment".into(),
//!     raw: "NOEQUALS".into(),
//! };
//! assert!(!err.is_transient());
//! ```
//!
use std::time::Duration;
use thiserror::Error;

/// Custom error type for the guestrs engine.
#[derive(Error, Debug)]
pub enum GuestError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// A network-backed operation (file transfer, drive mapping, reachability)
    /// failed after its documented retry.
    #[error("Transient failure during {operation}: {source}")]
    Transient {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation} did not complete within {} seconds", timeout.as_secs_f64())]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    #[error("Guest process {program} {arguments} was not started in {} seconds.", timeout.as_secs())]
    ProcessNotStarted {
        program: String,
        arguments: String,
        timeout: Duration,
    },

    #[error("Elevation tool did not report a spawned process for command: {command}")]
    NoSpawnedProcessReported { command: String },

    #[error("Cannot correlate detached launch: {} new child processes appeared ({})", candidates.len(), candidates.join(", "))]
    AmbiguousCorrelation { candidates: Vec<String> },

    #[error("Failed to parse {what} output: \"{raw}\"")]
    Parse { what: String, raw: String },

    #[error("External command failed: {command}, exit code: {exit_code:?}, output:\n{output}")]
    ToolFailed {
        command: String,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("Failed to start local process '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Session startup failed at '{stage}' after {attempts} attempts: {last_error}")]
    Startup {
        stage: String,
        attempts: u32,
        last_error: Box<GuestError>,
    },

    #[error("{missing} is not populated. Be sure that the machine is really logged in, or retry if it was started only shortly ago.")]
    NotLoggedIn { missing: String },
}

impl GuestError {
    /// Wraps a local I/O error with a human-readable context string.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        GuestError::Io {
            context: context.into(),
            source,
        }
    }

    /// Returns `true` for failures worth retrying: network-backed operations,
    /// local process start failures, timeouts and an incomplete guest login.
    /// Parse failures and ambiguous correlations never become valid by waiting.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GuestError::Transient { .. }
                | GuestError::Timeout { .. }
                | GuestError::Spawn { .. }
                | GuestError::Io { .. }
                | GuestError::ToolFailed { .. }
                | GuestError::NotLoggedIn { .. }
        )
    }
}

/// Result type used across the engine.
pub type Result<T> = std::result::Result<T, GuestError>;
