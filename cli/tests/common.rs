//! # guestrs CLI Integration Test Common Helpers
//!
//! File: cli/tests/common.rs
//!
//! ## Overview
//!
//! Shared helpers for the integration tests in `cli/tests/`. Each `.rs` file
//! in that directory is compiled as its own test crate and runs the compiled
//! `guestrs` binary.
//!

// Different test files use different helpers.
#![allow(dead_code)]

pub use assert_cmd::Command;
use std::io::Write;
use tempfile::NamedTempFile;

/// # Get guestrs Command (`guestrs_cmd`)
///
/// An `assert_cmd::Command` for the compiled `guestrs` binary, with the
/// password variable cleared so the host environment cannot leak in.
///
/// ## Panics
/// Panics if the `guestrs` binary cannot be found via `Command::cargo_bin`.
pub fn guestrs_cmd() -> Command {
    let mut cmd = Command::cargo_bin("guestrs").expect("Failed to find guestrs binary for testing");
    cmd.env_remove("GUESTRS_PASSWORD");
    cmd
}

/// Writes `content` to a temporary TOML file for `--config`.
pub fn config_file(content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("Failed to create temp config file");
    file.write_all(content.as_bytes())
        .expect("Failed to write temp config file");
    file
}
