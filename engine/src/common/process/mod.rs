//! # guestrs Local Process Execution (`common::process`)
//!
//! File: engine/src/common/process/mod.rs
//!
//! ## Overview
//!
//! Everything that starts a process on the host goes through this module:
//! the elevation tool, `wmic`, `taskkill` and `net use`.
//!
//! - **`command_spec`**: `CommandSpec`, an argv-style description of one
//!   invocation with secret-masking for logs.
//! - **`runner`**: The `ProcessRunner` trait and `SubprocessRunner`, which
//!   drains both output streams concurrently and returns a `CommandResult`.
//!
pub mod command_spec;
pub mod runner;

pub use command_spec::CommandSpec;
pub use runner::{CommandResult, LocalProcess, ProcessRunner, SubprocessRunner};

#[cfg(test)]
pub(crate) mod testing;
