//! # guestrs Engine
//!
//! File: engine/src/lib.rs
//!
//! ## Overview
//!
//! Drives commands on a remote Windows guest from a host, through an
//! external elevated-execution tool that offers no structured output and no
//! process handle. The engine:
//!
//! - runs the tool as a local subprocess and captures its output under a
//!   timeout (`common::process`);
//! - turns a guest command into stdout, stderr and an exit code by
//!   redirecting into guest temp files and copying them back
//!   (`remote::shell`);
//! - finds the guest PID of a fire-and-forget launch, by scraping the tool's
//!   diagnostic text or by diffing the tool service's child processes
//!   (`remote::correlator`);
//! - kills guest process trees and lists children (`remote::process`).
//!
//! `remote::RemoteSession` ties these together for one guest.
//!
//! ## Architecture
//!
//! - **`core`**: configuration, the `GuestError` type, the retry policy.
//! - **`common`**: host-side collaborators (subprocesses, file transfer,
//!   management queries, reachability), each behind a trait.
//! - **`remote`**: the execution and correlation layer and the session facade.
//!
pub mod common;
pub mod core;
pub mod remote;

pub use crate::common::management::GuestPid;
pub use crate::core::config::Config;
pub use crate::core::error::{GuestError, Result};
pub use crate::remote::{RemoteProcessHandle, RemoteSession, ShellOutput};
