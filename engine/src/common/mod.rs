//! # guestrs Common Collaborators (`common`)
//!
//! File: engine/src/common/mod.rs
//!
//! ## Overview
//!
//! Shared building blocks the remote layer is assembled from. Nothing in
//! here knows about sessions or correlation; each submodule wraps one local
//! tool or OS facility behind a trait so the remote layer can be tested with
//! fakes.
//!
//! ## Architecture
//!
//! - **`process`**: Local subprocess execution (`CommandSpec`, `ProcessRunner`,
//!   `SubprocessRunner`, `CommandResult`).
//! - **`transfer`**: Moving files between host and guest over a mapped
//!   network drive (`FileTransfer`, `MappedDriveTransfer`, guest path helpers).
//! - **`management`**: Querying and killing guest processes from the host
//!   (`ManagementQuery`, `WmicQuery`, `LazyManagement`, `DirectKill`,
//!   `TaskkillCommand`).
//! - **`network`**: Guest reachability probing (`Reachability`, `TcpProbe`).
//!

/// Local subprocess execution with output capture and timeouts.
pub mod process;
/// Host/guest file transfer through a mapped network drive.
pub mod transfer;
/// Guest service/process queries and direct remote kill.
pub mod management;
/// TCP reachability probe used at session bootstrap.
pub mod network;
