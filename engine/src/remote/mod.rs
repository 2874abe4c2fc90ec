//! # guestrs Remote Execution (`remote`)
//!
//! File: engine/src/remote/mod.rs
//!
//! ## Overview
//!
//! The remote command execution and process correlation layer, leaves first:
//!
//! - **`tool`**: `ElevatedExecutor` / `ElevationTool`, which builds the
//!   elevation tool's command line and runs it synchronously or detached.
//! - **`parse`**: Environment, registry and spawned-process-notice parsers.
//! - **`shell`**: `RemoteShell`, a synchronous stdout/stderr/exit-code
//!   contract built from batch files, redirection and file transfer.
//! - **`correlator`**: `ProcessCorrelator` with the `DiagnosticScrape` and
//!   `ChildTreeDiff` strategies for detached launches.
//! - **`process`**: `RemoteProcessHandle`, which supports kill-tree and
//!   child enumeration.
//! - **`session`**: `RemoteSession`, the facade owning one guest.
//!
//! ## Data flow
//!
//! ```text
//! RemoteSession -> RemoteShell -> ElevatedExecutor -> ProcessRunner            (synchronous)
//! RemoteSession -> RemoteShell -> ProcessCorrelator -> RemoteProcessHandle     (detached)
//! ```
//!
pub mod correlator;
pub mod parse;
pub mod process;
pub mod session;
pub mod shell;
pub mod tool;

pub use correlator::{ChildTreeDiff, DiagnosticScrape, ProcessCorrelator};
pub use process::{Children, ProcessControl, RemoteProcessHandle};
pub use session::{BootstrapPolicy, RemoteSession, SessionBuilder};
pub use shell::{RemoteShell, ShellOutput};
pub use tool::{ElevatedExecutor, ElevationTool, ElevationToolSettings};
