//! # guestrs Remote Process Handles (`remote::process`)
//!
//! File: engine/src/remote/process.rs
//!
//! ## Overview
//!
//! A `RemoteProcessHandle` names one guest process by its PID string and
//! carries the capabilities needed to act on it (`ProcessControl`): the
//! elevated executor, the management query and the direct killer of the
//! session it came from.
//!
//! Handles compare and hash by PID only. Killing the process does not
//! invalidate the handle; it remains a valid value naming a process that no
//! longer exists.
//!
//! ## Operations
//!
//! - `kill_tree(timeout)`: direct remote kill first; on any failure, the
//!   guest's own `taskkill /PID <pid> /T /F` through the elevation tool. A
//!   process that is already gone is success on both paths.
//! - `children()`: direct children as new handles, in a lazy, consumable
//!   `Children` iterator.
//!
use crate::common::management::taskkill::classify_taskkill;
use crate::common::management::{DirectKill, GuestPid, KillOutcome, ManagementQuery};
use crate::core::error::{GuestError, Result};
use crate::remote::shell::run_without_output;
use crate::remote::tool::ElevatedExecutor;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Instrument, Span};

/// The session capabilities a process handle acts through.
pub struct ProcessControl {
    pub executor: Arc<dyn ElevatedExecutor>,
    pub query: Arc<dyn ManagementQuery>,
    pub killer: Arc<dyn DirectKill>,
    pub span: Span,
}

/// A guest process, identified by its PID string.
#[derive(Clone)]
pub struct RemoteProcessHandle {
    pid: GuestPid,
    control: Arc<ProcessControl>,
}

impl RemoteProcessHandle {
    pub fn new(pid: GuestPid, control: Arc<ProcessControl>) -> Self {
        Self { pid, control }
    }

    pub fn pid(&self) -> &GuestPid {
        &self.pid
    }

    /// Kills this process and all of its descendants.
    ///
    /// # Errors
    ///
    /// Only when both the direct kill and the elevated fallback fail for a
    /// reason other than the process being absent.
    pub async fn kill_tree(&self, timeout: Duration) -> Result<()> {
        let pid = &self.pid;
        async {
            match self.control.killer.kill_tree(pid, timeout).await {
                Ok(KillOutcome::Killed) => {
                    info!("Killed guest process tree {}", pid);
                    return Ok(());
                }
                Ok(KillOutcome::AlreadyAbsent) => {
                    debug!("Guest process {} was already gone", pid);
                    return Ok(());
                }
                Err(e) => warn!("Direct kill of {} failed, falling back to elevated taskkill: {}", pid, e),
            }

            let command = format!("taskkill /PID {pid} /T /F");
            let exit_code =
                run_without_output(self.control.executor.as_ref(), &command, timeout, Some(timeout))
                    .await?;
            match classify_taskkill(exit_code, "") {
                Some(outcome) => {
                    debug!("Elevated taskkill of {}: {:?}", pid, outcome);
                    Ok(())
                }
                None => Err(GuestError::ToolFailed {
                    command,
                    exit_code: Some(exit_code),
                    output: String::new(),
                }),
            }
        }
        .instrument(self.control.span.clone())
        .await
    }

    /// Direct children of this process.
    pub async fn children(&self) -> Result<Children> {
        let pids = self
            .control
            .query
            .child_pids(&self.pid)
            .instrument(self.control.span.clone())
            .await?;
        Ok(Children {
            pids: pids.into_iter(),
            control: Arc::clone(&self.control),
        })
    }
}

impl PartialEq for RemoteProcessHandle {
    fn eq(&self, other: &Self) -> bool {
        self.pid == other.pid
    }
}

impl Eq for RemoteProcessHandle {}

impl Hash for RemoteProcessHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pid.hash(state);
    }
}

impl fmt::Debug for RemoteProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteProcessHandle")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for RemoteProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pid)
    }
}

/// Child processes of a handle, produced one at a time. Consuming it
/// exhausts it; query again for a fresh listing.
pub struct Children {
    pids: std::vec::IntoIter<GuestPid>,
    control: Arc<ProcessControl>,
}

impl Iterator for Children {
    type Item = RemoteProcessHandle;

    fn next(&mut self) -> Option<Self::Item> {
        self.pids
            .next()
            .map(|pid| RemoteProcessHandle::new(pid, Arc::clone(&self.control)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.pids.size_hint()
    }
}

impl ExactSizeIterator for Children {}
