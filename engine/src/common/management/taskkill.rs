//! # guestrs Direct Kill (`common::management::taskkill`)
//!
//! File: engine/src/common/management/taskkill.rs
//!
//! `DirectKill` implemented with the host's `taskkill`, which talks to the
//! guest on its own (`/S <address>`), without the elevation tool:
//!
//! ```text
//! taskkill /S <address> /U <address>\<user> /P <pw> /PID <pid> /T /F
//! ```
//!
//! The same exit-code convention applies when `taskkill /PID <pid> /T /F` is
//! run on the guest through the elevation tool, so the classification lives
//! here as `classify_taskkill`.
//!
use crate::common::management::{DirectKill, GuestPid, KillOutcome};
use crate::common::process::{CommandResult, CommandSpec, ProcessRunner};
use crate::core::error::{GuestError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Exit code `taskkill` uses when the process does not exist.
pub const TASKKILL_NOT_FOUND_EXIT: i32 = 128;

/// Classifies a finished `taskkill` run by exit code and output.
///
/// Returns `None` for any failure other than "process not found".
pub fn classify_taskkill(exit_code: i32, output: &str) -> Option<KillOutcome> {
    if exit_code == 0 {
        return Some(KillOutcome::Killed);
    }
    let lowered = output.to_ascii_lowercase();
    if exit_code == TASKKILL_NOT_FOUND_EXIT || lowered.contains("not found") {
        Some(KillOutcome::AlreadyAbsent)
    } else {
        None
    }
}

pub struct TaskkillCommand {
    address: String,
    username: String,
    password: String,
    runner: Arc<dyn ProcessRunner>,
}

impl TaskkillCommand {
    pub fn new(
        address: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self {
            address: address.into(),
            username: username.into(),
            password: password.into(),
            runner,
        }
    }

    fn spec(&self, pid: &GuestPid) -> CommandSpec {
        CommandSpec::new("taskkill").args([
            "/S".to_string(),
            self.address.clone(),
            "/U".to_string(),
            format!(r"{}\{}", self.address, self.username),
            "/P".to_string(),
            self.password.clone(),
            "/PID".to_string(),
            pid.to_string(),
            "/T".to_string(),
            "/F".to_string(),
        ])
    }
}

#[async_trait]
impl DirectKill for TaskkillCommand {
    #[instrument(skip(self, timeout), fields(pid = %pid))]
    async fn kill_tree(&self, pid: &GuestPid, timeout: Duration) -> Result<KillOutcome> {
        let result: CommandResult = self.runner.run(&self.spec(pid), Some(timeout)).await?;
        let exit_code = match (result.has_exited, result.exit_code) {
            (true, Some(code)) => code,
            _ => {
                return Err(GuestError::Timeout {
                    operation: format!("taskkill of guest process {pid}"),
                    timeout,
                })
            }
        };
        let output = result.combined_output();
        match classify_taskkill(exit_code, &output) {
            Some(outcome) => {
                debug!("taskkill outcome for {}: {:?}", pid, outcome);
                Ok(outcome)
            }
            None => Err(GuestError::ToolFailed {
                command: format!("taskkill /S {} /PID {} /T /F", self.address, pid),
                exit_code: Some(exit_code),
                output,
            }),
        }
    }
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::process::testing::ScriptedRunner;

    #[test]
    fn test_classify_taskkill() {
        assert_eq!(classify_taskkill(0, ""), Some(KillOutcome::Killed));
        assert_eq!(
            classify_taskkill(128, "ERROR: The process \"4242\" not found."),
            Some(KillOutcome::AlreadyAbsent)
        );
        assert_eq!(
            classify_taskkill(1, "ERROR: The process \"4242\" not found."),
            Some(KillOutcome::AlreadyAbsent)
        );
        assert_eq!(classify_taskkill(1, "ERROR: Access denied."), None);
    }

    #[tokio::test]
    async fn test_kill_tree_outcomes() {
        let runner = Arc::new(
            ScriptedRunner::default()
                .exited(0, "SUCCESS: The process with PID 4242 has been terminated.", "")
                .exited(128, "", "ERROR: The process \"4242\" not found.")
                .exited(1, "", "ERROR: Logon failure: unknown user name or bad password.")
                .timed_out(),
        );
        let killer = TaskkillCommand::new("10.0.0.5", "admin", "pw", runner.clone());
        let pid = GuestPid::parse("4242").unwrap();
        let timeout = Duration::from_secs(10);

        assert_eq!(killer.kill_tree(&pid, timeout).await.unwrap(), KillOutcome::Killed);
        assert_eq!(
            killer.kill_tree(&pid, timeout).await.unwrap(),
            KillOutcome::AlreadyAbsent
        );
        assert!(matches!(
            killer.kill_tree(&pid, timeout).await.unwrap_err(),
            GuestError::ToolFailed { exit_code: Some(1), .. }
        ));
        assert!(matches!(
            killer.kill_tree(&pid, timeout).await.unwrap_err(),
            GuestError::Timeout { .. }
        ));
        assert_eq!(
            runner.calls()[0],
            r"taskkill /S 10.0.0.5 /U 10.0.0.5\admin /P ******** /PID 4242 /T /F"
        );
    }
}
