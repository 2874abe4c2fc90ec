//! Scripted `ProcessRunner` for unit tests.
use crate::common::process::{CommandResult, CommandSpec, LocalProcess, ProcessRunner};
use crate::core::error::{GuestError, Result};
use async_trait::async_trait;
use chrono::Local;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Answers each `run` with the next queued result (exit 0 with no output once
/// the queue is empty) and records the masked command lines it was given.
#[derive(Default)]
pub(crate) struct ScriptedRunner {
    responses: Mutex<VecDeque<CommandResult>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub(crate) fn exited(self, code: i32, stdout: &str, stderr: &str) -> Self {
        self.responses.lock().unwrap().push_back(CommandResult::exited(
            stdout.to_string(),
            stderr.to_string(),
            code,
            Local::now(),
        ));
        self
    }

    pub(crate) fn timed_out(self) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(CommandResult::timed_out(String::new(), String::new()));
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec, _timeout: Option<Duration>) -> Result<CommandResult> {
        self.calls.lock().unwrap().push(spec.display_masked(Some("pw")));
        let next = self.responses.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| CommandResult::exited(String::new(), String::new(), 0, Local::now())))
    }

    fn spawn_background(&self, spec: &CommandSpec) -> Result<Box<dyn LocalProcess>> {
        Err(GuestError::Config(format!(
            "background launch of {} not scripted",
            spec.program_display()
        )))
    }
}
