//! # guestrs Engine Integration Test Helpers
//!
//! File: engine/tests/common/mod.rs
//!
//! ## Overview
//!
//! In-memory stand-ins for every collaborator of the remote layer, so shell,
//! correlation, process and session behavior can be tested without a guest:
//!
//! - `MemoryTransfer`: a guest filesystem in a map, with failure injection.
//! - `FakeGuest`: an `ElevatedExecutor` that "runs" batch files found in a
//!   `MemoryTransfer` through a handler closure and writes the redirected
//!   output back, plus scripted detached launches.
//! - `FakeQuery`: scripted service PIDs and child listings.
//! - `FakeKiller`: scripted direct-kill outcomes.
//!

// Different test files use different helpers.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Local;
use guestrs_engine::common::management::{
    DirectKill, GuestPid, KillOutcome, ManagementQuery, OsInfo,
};
use guestrs_engine::common::network::Reachability;
use guestrs_engine::common::process::{CommandResult, LocalProcess};
use guestrs_engine::common::transfer::FileTransfer;
use guestrs_engine::core::error::{GuestError, Result};
use guestrs_engine::remote::process::ProcessControl;
use guestrs_engine::remote::ElevatedExecutor;
use regex::Regex;
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::Span;

pub fn pid(raw: &str) -> GuestPid {
    GuestPid::parse(raw).unwrap()
}

// --- File transfer ---

/// Guest files keyed by their exact guest path.
#[derive(Default)]
pub struct MemoryTransfer {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    fail_copy_from: AtomicBool,
    fail_copy_to_after: Mutex<Option<u32>>,
    copies_to: AtomicU32,
}

impl MemoryTransfer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, guest_path: &str, content: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(guest_path.to_string(), content.to_vec());
    }

    pub fn get(&self, guest_path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(guest_path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        self.files.lock().unwrap().keys().cloned().collect()
    }

    /// Every `copy_from_guest` fails from now on.
    pub fn fail_copy_from(&self) {
        self.fail_copy_from.store(true, Ordering::SeqCst);
    }

    /// `copy_to_guest` succeeds `n` more times, then fails.
    pub fn fail_copy_to_after(&self, n: u32) {
        *self.fail_copy_to_after.lock().unwrap() = Some(n);
    }

    fn transient(operation: &str) -> GuestError {
        GuestError::Transient {
            operation: operation.to_string(),
            source: io::Error::new(io::ErrorKind::Other, "network path was not found"),
        }
    }
}

#[async_trait]
impl FileTransfer for MemoryTransfer {
    async fn copy_to_guest(&self, local: &Path, guest_path: &str) -> Result<()> {
        let done = self.copies_to.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = *self.fail_copy_to_after.lock().unwrap() {
            if done >= limit {
                return Err(Self::transient("copy to guest"));
            }
        }
        let bytes = std::fs::read(local).map_err(|e| GuestError::io("read local", e))?;
        self.put(guest_path, &bytes);
        Ok(())
    }

    async fn copy_from_guest(&self, guest_path: &str, local: &Path) -> Result<()> {
        if self.fail_copy_from.load(Ordering::SeqCst) {
            return Err(Self::transient("copy from guest"));
        }
        let bytes = self
            .get(guest_path)
            .ok_or_else(|| Self::transient("copy from guest"))?;
        std::fs::write(local, bytes).map_err(|e| GuestError::io("write local", e))
    }

    async fn file_exists(&self, guest_path: &str) -> Result<bool> {
        Ok(self.files.lock().unwrap().contains_key(guest_path))
    }

    async fn directory_exists(&self, guest_path: &str) -> Result<bool> {
        let prefix = format!("{}\\", guest_path.trim_end_matches('\\'));
        Ok(self.files.lock().unwrap().keys().any(|k| k.starts_with(&prefix)))
    }

    async fn delete_file(&self, guest_path: &str, ignore_errors: bool) -> Result<()> {
        let removed = self.files.lock().unwrap().remove(guest_path);
        match removed {
            Some(_) => Ok(()),
            None if ignore_errors => Ok(()),
            None => Err(Self::transient("delete file")),
        }
    }

    async fn delete_directory(&self, guest_path: &str, _recursive: bool) -> Result<()> {
        let prefix = format!("{}\\", guest_path.trim_end_matches('\\'));
        self.files.lock().unwrap().retain(|k, _| !k.starts_with(&prefix));
        Ok(())
    }

    async fn create_directory(&self, _guest_path: &str) -> Result<()> {
        Ok(())
    }

    async fn clear_read_only(&self, _guest_path: &str) -> Result<()> {
        Ok(())
    }
}

// --- Elevated executor ---

/// What a guest command printed, and how it ended. `exit_code: None` means
/// the tool did not finish within its timeout.
#[derive(Debug, Clone, Default)]
pub struct GuestRun {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl GuestRun {
    pub fn ok(stdout: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: Some(0),
        }
    }

    pub fn exit(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            ..Self::default()
        }
    }

    pub fn timed_out() -> Self {
        Self::default()
    }
}

type Handler = dyn Fn(&str) -> GuestRun + Send + Sync;

/// Local tool process started by `launch_background`.
pub struct FakeLocalProcess {
    killed: Arc<AtomicBool>,
}

#[async_trait]
impl LocalProcess for FakeLocalProcess {
    fn id(&self) -> Option<u32> {
        Some(4711)
    }

    async fn kill(&mut self) -> Result<()> {
        self.killed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Simulated elevation tool and guest.
pub struct FakeGuest {
    transfer: Arc<MemoryTransfer>,
    handler: Box<Handler>,
    diagnostics: Mutex<VecDeque<String>>,
    commands: Mutex<Vec<String>>,
    pub launches: AtomicU32,
    pub local_killed: Arc<AtomicBool>,
}

impl FakeGuest {
    /// `handler` receives the guest command line (the batch body for
    /// `execute`, the raw command otherwise).
    pub fn new(
        transfer: Arc<MemoryTransfer>,
        handler: impl Fn(&str) -> GuestRun + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            transfer,
            handler: Box::new(handler),
            diagnostics: Mutex::new(VecDeque::new()),
            commands: Mutex::new(Vec::new()),
            launches: AtomicU32::new(0),
            local_killed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Queues diagnostic text for the next `invoke_detached`.
    pub fn push_diagnostic(&self, text: &str) {
        self.diagnostics.lock().unwrap().push_back(text.to_string());
    }

    /// Guest command lines seen so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    fn result(run: &GuestRun) -> CommandResult {
        match run.exit_code {
            Some(code) => CommandResult::exited(String::new(), String::new(), code, Local::now()),
            None => CommandResult::timed_out(String::new(), String::new()),
        }
    }
}

#[async_trait]
impl ElevatedExecutor for FakeGuest {
    async fn invoke_synchronous(
        &self,
        command: &str,
        _start_timeout: Duration,
        _execution_timeout: Option<Duration>,
    ) -> Result<CommandResult> {
        let redirect = Regex::new(r#"^(?P<bat>\S+\.bat) > "(?P<out>[^"]+)" 2>"(?P<err>[^"]+)"$"#).unwrap();
        let Some(caps) = redirect.captures(command) else {
            self.commands.lock().unwrap().push(command.to_string());
            return Ok(Self::result(&(self.handler)(command)));
        };

        let batch = self.transfer.get(&caps["bat"]).expect("batch was copied before running");
        let batch = String::from_utf8(batch).unwrap();
        let body = batch
            .strip_prefix("@echo off\r\n")
            .expect("batch starts with @echo off")
            .trim_end_matches("\r\n")
            .to_string();
        assert!(self.transfer.get(&caps["out"]).is_some(), "stdout file exists before run");
        assert!(self.transfer.get(&caps["err"]).is_some(), "stderr file exists before run");

        self.commands.lock().unwrap().push(body.clone());
        let run = (self.handler)(&body);
        self.transfer.put(&caps["out"], run.stdout.as_bytes());
        self.transfer.put(&caps["err"], run.stderr.as_bytes());
        Ok(Self::result(&run))
    }

    async fn invoke_detached(&self, command: &str, _start_timeout: Duration) -> Result<String> {
        self.commands.lock().unwrap().push(command.to_string());
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(self.diagnostics.lock().unwrap().pop_front().unwrap_or_default())
    }

    fn launch_background(
        &self,
        command: &str,
        _start_timeout: Duration,
    ) -> Result<Box<dyn LocalProcess>> {
        self.commands.lock().unwrap().push(command.to_string());
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeLocalProcess {
            killed: Arc::clone(&self.local_killed),
        }))
    }

    fn describe_launch(&self, command: &str, start_timeout: Duration) -> (String, String) {
        (
            "PsExec.exe".to_string(),
            format!("-d -n {} {}", start_timeout.as_secs(), command),
        )
    }
}

// --- Management query ---

/// Answers come from queues; the last entry of each queue repeats forever.
pub struct FakeQuery {
    version: String,
    service: Mutex<VecDeque<Option<&'static str>>>,
    children: Mutex<VecDeque<Vec<&'static str>>>,
    pub service_queries: AtomicU32,
}

impl FakeQuery {
    pub fn new(version: &str) -> Arc<Self> {
        Self::scripted(version, vec![None], vec![vec![]])
    }

    pub fn scripted(
        version: &str,
        service: Vec<Option<&'static str>>,
        children: Vec<Vec<&'static str>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            version: version.to_string(),
            service: Mutex::new(service.into()),
            children: Mutex::new(children.into()),
            service_queries: AtomicU32::new(0),
        })
    }

    fn next<T: Clone>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
        let mut queue = queue.lock().unwrap();
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl ManagementQuery for FakeQuery {
    async fn operating_system(&self) -> Result<OsInfo> {
        Ok(OsInfo {
            computer_name: "GUEST-PC".to_string(),
            windows_directory: r"C:\Windows".to_string(),
            caption: "Microsoft Windows".to_string(),
            version: self.version.clone(),
        })
    }

    async fn service_pid(&self, _service_name: &str) -> Result<Option<GuestPid>> {
        self.service_queries.fetch_add(1, Ordering::SeqCst);
        Ok(Self::next(&self.service).flatten().map(pid))
    }

    async fn child_pids(&self, _parent: &GuestPid) -> Result<Vec<GuestPid>> {
        Ok(Self::next(&self.children)
            .unwrap_or_default()
            .into_iter()
            .map(pid)
            .collect())
    }
}

// --- Direct kill ---

#[derive(Debug, Clone, Copy)]
pub enum KillScript {
    Killed,
    Absent,
    Fail,
}

/// Plays back `KillScript`s (the last one repeats) and records PIDs.
pub struct FakeKiller {
    script: Mutex<VecDeque<KillScript>>,
    pub killed: Mutex<Vec<String>>,
}

impl FakeKiller {
    pub fn new(script: Vec<KillScript>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            killed: Mutex::new(Vec::new()),
        })
    }

    pub fn killed(&self) -> Vec<String> {
        self.killed.lock().unwrap().clone()
    }
}

#[async_trait]
impl DirectKill for FakeKiller {
    async fn kill_tree(&self, pid: &GuestPid, _timeout: Duration) -> Result<KillOutcome> {
        self.killed.lock().unwrap().push(pid.to_string());
        let step = FakeQuery::next(&self.script).unwrap_or(KillScript::Killed);
        match step {
            KillScript::Killed => Ok(KillOutcome::Killed),
            KillScript::Absent => Ok(KillOutcome::AlreadyAbsent),
            KillScript::Fail => Err(GuestError::ToolFailed {
                command: format!("taskkill /S guest /PID {pid} /T /F"),
                exit_code: Some(1),
                output: "ERROR: The RPC server is unavailable.".to_string(),
            }),
        }
    }
}

// --- Reachability ---

pub struct AlwaysReachable;

#[async_trait]
impl Reachability for AlwaysReachable {
    async fn probe(&self) -> Result<()> {
        Ok(())
    }
}

/// Process control wired to the given fakes.
pub fn control(
    guest: Arc<FakeGuest>,
    query: Arc<FakeQuery>,
    killer: Arc<FakeKiller>,
) -> Arc<ProcessControl> {
    Arc::new(ProcessControl {
        executor: guest,
        query,
        killer,
        span: Span::none(),
    })
}
