//! # guestrs WMIC Query (`common::management::wmic`)
//!
//! File: engine/src/common/management/wmic.rs
//!
//! ## Overview
//!
//! `ManagementQuery` implemented by running the host's `wmic` client against
//! the guest:
//!
//! ```text
//! wmic /node:<address> /user:<address>\<user> /password:<pw> <alias> [where <cond>] get <props> /value
//! ```
//!
//! `/value` output is a sequence of records separated by blank lines, each
//! line `Property=Value`. A query matching nothing prints a notice on stderr
//! and no records. A stopped service reports `ProcessId=0`, which is treated
//! as "not running".
//!
use crate::common::management::{GuestPid, ManagementQuery, OsInfo};
use crate::common::process::{CommandResult, CommandSpec, ProcessRunner};
use crate::core::error::{GuestError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

const WMIC_TIMEOUT: Duration = Duration::from_secs(60);

pub struct WmicQuery {
    address: String,
    username: String,
    password: String,
    runner: Arc<dyn ProcessRunner>,
}

impl WmicQuery {
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

    fn spec(&self, query: &[&str]) -> CommandSpec {
        CommandSpec::new("wmic")
            .arg(format!("/node:{}", self.address))
            .arg(format!(r"/user:{}\{}", self.address, self.username))
            .arg(format!("/password:{}", self.password))
            .args(query.iter().copied())
            .arg("/value")
    }

    /// Runs a query and returns its records. A non-zero exit is an error.
    async fn query(&self, query: &[&str]) -> Result<Vec<HashMap<String, String>>> {
        let spec = self.spec(query);
        let result: CommandResult = self.runner.run(&spec, Some(WMIC_TIMEOUT)).await?;
        if !result.has_exited {
            return Err(GuestError::Timeout {
                operation: format!("wmic {}", query.join(" ")),
                timeout: WMIC_TIMEOUT,
            });
        }
        if !result.success() {
            return Err(GuestError::ToolFailed {
                command: format!("wmic {}", query.join(" ")),
                exit_code: result.exit_code,
                output: result.combined_output(),
            });
        }
        Ok(parse_wmic_values(&result.stdout))
    }
}

/// Parses `/value` output into one map per record.
///
/// Lines without `=` (notices such as "No Instance(s) Available.") are
/// skipped. Values keep everything after the first `=`.
pub fn parse_wmic_values(output: &str) -> Vec<HashMap<String, String>> {
    let mut records = Vec::new();
    let mut current = HashMap::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            if !current.is_empty() {
                records.push(std::mem::take(&mut current));
            }
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            current.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    if !current.is_empty() {
        records.push(current);
    }
    records
}

fn required(record: &HashMap<String, String>, key: &str, raw: &str) -> Result<String> {
    record.get(key).cloned().ok_or_else(|| GuestError::Parse {
        what: format!("wmic {key}"),
        raw: raw.to_string(),
    })
}

#[async_trait]
impl ManagementQuery for WmicQuery {
    #[instrument(skip(self), fields(address = %self.address))]
    async fn operating_system(&self) -> Result<OsInfo> {
        let records = self
            .query(&["os", "get", "CSName,WindowsDirectory,Caption,Version"])
            .await?;
        let raw = format!("{records:?}");
        let record = records.into_iter().next().ok_or_else(|| GuestError::Parse {
            what: "wmic os".to_string(),
            raw: raw.clone(),
        })?;
        let info = OsInfo {
            computer_name: required(&record, "CSName", &raw)?,
            windows_directory: required(&record, "WindowsDirectory", &raw)?,
            caption: required(&record, "Caption", &raw)?,
            version: required(&record, "Version", &raw)?,
        };
        debug!("Guest OS: {} {} ({})", info.caption, info.version, info.computer_name);
        Ok(info)
    }

    async fn service_pid(&self, service_name: &str) -> Result<Option<GuestPid>> {
        let condition = format!("Name='{service_name}'");
        let records = self
            .query(&["service", "where", &condition, "get", "ProcessId"])
            .await?;
        match records.first().and_then(|r| r.get("ProcessId")) {
            None => Ok(None),
            Some(pid) if pid.trim() == "0" => Ok(None),
            Some(pid) => GuestPid::parse(pid).map(Some),
        }
    }

    async fn child_pids(&self, parent: &GuestPid) -> Result<Vec<GuestPid>> {
        let condition = format!("ParentProcessId={parent}");
        let records = self
            .query(&["process", "where", &condition, "get", "ProcessId"])
            .await?;
        records
            .iter()
            .filter_map(|r| r.get("ProcessId"))
            .map(|pid| GuestPid::parse(pid))
            .collect()
    }
}
