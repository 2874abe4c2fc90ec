//! # guestrs Command Specification (`common::process::command_spec`)
//!
//! File: engine/src/common/process/command_spec.rs
//!
//! ## Overview
//!
//! `CommandSpec` describes one local process invocation: the program, its
//! arguments as discrete argv elements, and an optional *raw tail*. The raw
//! tail exists for the elevation tool: everything after its own flags is the
//! guest command line (including `>`/`2>` redirections), which the tool
//! forwards verbatim. On Windows hosts the tail is appended with
//! `CommandExt::raw_arg` so it is not re-quoted into a single argument.
//!
use std::ffi::OsString;
use std::process::Stdio;
use tokio::process::Command;

/// Placeholder shown in logs instead of secrets.
pub const MASK: &str = "********";

/// Specification for a local command to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// The program to execute.
    pub program: OsString,
    /// Arguments as discrete elements.
    pub args: Vec<OsString>,
    /// Command-line text appended verbatim after `args`.
    pub raw_tail: Option<String>,
}

impl CommandSpec {
    #[must_use]
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            raw_tail: None,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the verbatim command-line tail.
    #[must_use]
    pub fn raw_tail(mut self, tail: impl Into<String>) -> Self {
        self.raw_tail = Some(tail.into());
        self
    }

    /// Program name as a lossy string, for error messages.
    pub fn program_display(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    /// Arguments (and raw tail) joined with spaces, with every occurrence of
    /// `secret` replaced by [`MASK`] (so `/password:<pw>` is masked too).
    pub fn args_display_masked(&self, secret: Option<&str>) -> String {
        let mut out = String::new();
        for arg in &self.args {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&arg.to_string_lossy());
        }
        if let Some(tail) = &self.raw_tail {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(tail);
        }
        match secret {
            Some(s) if !s.is_empty() => out.replace(s, MASK),
            _ => out,
        }
    }

    /// Full command line for logs: program followed by masked arguments.
    pub fn display_masked(&self, secret: Option<&str>) -> String {
        let args = self.args_display_masked(secret);
        if args.is_empty() {
            self.program_display()
        } else {
            format!("{} {}", self.program_display(), args)
        }
    }

    /// Builds a `tokio::process::Command` with the given stdio configuration.
    pub fn to_command(&self, stdout: Stdio, stderr: Stdio) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);
        if let Some(tail) = &self.raw_tail {
            append_raw_tail(&mut cmd, tail);
        }
        #[cfg(windows)]
        {
            // CREATE_NO_WINDOW
            cmd.creation_flags(0x0800_0000);
        }
        cmd
    }
}

#[cfg(windows)]
fn append_raw_tail(cmd: &mut Command, tail: &str) {
    cmd.raw_arg(tail);
}

#[cfg(not(windows))]
fn append_raw_tail(cmd: &mut Command, tail: &str) {
    // Non-Windows hosts only run local helpers; split on whitespace.
    cmd.args(tail.split_whitespace());
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_collects_args_in_order() {
        let spec = CommandSpec::new("PsExec.exe")
            .arg("-accepteula")
            .args(["-h", "-i"])
            .raw_tail(r#"C:\TMP1\a.bat > "C:\TMP1\o""#);

        assert_eq!(spec.program, OsString::from("PsExec.exe"));
        assert_eq!(spec.args, vec!["-accepteula", "-h", "-i"]);
        assert_eq!(spec.raw_tail.as_deref(), Some(r#"C:\TMP1\a.bat > "C:\TMP1\o""#));
    }

    #[test]
    fn test_display_masks_secret() {
        let spec = CommandSpec::new("taskkill")
            .args(["/U", "user", "/P", "hunter2", "/PID", "42"]);
        assert_eq!(
            spec.display_masked(Some("hunter2")),
            "taskkill /U user /P ******** /PID 42"
        );
        // An empty secret never masks anything.
        assert_eq!(
            spec.display_masked(Some("")),
            "taskkill /U user /P hunter2 /PID 42"
        );
    }

    #[test]
    fn test_display_masks_embedded_secret() {
        let spec = CommandSpec::new("wmic").args(["/node:g", "/password:hunter2", "os"]);
        assert_eq!(
            spec.display_masked(Some("hunter2")),
            "wmic /node:g /password:******** os"
        );
    }

    #[test]
    fn test_display_includes_raw_tail() {
        let spec = CommandSpec::new("tool").raw_tail("cmd.exe /c echo hi");
        assert_eq!(spec.display_masked(None), "tool cmd.exe /c echo hi");
    }
}
