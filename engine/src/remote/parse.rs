//! # guestrs Guest Output Parsers (`remote::parse`)
//!
//! File: engine/src/remote/parse.rs
//!
//! Pure functions turning guest command output into values:
//!
//! - `parse_environment`: `NAME=VALUE` lines (the output of `set`), up to
//!   the first blank line.
//! - `parse_registry_value`: one value out of `reg query <key> /v <name>`.
//! - `scrape_process_id`: the spawned-process notice of the elevation tool.
//!
//! Malformed input is a `GuestError::Parse` carrying the offending text.
//!
use crate::common::management::GuestPid;
use crate::core::error::{GuestError, Result};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static REG_TYPE_AND_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*REG_\w+(?:\s+(?P<value>.*))?$").expect("registry value pattern is valid")
});

static SPAWNED_PROCESS_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"with process ID (\d+)").expect("process id pattern is valid")
});

/// Parses `NAME=VALUE` lines until the first blank line (or end of input).
///
/// Each line is split at its first `=`, so values may themselves contain
/// `=`. A line with no `=`, or with an empty name, fails the whole parse.
///
/// ```rust
/// use guestrs_engine::remote::parse::parse_environment;
///
/// let env = parse_environment("FOO=bar\nBAZ=1\n\n").unwrap();
/// assert_eq!(env["FOO"], "bar");
/// assert_eq!(env["BAZ"], "1");
/// ```
pub fn parse_environment(output: &str) -> Result<HashMap<String, String>> {
    let mut variables = HashMap::new();
    for line in output.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            break;
        }
        match line.split_once('=') {
            Some((name, value)) if !name.is_empty() => {
                variables.insert(name.to_string(), value.to_string());
            }
            _ => {
                return Err(GuestError::Parse {
                    what: "environment".to_string(),
                    raw: line.to_string(),
                })
            }
        }
    }
    Ok(variables)
}

/// Extracts the data of value `name` from `reg query` output.
///
/// Looks for a line of the shape `<name> REG_<TYPE> <value>` (leading
/// whitespace allowed, name matched case-insensitively) and returns everything
/// after the type token, trimmed. Blank lines and the key header are skipped.
pub fn parse_registry_value(output: &str, name: &str) -> Result<String> {
    for line in output.lines() {
        let line = line.trim();
        let Some(prefix) = line.get(..name.len()) else {
            continue;
        };
        if !prefix.eq_ignore_ascii_case(name) {
            continue;
        }
        let rest = &line[name.len()..];
        if !rest.starts_with(char::is_whitespace) {
            continue;
        }
        if let Some(caps) = REG_TYPE_AND_VALUE.captures(rest) {
            let value = caps.name("value").map_or("", |m| m.as_str());
            return Ok(value.trim().to_string());
        }
    }
    Err(GuestError::Parse {
        what: format!("registry value '{name}'"),
        raw: output.to_string(),
    })
}

/// Finds the `with process ID <digits>` notice in the elevation tool's
/// diagnostic text. Absence is normal, not an error.
pub fn scrape_process_id(diagnostic: &str) -> Option<GuestPid> {
    SPAWNED_PROCESS_ID
        .captures(diagnostic)
        .and_then(|caps| caps.get(1))
        .and_then(|m| GuestPid::parse(m.as_str()).ok())
}
