//! # guestrs Guest Path Helpers (`common::transfer::path`)
//!
//! File: engine/src/common/transfer/path.rs
//!
//! ## Overview
//!
//! Guest paths are Windows paths kept as plain strings (`C:\TMP1\x.bat`),
//! since the host running guestrs is not necessarily Windows. This module
//! converts them to the administrative-share form the host reaches them
//! through (`\\<address>\C$\TMP1\x.bat`) and builds guest temp paths.
//!
use crate::core::error::{GuestError, Result};

/// Splits `C:\rest` into `('C', "rest")`.
fn split_drive(guest_path: &str) -> Result<(char, &str)> {
    let mut chars = guest_path.chars();
    match (chars.next(), chars.next(), chars.next()) {
        (Some(drive), Some(':'), Some('\\')) if drive.is_ascii_alphabetic() => {
            Ok((drive.to_ascii_uppercase(), &guest_path[3..]))
        }
        (Some(drive), Some(':'), None) if drive.is_ascii_alphabetic() => {
            Ok((drive.to_ascii_uppercase(), ""))
        }
        _ => Err(GuestError::Config(format!(
            "'{guest_path}' is not an absolute guest path (expected e.g. 'C:\\dir\\file')"
        ))),
    }
}

/// Administrative share holding `guest_path`, e.g. `\\10.0.0.5\C$`.
pub fn guest_share(address: &str, guest_path: &str) -> Result<String> {
    let (drive, _) = split_drive(guest_path)?;
    Ok(format!(r"\\{address}\{drive}$"))
}

/// Network form of a guest path: `C:\x\y` becomes `\\<address>\C$\x\y`.
pub fn to_network_path(address: &str, guest_path: &str) -> Result<String> {
    let (drive, rest) = split_drive(guest_path)?;
    if rest.is_empty() {
        Ok(format!(r"\\{address}\{drive}$"))
    } else {
        Ok(format!(r"\\{address}\{drive}$\{rest}"))
    }
}

/// Joins a guest directory and a file name with exactly one backslash.
pub fn guest_join(dir: &str, name: &str) -> String {
    if dir.ends_with('\\') {
        format!("{dir}{name}")
    } else {
        format!("{dir}\\{name}")
    }
}

/// Last component of a guest path.
pub fn guest_file_name(guest_path: &str) -> &str {
    guest_path
        .rsplit('\\')
        .next()
        .unwrap_or(guest_path)
}

/// Quotes a guest path for a `cmd.exe` command line if it contains spaces.
pub fn quote_if_needed(path: &str) -> String {
    if path.contains(' ') && !(path.starts_with('"') && path.ends_with('"')) {
        format!("\"{path}\"")
    } else {
        path.to_string()
    }
}
