//! # guestrs File Transfer (`common::transfer`)
//!
//! File: engine/src/common/transfer/mod.rs
//!
//! ## Overview
//!
//! The remote layer treats the guest filesystem as an opaque bridge: it names
//! files by their guest path (`C:\TMP1\x.txt`) and asks a `FileTransfer` to
//! move or inspect them. `MappedDriveTransfer` implements this over the
//! guest's administrative share; tests use an in-memory implementation.
//!
//! ## Architecture
//!
//! - **`path`**: Guest path string helpers (network path conversion, joins, quoting).
//! - **`copy`**: Copy semantics (file/file, file/dir, recursive dir) via `fs_extra`.
//! - **`mapped_drive`**: `DriveMapping` guard and the `MappedDriveTransfer` implementation.
//!
use crate::core::error::Result;
use async_trait::async_trait;
use std::path::Path;

pub mod copy;
pub mod mapped_drive;
pub mod path;

pub use mapped_drive::{DriveMapping, MappedDriveTransfer};

/// Moves files between the host and one guest, addressing guest files by
/// their absolute guest path.
#[async_trait]
pub trait FileTransfer: Send + Sync {
    /// Copies a local file or directory to `guest_path`.
    async fn copy_to_guest(&self, local: &Path, guest_path: &str) -> Result<()>;
    /// Copies a guest file or directory to `local`.
    async fn copy_from_guest(&self, guest_path: &str, local: &Path) -> Result<()>;
    async fn file_exists(&self, guest_path: &str) -> Result<bool>;
    async fn directory_exists(&self, guest_path: &str) -> Result<bool>;
    /// Deletes a guest file. With `ignore_errors` every failure (including a
    /// missing file) is logged and swallowed.
    async fn delete_file(&self, guest_path: &str, ignore_errors: bool) -> Result<()>;
    async fn delete_directory(&self, guest_path: &str, recursive: bool) -> Result<()>;
    /// Creates a guest directory and any missing parents.
    async fn create_directory(&self, guest_path: &str) -> Result<()>;
    /// Clears the read-only attribute of a guest file.
    async fn clear_read_only(&self, guest_path: &str) -> Result<()>;
}
