//! # guestrs Path Copy (`common::transfer::copy`)
//!
//! File: engine/src/common/transfer/copy.rs
//!
//! ## Overview
//!
//! Copy semantics shared by both transfer directions. Once a guest path has
//! been turned into a network path, copying to or from the guest is an
//! ordinary filesystem copy:
//!
//! - file → file: the destination is overwritten.
//! - file → existing directory: the file keeps its name inside the directory.
//! - directory → directory: the source's contents are copied recursively
//!   into the destination (via `fs_extra`), overwriting existing files.
//!
//! Missing parent directories of the destination are created.
//!
//! This is blocking I/O; async callers run it on the blocking pool.
//!
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Copies `source` to `target` according to the rules above.
///
/// # Returns
///
/// The path that was finally written (for file → directory copies this is
/// `target/<file name>`).
///
/// # Errors
///
/// Returns the underlying `io::Error` if the source does not exist or any
/// read/write fails. `fs_extra` failures are converted to `io::Error`.
pub fn copy_path(source: &Path, target: &Path) -> io::Result<PathBuf> {
    if source.is_dir() {
        debug!("Recursive copy {:?} -> {:?}", source, target);
        fs::create_dir_all(target)?;
        let mut options = fs_extra::dir::CopyOptions::new();
        // Copy the directory's contents, not the directory itself.
        options.overwrite = true;
        options.content_only = true;
        fs_extra::dir::copy(source, target, &options)
            .map_err(|e| io::Error::other(format!("Failed to copy dir {source:?} to {target:?}: {e}")))?;
        return Ok(target.to_path_buf());
    }

    let destination = if target.is_dir() {
        let name = source.file_name().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Source path {source:?} has no file name"),
            )
        })?;
        target.join(name)
    } else {
        target.to_path_buf()
    };
    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    debug!("File copy {:?} -> {:?}", source, destination);
    fs::copy(source, &destination)?;
    Ok(destination)
}
