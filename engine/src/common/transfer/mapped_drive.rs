//! # guestrs Mapped-Drive Transfer (`common::transfer::mapped_drive`)
//!
//! File: engine/src/common/transfer/mapped_drive.rs
//!
//! ## Overview
//!
//! Reaches guest files through the guest's administrative share
//! (`\\<address>\C$`). Every operation maps the share with `net use`, does
//! its work against the network path, and unmaps again. Mappings are never
//! cached or shared between operations: a mapping left behind by one call
//! cannot be trusted by the next (credentials change, the guest reboots).
//!
//! ## Architecture
//!
//! - `DriveMapping` is the scoped resource: `acquire` maps the share,
//!   `release` unmaps it. If a guard is dropped without `release` (early
//!   return, panic, cancelled future) `Drop` schedules the unmap on the
//!   current tokio runtime.
//! - `MappedDriveTransfer` implements `FileTransfer`. Existence checks,
//!   copies and directory creation are retried once after 1500 ms
//!   (`RetryPolicy::once`); deletes are not.
//!
//! Concurrent operations against the same guest root each map the share on
//! their own and may contend with each other's unmap. This is a known
//! limitation of the share-based transfer.
//!
use crate::common::process::{CommandSpec, ProcessRunner};
use crate::common::transfer::{copy, path, FileTransfer};
use crate::core::error::{GuestError, Result};
use crate::core::retry::{RetryError, RetryPolicy, TRANSIENT_RETRY_DELAY};
use async_trait::async_trait;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound for one `net use` invocation.
const NET_USE_TIMEOUT: Duration = Duration::from_secs(60);

/// A mapped guest share, unmapped on release or drop.
pub struct DriveMapping {
    share: String,
    runner: Arc<dyn ProcessRunner>,
    released: bool,
}

impl DriveMapping {
    /// Maps `share` with the given account (`<address>\<user>`).
    ///
    /// # Errors
    ///
    /// `GuestError::Transient` if `net use` does not finish or reports failure,
    /// `GuestError::Spawn` if `net` cannot be started.
    pub async fn acquire(
        runner: Arc<dyn ProcessRunner>,
        share: &str,
        account: &str,
        password: &str,
    ) -> Result<Self> {
        let spec = CommandSpec::new("net").args([
            "use".to_string(),
            share.to_string(),
            format!("/user:{account}"),
            password.to_string(),
        ]);
        let result = runner.run(&spec, Some(NET_USE_TIMEOUT)).await?;
        if !result.success() {
            return Err(GuestError::Transient {
                operation: format!("map {share}"),
                source: io::Error::other(result.combined_output()),
            });
        }
        debug!("Mapped {}", share);
        Ok(Self {
            share: share.to_string(),
            runner,
            released: false,
        })
    }

    pub fn share(&self) -> &str {
        &self.share
    }

    /// Unmaps the share. Failures are logged, never returned.
    pub async fn release(mut self) {
        self.released = true;
        let spec = unmap_spec(&self.share);
        match self.runner.run(&spec, Some(NET_USE_TIMEOUT)).await {
            Ok(result) if result.success() => debug!("Unmapped {}", self.share),
            Ok(result) => warn!("Failed to unmap {}: {}", self.share, result.combined_output()),
            Err(e) => warn!("Failed to unmap {}: {}", self.share, e),
        }
    }
}

impl Drop for DriveMapping {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let spec = unmap_spec(&self.share);
        let runner = Arc::clone(&self.runner);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Mapping of {} dropped without release; unmapping in background", self.share);
                handle.spawn(async move {
                    if let Err(e) = runner.run(&spec, Some(NET_USE_TIMEOUT)).await {
                        warn!("Background unmap failed: {}", e);
                    }
                });
            }
            Err(_) => warn!("Mapping of {} dropped outside a runtime; left mapped", self.share),
        }
    }
}

fn unmap_spec(share: &str) -> CommandSpec {
    CommandSpec::new("net").args(["use", share, "/delete", "/y"])
}

/// `FileTransfer` over the guest's administrative shares.
pub struct MappedDriveTransfer {
    address: String,
    username: String,
    password: String,
    runner: Arc<dyn ProcessRunner>,
    retry: RetryPolicy,
}

impl MappedDriveTransfer {
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
            retry: RetryPolicy::once(TRANSIENT_RETRY_DELAY),
        }
    }

    /// Replaces the retry policy applied to existence checks, copies and
    /// directory creation.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn account(&self) -> String {
        format!(r"{}\{}", self.address, self.username)
    }

    /// Maps the share of `guest_path`, runs `op` on its network path, unmaps.
    async fn with_mapping<T, F, Fut>(&self, operation: &str, guest_path: &str, op: F) -> Result<T>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = io::Result<T>>,
    {
        let share = path::guest_share(&self.address, guest_path)?;
        let network_path = PathBuf::from(path::to_network_path(&self.address, guest_path)?);
        let mapping =
            DriveMapping::acquire(Arc::clone(&self.runner), &share, &self.account(), &self.password)
                .await?;
        let result = op(network_path).await;
        mapping.release().await;
        result.map_err(|source| GuestError::Transient {
            operation: format!("{operation} {guest_path}"),
            source,
        })
    }

    /// `with_mapping` under the transient retry policy.
    async fn with_mapping_retried<T, F, Fut>(
        &self,
        operation: &str,
        guest_path: &str,
        op: F,
    ) -> Result<T>
    where
        F: Fn(PathBuf) -> Fut,
        Fut: Future<Output = io::Result<T>>,
    {
        self.retry
            .run(
                operation,
                || self.with_mapping(operation, guest_path, &op),
                GuestError::is_transient,
            )
            .await
            .map_err(RetryError::into_inner)
    }
}

async fn blocking_copy(source: PathBuf, target: PathBuf) -> io::Result<()> {
    match tokio::task::spawn_blocking(move || copy::copy_path(&source, &target)).await {
        Ok(result) => result.map(|_| ()),
        Err(join_error) => Err(io::Error::other(join_error)),
    }
}

async fn exists_as(network_path: PathBuf, want_dir: bool) -> io::Result<bool> {
    match tokio::fs::metadata(&network_path).await {
        Ok(meta) => Ok(if want_dir { meta.is_dir() } else { meta.is_file() }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl FileTransfer for MappedDriveTransfer {
    async fn copy_to_guest(&self, local: &Path, guest_path: &str) -> Result<()> {
        debug!("Copying {:?} to guest {}", local, guest_path);
        self.with_mapping_retried("copy to guest", guest_path, |network_path| {
            blocking_copy(local.to_path_buf(), network_path)
        })
        .await
    }

    async fn copy_from_guest(&self, guest_path: &str, local: &Path) -> Result<()> {
        debug!("Copying guest {} to {:?}", guest_path, local);
        self.with_mapping_retried("copy from guest", guest_path, |network_path| {
            blocking_copy(network_path, local.to_path_buf())
        })
        .await
    }

    async fn file_exists(&self, guest_path: &str) -> Result<bool> {
        self.with_mapping_retried("file exists", guest_path, |p| exists_as(p, false))
            .await
    }

    async fn directory_exists(&self, guest_path: &str) -> Result<bool> {
        self.with_mapping_retried("directory exists", guest_path, |p| exists_as(p, true))
            .await
    }

    async fn delete_file(&self, guest_path: &str, ignore_errors: bool) -> Result<()> {
        let result = self
            .with_mapping("delete file", guest_path, |p| async move {
                tokio::fs::remove_file(p).await
            })
            .await;
        match result {
            Err(e) if ignore_errors => {
                debug!("Ignoring failure to delete guest file {}: {}", guest_path, e);
                Ok(())
            }
            other => other,
        }
    }

    async fn delete_directory(&self, guest_path: &str, recursive: bool) -> Result<()> {
        self.with_mapping("delete directory", guest_path, |p| async move {
            if recursive {
                tokio::fs::remove_dir_all(p).await
            } else {
                tokio::fs::remove_dir(p).await
            }
        })
        .await
    }

    async fn create_directory(&self, guest_path: &str) -> Result<()> {
        self.with_mapping_retried("create directory", guest_path, |p| async move {
            tokio::fs::create_dir_all(p).await
        })
        .await
    }

    async fn clear_read_only(&self, guest_path: &str) -> Result<()> {
        self.with_mapping("clear read-only", guest_path, |p| async move {
            let mut permissions = tokio::fs::metadata(&p).await?.permissions();
            // On the share this maps to the Windows read-only attribute.
            #[allow(clippy::permissions_set_readonly_false)]
            permissions.set_readonly(false);
            tokio::fs::set_permissions(&p, permissions).await
        })
        .await
    }
}
