//! # guestrs Lazy Management Bootstrap (`common::management::lazy`)
//!
//! File: engine/src/common/management/lazy.rs
//!
//! Wraps a `ManagementQuery` so that the connection is established (and the
//! guest OS facts read) on first use instead of at session construction.
//! The bootstrap is retried a bounded number of times; exhausting it is a
//! `GuestError::Startup`. A failed bootstrap is not cached, the next query
//! tries again.
//!
use crate::common::management::{GuestPid, ManagementQuery, OsInfo};
use crate::core::error::{GuestError, Result};
use crate::core::retry::RetryPolicy;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::info;

/// Management connect: 10 attempts, 5 s apart.
pub const MANAGEMENT_BOOTSTRAP: RetryPolicy = RetryPolicy {
    max_attempts: 10,
    delay: Duration::from_secs(5),
};

pub struct LazyManagement {
    inner: Arc<dyn ManagementQuery>,
    os: OnceCell<OsInfo>,
    bootstrap: RetryPolicy,
}

impl LazyManagement {
    pub fn new(inner: Arc<dyn ManagementQuery>) -> Self {
        Self::with_bootstrap(inner, MANAGEMENT_BOOTSTRAP)
    }

    pub fn with_bootstrap(inner: Arc<dyn ManagementQuery>, bootstrap: RetryPolicy) -> Self {
        Self {
            inner,
            os: OnceCell::new(),
            bootstrap,
        }
    }

    /// Connects if not yet connected and returns the cached OS facts.
    pub async fn connect(&self) -> Result<&OsInfo> {
        self.os
            .get_or_try_init(|| async {
                let info = self
                    .bootstrap
                    .run(
                        "management connect",
                        || self.inner.operating_system(),
                        GuestError::is_transient,
                    )
                    .await
                    .map_err(|e| e.into_startup("management connect"))?;
                info!(
                    "Connected to guest management: {} {} on {}",
                    info.caption, info.version, info.computer_name
                );
                Ok::<_, GuestError>(info)
            })
            .await
    }

    pub fn is_connected(&self) -> bool {
        self.os.initialized()
    }
}

#[async_trait]
impl ManagementQuery for LazyManagement {
    async fn operating_system(&self) -> Result<OsInfo> {
        self.connect().await.cloned()
    }

    async fn service_pid(&self, service_name: &str) -> Result<Option<GuestPid>> {
        self.connect().await?;
        self.inner.service_pid(service_name).await
    }

    async fn child_pids(&self, parent: &GuestPid) -> Result<Vec<GuestPid>> {
        self.connect().await?;
        self.inner.child_pids(parent).await
    }
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails `failures` times with a transient error, then succeeds.
    struct FlakyQuery {
        failures: u32,
        os_calls: AtomicU32,
    }

    #[async_trait]
    impl ManagementQuery for FlakyQuery {
        async fn operating_system(&self) -> Result<OsInfo> {
            let n = self.os_calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(GuestError::ToolFailed {
                    command: "wmic os".into(),
                    exit_code: Some(1),
                    output: "RPC server is unavailable".into(),
                });
            }
            Ok(OsInfo {
                computer_name: "GUEST".into(),
                windows_directory: r"C:\Windows".into(),
                caption: "Windows 7".into(),
                version: "6.1.7601".into(),
            })
        }

        async fn service_pid(&self, _service_name: &str) -> Result<Option<GuestPid>> {
            Ok(GuestPid::parse("500").ok())
        }

        async fn child_pids(&self, _parent: &GuestPid) -> Result<Vec<GuestPid>> {
            Ok(vec![])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstraps_once_on_first_use() {
        let inner = Arc::new(FlakyQuery {
            failures: 3,
            os_calls: AtomicU32::new(0),
        });
        let lazy = LazyManagement::new(inner.clone());
        assert!(!lazy.is_connected());

        let pid = lazy.service_pid("PSEXESVC").await.unwrap();
        assert_eq!(pid.unwrap().as_str(), "500");
        assert!(lazy.is_connected());
        lazy.child_pids(&GuestPid::parse("500").unwrap()).await.unwrap();
        assert_eq!(lazy.operating_system().await.unwrap().version, "6.1.7601");
        // Three failures plus one success, then cached.
        assert_eq!(inner.os_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_bootstrap_is_startup_failure() {
        let inner = Arc::new(FlakyQuery {
            failures: u32::MAX,
            os_calls: AtomicU32::new(0),
        });
        let lazy = LazyManagement::new(inner.clone());
        let err = lazy.service_pid("PSEXESVC").await.unwrap_err();
        match err {
            GuestError::Startup { stage, attempts, .. } => {
                assert_eq!(stage, "management connect");
                assert_eq!(attempts, 10);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!lazy.is_connected());
    }
}
