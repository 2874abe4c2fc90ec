//! # guestrs Network Reachability (`common::network`)
//!
//! File: engine/src/common/network/mod.rs
//!
//! ## Overview
//!
//! Session bootstrap starts by checking that the guest answers at all.
//! `TcpProbe` opens (and immediately closes) a TCP connection to the guest's
//! SMB port, the port both the elevation tool and the file-transfer shares
//! depend on. Each probe is bounded; the retry loop around it lives in the
//! session.
//!
use crate::core::error::{GuestError, Result};
use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// SMB port on the guest.
pub const SMB_PORT: u16 = 445;
/// Upper bound of a single probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Checks whether the guest is reachable.
#[async_trait]
pub trait Reachability: Send + Sync {
    async fn probe(&self) -> Result<()>;
}

pub struct TcpProbe {
    address: String,
    port: u16,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: SMB_PORT,
            timeout: PROBE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Reachability for TcpProbe {
    async fn probe(&self) -> Result<()> {
        let operation = format!("reachability probe of {}:{}", self.address, self.port);
        match tokio::time::timeout(
            self.timeout,
            TcpStream::connect((self.address.as_str(), self.port)),
        )
        .await
        {
            Ok(Ok(_stream)) => {
                debug!("{} succeeded", operation);
                Ok(())
            }
            Ok(Err(source)) => Err(GuestError::Transient { operation, source }),
            Err(_) => Err(GuestError::Transient {
                operation,
                source: io::Error::new(io::ErrorKind::TimedOut, "connection attempt timed out"),
            }),
        }
    }
}
