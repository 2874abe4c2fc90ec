//! # guestrs Process Correlation (`remote::correlator`)
//!
//! File: engine/src/remote/correlator.rs
//!
//! ## Overview
//!
//! A detached launch through the elevation tool gives no handle back. The
//! correlator finds the guest PID of the process the launch created. Two
//! strategies sit behind the `ProcessCorrelator` trait:
//!
//! - **`DiagnosticScrape`**: launch with `invoke_detached` and look for
//!   `with process ID <digits>` in the tool's diagnostic text. If the notice
//!   is missing, wait one poll interval and launch again, until the start
//!   timeout is used up.
//!
//!   `Launching -> Scraping -> Found | TimedOut`
//!
//! - **`ChildTreeDiff`**: snapshot the children of the tool's guest service
//!   (if it is already resident), start the tool in the background, and poll
//!   the service's children until exactly one new child shows up.
//!
//!   `Snapshot0 -> Launch -> PollDiff -> Found | TimedOut`
//!
//!   A service that was not resident before the launch (or whose PID
//!   changed since the snapshot) is assumed to have no unrelated children,
//!   so its only child is the target. More than one new child in one
//!   polling window is an `AmbiguousCorrelation` error; nothing is picked.
//!   On timeout or ambiguity the local tool process is killed first.
//!
//! Both strategies launch the caller's command line directly. All waits use
//! `tokio::time`, so tests drive them under a paused clock.
//!
use crate::common::management::{GuestPid, ManagementQuery};
use crate::common::process::LocalProcess;
use crate::core::error::{GuestError, Result};
use crate::remote::parse::scrape_process_id;
use crate::remote::tool::ElevatedExecutor;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn, Instrument, Span};

/// Wait after the service first appears before trusting its child list.
pub const SERVICE_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Finds the guest process created by a detached launch of `command`.
#[async_trait]
pub trait ProcessCorrelator: Send + Sync {
    async fn correlate(&self, command: &str, start_timeout: Duration) -> Result<GuestPid>;
}

// --- Strategy A: diagnostic-text scrape ---

enum ScrapeState {
    Launching,
    Scraping(String),
    Found(GuestPid),
    TimedOut,
}

pub struct DiagnosticScrape {
    executor: Arc<dyn ElevatedExecutor>,
    poll_interval: Duration,
    span: Span,
}

impl DiagnosticScrape {
    pub fn new(executor: Arc<dyn ElevatedExecutor>, poll_interval: Duration, span: Span) -> Self {
        Self {
            executor,
            poll_interval,
            span,
        }
    }
}

#[async_trait]
impl ProcessCorrelator for DiagnosticScrape {
    async fn correlate(&self, command: &str, start_timeout: Duration) -> Result<GuestPid> {
        async {
            let deadline = Instant::now() + start_timeout;
            let mut attempt = 0u32;
            let mut state = ScrapeState::Launching;
            loop {
                state = match state {
                    ScrapeState::Launching => {
                        attempt += 1;
                        debug!("Detached launch attempt {} of '{}'", attempt, command);
                        let text = self.executor.invoke_detached(command, start_timeout).await?;
                        ScrapeState::Scraping(text)
                    }
                    ScrapeState::Scraping(text) => match scrape_process_id(&text) {
                        Some(pid) => ScrapeState::Found(pid),
                        None => {
                            warn!(
                                "No process ID reported for '{}': {}",
                                command,
                                text.replace(['\r', '\n'], " ")
                            );
                            if Instant::now() >= deadline {
                                ScrapeState::TimedOut
                            } else {
                                sleep(self.poll_interval).await;
                                if Instant::now() >= deadline {
                                    ScrapeState::TimedOut
                                } else {
                                    ScrapeState::Launching
                                }
                            }
                        }
                    },
                    ScrapeState::Found(pid) => {
                        info!("'{}' runs as guest process {}", command, pid);
                        return Ok(pid);
                    }
                    ScrapeState::TimedOut => {
                        return Err(GuestError::NoSpawnedProcessReported {
                            command: command.to_string(),
                        })
                    }
                };
            }
        }
        .instrument(self.span.clone())
        .await
    }
}

// --- Strategy B: child-process-tree diff ---

/// Children of the resident service, recorded before the launch.
struct Snapshot {
    service: GuestPid,
    children: HashSet<GuestPid>,
}

enum DiffState {
    Snapshot0,
    Launch(Option<Snapshot>),
    PollDiff(Option<Snapshot>, Box<dyn LocalProcess>),
    Found(GuestPid),
    TimedOut(Box<dyn LocalProcess>),
}

/// Result of one polling window.
enum Poll {
    Pending,
    Unique(GuestPid),
    Ambiguous(Vec<GuestPid>),
}

pub struct ChildTreeDiff {
    executor: Arc<dyn ElevatedExecutor>,
    query: Arc<dyn ManagementQuery>,
    service_name: String,
    poll_interval: Duration,
    settle_delay: Duration,
    span: Span,
}

impl ChildTreeDiff {
    pub fn new(
        executor: Arc<dyn ElevatedExecutor>,
        query: Arc<dyn ManagementQuery>,
        service_name: impl Into<String>,
        poll_interval: Duration,
        span: Span,
    ) -> Self {
        Self {
            executor,
            query,
            service_name: service_name.into(),
            poll_interval,
            settle_delay: SERVICE_SETTLE_DELAY,
            span,
        }
    }

    async fn snapshot(&self) -> Result<Option<Snapshot>> {
        let Some(service) = self.query.service_pid(&self.service_name).await? else {
            debug!("Service {} is not resident", self.service_name);
            return Ok(None);
        };
        let children = self.query.child_pids(&service).await?.into_iter().collect();
        debug!("Service {} resident as {} with children {:?}", self.service_name, service, children);
        Ok(Some(Snapshot { service, children }))
    }

    /// One polling window. `settled` records whether the settle delay for a
    /// freshly started service has been served.
    async fn poll_once(&self, before: &Option<Snapshot>, settled: &mut bool) -> Result<Poll> {
        let Some(service) = self.query.service_pid(&self.service_name).await? else {
            return Ok(Poll::Pending);
        };
        let previous = match before {
            Some(snapshot) if snapshot.service == service => Some(&snapshot.children),
            Some(snapshot) => {
                debug!(
                    "Service PID changed from {} to {}; treating it as freshly started",
                    snapshot.service, service
                );
                None
            }
            None => None,
        };
        if previous.is_none() && !*settled {
            sleep(self.settle_delay).await;
            *settled = true;
        }
        let mut new_children: Vec<GuestPid> = self
            .query
            .child_pids(&service)
            .await?
            .into_iter()
            .filter(|pid| previous.map_or(true, |old| !old.contains(pid)))
            .collect();
        Ok(match new_children.len() {
            0 => Poll::Pending,
            1 => Poll::Unique(new_children.remove(0)),
            _ => Poll::Ambiguous(new_children),
        })
    }
}

#[async_trait]
impl ProcessCorrelator for ChildTreeDiff {
    async fn correlate(&self, command: &str, start_timeout: Duration) -> Result<GuestPid> {
        async {
            let deadline = Instant::now() + start_timeout;
            let mut settled = false;
            let mut state = DiffState::Snapshot0;
            loop {
                state = match state {
                    DiffState::Snapshot0 => DiffState::Launch(self.snapshot().await?),
                    DiffState::Launch(before) => {
                        let process = self.executor.launch_background(command, start_timeout)?;
                        DiffState::PollDiff(before, process)
                    }
                    DiffState::PollDiff(before, mut process) => {
                        let poll = match self.poll_once(&before, &mut settled).await {
                            Ok(poll) => poll,
                            Err(e) if e.is_transient() => {
                                debug!("Management query failed while polling: {}", e);
                                Poll::Pending
                            }
                            Err(e) => {
                                kill_local(process.as_mut()).await;
                                return Err(e);
                            }
                        };
                        match poll {
                            Poll::Unique(pid) => DiffState::Found(pid),
                            Poll::Ambiguous(candidates) => {
                                kill_local(process.as_mut()).await;
                                return Err(GuestError::AmbiguousCorrelation {
                                    candidates: candidates.iter().map(ToString::to_string).collect(),
                                });
                            }
                            Poll::Pending if Instant::now() >= deadline => DiffState::TimedOut(process),
                            Poll::Pending => {
                                sleep(self.poll_interval).await;
                                if Instant::now() >= deadline {
                                    DiffState::TimedOut(process)
                                } else {
                                    DiffState::PollDiff(before, process)
                                }
                            }
                        }
                    }
                    DiffState::Found(pid) => {
                        info!("'{}' runs as guest process {}", command, pid);
                        return Ok(pid);
                    }
                    DiffState::TimedOut(mut process) => {
                        kill_local(process.as_mut()).await;
                        let (program, arguments) = self.executor.describe_launch(command, start_timeout);
                        return Err(GuestError::ProcessNotStarted {
                            program,
                            arguments,
                            timeout: start_timeout,
                        });
                    }
                };
            }
        }
        .instrument(self.span.clone())
        .await
    }
}

async fn kill_local(process: &mut dyn LocalProcess) {
    if let Err(e) = process.kill().await {
        warn!("Failed to kill local elevation tool process: {}", e);
    }
}
