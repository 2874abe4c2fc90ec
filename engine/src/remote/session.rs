//! # guestrs Remote Session (`remote::session`)
//!
//! File: engine/src/remote/session.rs
//!
//! ## Overview
//!
//! `RemoteSession` is the facade over everything else in the engine. It owns
//! one guest's connection parameters, builds the collaborators for it, runs
//! the bootstrap, and exposes command execution, detached launches, process
//! handles, registry and environment access, and file transfer as one API.
//!
//! ## Bootstrap
//!
//! `connect` performs, in order (each stage retried with a fixed delay, each
//! exhausted stage a `GuestError::Startup`):
//!
//! 1. **ping**: TCP reachability of the guest's SMB port (50 × 5 s).
//! 2. **warm-up**: a trivial command under a generous timeout (50 × 2 s),
//!    to absorb first-contact flakiness before real commands run under
//!    short timeouts.
//! 3. **environment**: populate the environment cache (10 × 10 s). The cache
//!    must contain `APPDATA`; its absence means the guest user is not fully
//!    logged in (`GuestError::NotLoggedIn`), which is retried like a network
//!    failure but reported distinctly.
//! 4. **UAC detection**: never fatal; any failure assumes UAC is enabled.
//!
//! The management connection (10 × 5 s) is bootstrapped lazily on first use.
//!
//! ## Logging
//!
//! The session creates one `guest` span carrying the guest address and
//! hands it to every component it builds. There is no global logger state
//! in the engine; the subscriber is installed by the binary.
//!
//! ## Example
//!
//! ```rust,no_run
//! use guestrs_engine::core::config;
//! use guestrs_engine::remote::RemoteSession;
//! use std::time::Duration;
//!
//! # async fn example() -> guestrs_engine::core::error::Result<()> {
//! let cfg = config::load_config()?;
//! let session = RemoteSession::connect(cfg).await?;
//! let out = session.execute("ver", Duration::from_secs(30), None).await?;
//! println!("{}", out.stdout);
//! let notepad = session.detach("notepad.exe", Duration::from_secs(30)).await?;
//! notepad.kill_tree(Duration::from_secs(30)).await?;
//! session.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
use crate::common::management::{
    DirectKill, GuestPid, LazyManagement, ManagementQuery, OsInfo, TaskkillCommand, WmicQuery,
};
use crate::common::network::{Reachability, TcpProbe};
use crate::common::process::{ProcessRunner, SubprocessRunner};
use crate::common::transfer::path::guest_join;
use crate::common::transfer::{FileTransfer, MappedDriveTransfer};
use crate::core::config::{validate_config, Config, CorrelationStrategyKind};
use crate::core::error::{GuestError, Result};
use crate::core::retry::{RetryError, RetryPolicy};
use crate::remote::correlator::{ChildTreeDiff, DiagnosticScrape, ProcessCorrelator};
use crate::remote::parse::parse_registry_value;
use crate::remote::process::{ProcessControl, RemoteProcessHandle};
use crate::remote::shell::{RemoteShell, ShellOutput, WARM_UP_BOOTSTRAP};
use crate::remote::tool::{ElevatedExecutor, ElevationTool, ElevationToolSettings};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, info_span, warn, Instrument, Span};

/// Variable that must be present in a logged-in guest user's environment.
pub const ENVIRONMENT_SENTINEL: &str = "APPDATA";

const UAC_POLICY_KEY: &str = r"HKLM\SOFTWARE\Microsoft\Windows\CurrentVersion\Policies\System";
const FALLBACK_WINDOWS_DIRECTORY: &str = r"C:\Windows";
const SHUTDOWN_KILL_TIMEOUT: Duration = Duration::from_secs(30);
const SHUTDOWN_SETTLE: Duration = Duration::from_secs(1);

/// Attempts and delays of the bootstrap stages.
#[derive(Debug, Clone, Copy)]
pub struct BootstrapPolicy {
    pub reachability: RetryPolicy,
    pub management: RetryPolicy,
    pub warm_up: RetryPolicy,
    pub environment: RetryPolicy,
}

impl Default for BootstrapPolicy {
    fn default() -> Self {
        Self {
            reachability: RetryPolicy::bounded(50, Duration::from_secs(5)),
            management: crate::common::management::lazy::MANAGEMENT_BOOTSTRAP,
            warm_up: WARM_UP_BOOTSTRAP,
            environment: RetryPolicy::bounded(10, Duration::from_secs(10)),
        }
    }
}

/// Builds a `RemoteSession`, optionally with substitute collaborators.
///
/// Any collaborator left unset is built from the configuration.
pub struct SessionBuilder {
    config: Config,
    runner: Option<Arc<dyn ProcessRunner>>,
    executor: Option<Arc<dyn ElevatedExecutor>>,
    transfer: Option<Arc<dyn FileTransfer>>,
    query: Option<Arc<dyn ManagementQuery>>,
    killer: Option<Arc<dyn DirectKill>>,
    reachability: Option<Arc<dyn Reachability>>,
    bootstrap: BootstrapPolicy,
}

impl SessionBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            runner: None,
            executor: None,
            transfer: None,
            query: None,
            killer: None,
            reachability: None,
            bootstrap: BootstrapPolicy::default(),
        }
    }

    /// Local process runner used by every default collaborator.
    #[must_use]
    pub fn runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    #[must_use]
    pub fn executor(mut self, executor: Arc<dyn ElevatedExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    #[must_use]
    pub fn transfer(mut self, transfer: Arc<dyn FileTransfer>) -> Self {
        self.transfer = Some(transfer);
        self
    }

    /// Management query; it is wrapped in `LazyManagement` either way.
    #[must_use]
    pub fn management(mut self, query: Arc<dyn ManagementQuery>) -> Self {
        self.query = Some(query);
        self
    }

    #[must_use]
    pub fn killer(mut self, killer: Arc<dyn DirectKill>) -> Self {
        self.killer = Some(killer);
        self
    }

    #[must_use]
    pub fn reachability(mut self, reachability: Arc<dyn Reachability>) -> Self {
        self.reachability = Some(reachability);
        self
    }

    #[must_use]
    pub fn bootstrap(mut self, bootstrap: BootstrapPolicy) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    /// Validates the configuration, builds the collaborators and runs the
    /// bootstrap.
    pub async fn connect(self) -> Result<RemoteSession> {
        let SessionBuilder {
            config,
            runner,
            executor,
            transfer,
            query,
            killer,
            reachability,
            bootstrap,
        } = self;
        validate_config(&config)?;

        let guest = &config.guest;
        let span = info_span!("guest", address = %guest.address);
        let runner: Arc<dyn ProcessRunner> = runner
            .unwrap_or_else(|| Arc::new(SubprocessRunner::with_secret(guest.password.clone())));

        let reachability: Arc<dyn Reachability> =
            reachability.unwrap_or_else(|| Arc::new(TcpProbe::new(guest.address.clone())));
        bootstrap
            .reachability
            .run("reachability probe", || reachability.probe(), GuestError::is_transient)
            .instrument(span.clone())
            .await
            .map_err(|e| e.into_startup("ping"))?;

        let executor: Arc<dyn ElevatedExecutor> = executor.unwrap_or_else(|| {
            Arc::new(ElevationTool::new(
                ElevationToolSettings {
                    tool_path: config.tool.path.clone(),
                    address: guest.address.clone(),
                    username: guest.username.clone(),
                    password: guest.password.clone(),
                    interactive: config.tool.interactive,
                },
                Arc::clone(&runner),
                span.clone(),
            ))
        });
        let transfer: Arc<dyn FileTransfer> = transfer.unwrap_or_else(|| {
            Arc::new(MappedDriveTransfer::new(
                guest.address.clone(),
                guest.username.clone(),
                guest.password.clone(),
                Arc::clone(&runner),
            ))
        });
        let query: Arc<dyn ManagementQuery> = query.unwrap_or_else(|| {
            Arc::new(WmicQuery::new(
                guest.address.clone(),
                guest.username.clone(),
                guest.password.clone(),
                Arc::clone(&runner),
            ))
        });
        let management = Arc::new(LazyManagement::with_bootstrap(query, bootstrap.management));
        let killer: Arc<dyn DirectKill> = killer.unwrap_or_else(|| {
            Arc::new(TaskkillCommand::new(
                guest.address.clone(),
                guest.username.clone(),
                guest.password.clone(),
                Arc::clone(&runner),
            ))
        });

        let control = Arc::new(ProcessControl {
            executor: Arc::clone(&executor),
            query: management.clone(),
            killer: Arc::clone(&killer),
            span: span.clone(),
        });
        let correlator: Arc<dyn ProcessCorrelator> = match config.correlation.strategy {
            CorrelationStrategyKind::Scrape => Arc::new(DiagnosticScrape::new(
                Arc::clone(&executor),
                config.correlation.poll_interval(),
                span.clone(),
            )),
            CorrelationStrategyKind::TreeDiff => Arc::new(ChildTreeDiff::new(
                Arc::clone(&executor),
                management.clone(),
                config.tool.service_name.clone(),
                config.correlation.poll_interval(),
                span.clone(),
            )),
        };
        let shell = RemoteShell::new(
            executor,
            Arc::clone(&transfer),
            correlator,
            Arc::clone(&control),
            guest.temp_dir.clone(),
            span.clone(),
        );

        shell.warm_up(config.timeouts.warm_up(), bootstrap.warm_up).await?;

        let mut session = RemoteSession {
            shell,
            transfer,
            management,
            killer,
            control,
            environment: HashMap::new(),
            uac_enabled: true,
            bootstrap,
            span,
            config,
        };
        session.environment = session
            .load_environment()
            .await
            .map_err(|e| e.into_startup("environment"))?;
        session.uac_enabled = session.detect_uac().await;
        info!(
            parent: &session.span,
            "Session ready (UAC {})",
            if session.uac_enabled { "enabled" } else { "disabled" }
        );
        Ok(session)
    }
}

/// One guest, fully bootstrapped.
pub struct RemoteSession {
    config: Config,
    shell: RemoteShell,
    transfer: Arc<dyn FileTransfer>,
    management: Arc<LazyManagement>,
    killer: Arc<dyn DirectKill>,
    control: Arc<ProcessControl>,
    environment: HashMap<String, String>,
    uac_enabled: bool,
    bootstrap: BootstrapPolicy,
    span: Span,
}

impl std::fmt::Debug for RemoteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSession")
            .field("address", &self.config.guest.address)
            .field("username", &self.config.guest.username)
            .finish_non_exhaustive()
    }
}

impl RemoteSession {
    /// Connects with collaborators built from `config`.
    pub async fn connect(config: Config) -> Result<Self> {
        SessionBuilder::new(config).connect().await
    }

    pub fn builder(config: Config) -> SessionBuilder {
        SessionBuilder::new(config)
    }

    pub fn address(&self) -> &str {
        &self.config.guest.address
    }

    pub fn username(&self) -> &str {
        &self.config.guest.username
    }

    pub fn tool_path(&self) -> &str {
        &self.config.tool.path
    }

    pub fn uac_enabled(&self) -> bool {
        self.uac_enabled
    }

    pub fn shell(&self) -> &RemoteShell {
        &self.shell
    }

    /// Start timeout used when a caller has no better one (`timeouts.default_start_secs`).
    pub fn default_start_timeout(&self) -> Duration {
        self.config.timeouts.default_start()
    }

    /// Guest OS facts (bootstraps the management connection if needed).
    pub async fn os_info(&self) -> Result<OsInfo> {
        self.management.operating_system().await
    }

    // --- Commands ---

    pub async fn execute(
        &self,
        command_line: &str,
        start_timeout: Duration,
        execution_timeout: Option<Duration>,
    ) -> Result<ShellOutput> {
        self.shell
            .execute(command_line, start_timeout, execution_timeout)
            .await
    }

    pub async fn execute_no_output(
        &self,
        command_line: &str,
        start_timeout: Duration,
        execution_timeout: Option<Duration>,
    ) -> Result<i32> {
        self.shell
            .execute_no_output(command_line, start_timeout, execution_timeout)
            .await
    }

    pub async fn execute_with_args(
        &self,
        program: &str,
        args: &[&str],
        start_timeout: Duration,
        execution_timeout: Option<Duration>,
    ) -> Result<ShellOutput> {
        self.shell
            .execute_with_args(program, args, start_timeout, execution_timeout)
            .await
    }

    pub async fn detach(&self, command_line: &str, start_timeout: Duration) -> Result<RemoteProcessHandle> {
        self.shell.detach(command_line, start_timeout).await
    }

    /// Handle for an already known guest PID.
    pub fn process(&self, pid: GuestPid) -> RemoteProcessHandle {
        RemoteProcessHandle::new(pid, Arc::clone(&self.control))
    }

    // --- Environment ---

    /// The cached guest environment.
    pub fn cached_environment_variables(&self) -> &HashMap<String, String> {
        &self.environment
    }

    /// Cached value of `name` (case-insensitive, as on Windows).
    pub fn get_cached_environment_variable(&self, name: &str) -> Option<&str> {
        self.environment
            .get(name)
            .or_else(|| {
                self.environment
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(name))
                    .map(|(_, value)| value)
            })
            .map(String::as_str)
    }

    /// Re-reads the guest environment into the cache. The cache is only ever
    /// refreshed through this call.
    ///
    /// # Errors
    ///
    /// `GuestError::NotLoggedIn` if `APPDATA` is still missing after the
    /// bounded retries; the cache keeps its previous contents on failure.
    pub async fn invalidate_cached_guest_environment_variables(&mut self) -> Result<()> {
        self.environment = self
            .load_environment()
            .await
            .map_err(RetryError::into_inner)?;
        Ok(())
    }

    async fn load_environment(&self) -> std::result::Result<HashMap<String, String>, RetryError> {
        let timeout = self.default_start_timeout();
        self.bootstrap
            .environment
            .run(
                "environment refresh",
                || async {
                    let variables = self.shell.get_environment_variables(timeout).await?;
                    if !variables.contains_key(ENVIRONMENT_SENTINEL) {
                        return Err(GuestError::NotLoggedIn {
                            missing: ENVIRONMENT_SENTINEL.to_string(),
                        });
                    }
                    debug!("Cached {} guest environment variables", variables.len());
                    Ok(variables)
                },
                GuestError::is_transient,
            )
            .instrument(self.span.clone())
            .await
    }

    /// `setx NAME "VALUE" -m`. Takes effect for new processes; the cache is
    /// not refreshed.
    pub async fn set_global_environment_variable(&self, name: &str, value: &str) -> Result<()> {
        self.setx(name, value, true).await
    }

    /// `setx NAME "VALUE"` for the session user.
    pub async fn set_user_environment_variable(&self, name: &str, value: &str) -> Result<()> {
        self.setx(name, value, false).await
    }

    async fn setx(&self, name: &str, value: &str, machine: bool) -> Result<()> {
        let mut command = format!("setx {name} \"{value}\"");
        if machine {
            command.push_str(" -m");
        }
        let timeout = self.default_start_timeout();
        let exit_code = self
            .shell
            .execute_no_output(&command, timeout, Some(timeout))
            .await?;
        if exit_code != 0 {
            return Err(GuestError::ToolFailed {
                command,
                exit_code: Some(exit_code),
                output: String::new(),
            });
        }
        Ok(())
    }

    // --- Registry and UAC ---

    /// Reads a registry value through the 32-bit `reg.exe`.
    pub async fn read_registry_value_32(&self, key: &str, value_name: &str) -> Result<String> {
        let reg = self.reg_exe_32().await;
        let timeout = self.default_start_timeout();
        let output = self
            .shell
            .execute(
                &format!("{reg} query \"{key}\" /v \"{value_name}\""),
                timeout,
                Some(timeout),
            )
            .await?;
        parse_registry_value(&output.stdout, value_name)
    }

    /// `SysWOW64\reg.exe` on 64-bit guests, `system32\reg.exe` otherwise.
    async fn reg_exe_32(&self) -> String {
        let windows_dir = match self.management.connect().await {
            Ok(os) => os.windows_directory.clone(),
            Err(e) => {
                debug!("Using default Windows directory: {}", e);
                FALLBACK_WINDOWS_DIRECTORY.to_string()
            }
        };
        let wow64 = guest_join(&windows_dir, r"SysWOW64\reg.exe");
        match self.transfer.file_exists(&wow64).await {
            Ok(true) => wow64,
            _ => guest_join(&windows_dir, r"system32\reg.exe"),
        }
    }

    async fn detect_uac(&self) -> bool {
        match self.query_uac().await {
            Ok(enabled) => enabled,
            Err(e) => {
                warn!(parent: &self.span, "Could not determine UAC state, assuming enabled: {}", e);
                true
            }
        }
    }

    async fn query_uac(&self) -> Result<bool> {
        let os = self.management.connect().await?;
        if os.version.starts_with('5') {
            debug!("Guest runs Windows {} (no UAC)", os.version);
            return Ok(false);
        }
        let value = self.read_registry_value_32(UAC_POLICY_KEY, "EnableLUA").await?;
        Ok(value.contains('1'))
    }

    // --- Files ---

    pub async fn copy_file_to_guest(&self, local: &Path, guest_path: &str) -> Result<()> {
        self.transfer.copy_to_guest(local, guest_path).await
    }

    pub async fn copy_file_from_guest(&self, guest_path: &str, local: &Path) -> Result<()> {
        self.transfer.copy_from_guest(guest_path, local).await
    }

    pub async fn file_exists_in_guest(&self, guest_path: &str) -> Result<bool> {
        self.transfer.file_exists(guest_path).await
    }

    pub async fn directory_exists_in_guest(&self, guest_path: &str) -> Result<bool> {
        self.transfer.directory_exists(guest_path).await
    }

    pub async fn delete_file_in_guest(&self, guest_path: &str, ignore_errors: bool) -> Result<()> {
        self.transfer.delete_file(guest_path, ignore_errors).await
    }

    pub async fn delete_directory_in_guest(&self, guest_path: &str, recursive: bool) -> Result<()> {
        self.transfer.delete_directory(guest_path, recursive).await
    }

    pub async fn create_directory_in_guest(&self, guest_path: &str) -> Result<()> {
        self.transfer.create_directory(guest_path).await
    }

    pub async fn clear_read_only_in_guest(&self, guest_path: &str) -> Result<()> {
        self.transfer.clear_read_only(guest_path).await
    }

    pub async fn create_temp_file_in_guest(&self) -> Result<String> {
        self.shell.create_temp_file_in_guest().await
    }

    pub async fn read_file(&self, guest_path: &str) -> Result<String> {
        self.shell.read_file(guest_path).await
    }

    pub async fn read_file_bytes(&self, guest_path: &str) -> Result<Vec<u8>> {
        self.shell.read_file_bytes(guest_path).await
    }

    pub async fn read_file_lines(&self, guest_path: &str) -> Result<Vec<String>> {
        self.shell.read_file_lines(guest_path).await
    }

    // --- Teardown ---

    /// Stops the elevation tool's guest service (if resident) so it does not
    /// outlive the session. Failures are logged.
    pub async fn shutdown(self) {
        let service = &self.config.tool.service_name;
        async {
            match self.management.service_pid(service).await {
                Ok(Some(pid)) => match self.killer.kill_tree(&pid, SHUTDOWN_KILL_TIMEOUT).await {
                    Ok(outcome) => debug!("Stopped service {} ({}): {:?}", service, pid, outcome),
                    Err(e) => warn!("Failed to stop service {} ({}): {}", service, pid, e),
                },
                Ok(None) => debug!("Service {} not resident", service),
                Err(e) => warn!("Could not look up service {}: {}", service, e),
            }
            tokio::time::sleep(SHUTDOWN_SETTLE).await;
        }
        .instrument(self.span.clone())
        .await;
    }
}
