//! # guestrs Configuration System
//!
//! File: engine/src/core/config.rs
//!
//! ## Overview
//!
//! This module implements the configuration system for guestrs: loading,
//! merging, validation and access to the settings describing one guest
//! (address and credentials), the elevation tool, timeouts and the detached
//! process correlation strategy.
//!
//! ## Architecture
//!
//! Configuration sources (in order of precedence):
//! 1. Project-specific `.guestrs.toml` in current directory or ancestors
//! 2. User-specific `config.toml` in the platform config dir (`directories`)
//! 3. Default values defined in the code
//!
//! The CLI applies flag overrides on top of the loaded `Config` before handing
//! it to `RemoteSession::connect`.
//!
//! ## Examples
//!
//! ```rust,no_run
//! use guestrs_engine::core::config;
//!
//! # fn example() -> guestrs_engine::core::error::Result<()> {
//! let cfg = config::load_config()?;
//! println!("Driving guest {} as {}", cfg.guest.address, cfg.guest.username);
//! # Ok(())
//! # }
//! ```
//!
use crate::core::error::{GuestError, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, info, warn};

/// Represents the main configuration structure, loaded from TOML files.
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub guest: GuestConfig,
    #[serde(default)]
    pub tool: ToolConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub correlation: CorrelationConfig,
}

/// Connection parameters of the guest machine.
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct GuestConfig {
    /// IP address or host name of the guest.
    #[serde(default)]
    pub address: String,
    /// Account used for the elevation tool, drive mapping and management queries.
    #[serde(default)]
    pub username: String,
    /// Password of `username`. Usually supplied through the CLI/environment instead.
    #[serde(default)]
    pub password: String,
    /// Guest directory holding temp files and batch scripts.
    #[serde(default = "default_guest_temp_dir")]
    pub temp_dir: String,
}

/// The elevated-execution tool run on the host.
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ToolConfig {
    /// Path to the tool executable (can use ~). Will be expanded.
    #[serde(default = "default_tool_path")]
    pub path: String,
    /// Pass the interact-with-desktop flag.
    #[serde(default = "default_true")]
    pub interactive: bool,
    /// Name of the service the tool installs on the guest.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct TimeoutConfig {
    /// Start timeout used by CLI commands that don't specify one.
    #[serde(default = "default_start_secs")]
    pub default_start_secs: u64,
    /// Generous start timeout of the warm-up command run at session start.
    #[serde(default = "default_warm_up_secs")]
    pub warm_up_secs: u64,
}

/// How a detached launch is matched to its guest process.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CorrelationStrategyKind {
    /// Scrape the tool's diagnostic text for the spawned process ID.
    #[default]
    Scrape,
    /// Diff the children of the tool's guest service before/after launch.
    TreeDiff,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct CorrelationConfig {
    #[serde(default)]
    pub strategy: CorrelationStrategyKind,
    /// Fixed sleep between correlation attempts, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_guest_temp_dir() -> String {
    r"C:\TMP1\".to_string()
}
fn default_tool_path() -> String {
    "PsExec.exe".to_string()
}
fn default_true() -> bool {
    true
}
fn default_service_name() -> String {
    "PSEXESVC".to_string()
}
fn default_start_secs() -> u64 {
    60
}
fn default_warm_up_secs() -> u64 {
    180
}
fn default_poll_interval_ms() -> u64 {
    2000
}

impl Default for GuestConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            username: String::new(),
            password: String::new(),
            temp_dir: default_guest_temp_dir(),
        }
    }
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            path: default_tool_path(),
            interactive: default_true(),
            service_name: default_service_name(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_start_secs: default_start_secs(),
            warm_up_secs: default_warm_up_secs(),
        }
    }
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            strategy: CorrelationStrategyKind::default(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl TimeoutConfig {
    pub fn default_start(&self) -> Duration {
        Duration::from_secs(self.default_start_secs)
    }

    pub fn warm_up(&self) -> Duration {
        Duration::from_secs(self.warm_up_secs)
    }
}

impl CorrelationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

const PROJECT_CONFIG_FILENAME: &str = ".guestrs.toml";

/// Loads, merges, expands and validates the configuration.
pub fn load_config() -> Result<Config> {
    let user_config = load_user_config()?;
    let project_config = load_project_config()?;
    let mut merged_config = merge_configs(user_config.unwrap_or_default(), project_config);
    expand_config_paths(&mut merged_config);
    debug!("Loaded configuration for guest '{}'", merged_config.guest.address);
    Ok(merged_config)
}

/// Loads a single configuration file, e.g. one passed with `--config`.
pub fn load_config_from_path(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path).map_err(|e| {
        GuestError::io(
            format!("Failed to read configuration file: {}", path.display()),
            e,
        )
    })?;
    let mut config: Config = toml::from_str(&content).map_err(|e| {
        GuestError::Config(format!(
            "Failed to parse TOML from file {}: {}",
            path.display(),
            e
        ))
    })?;
    expand_config_paths(&mut config);
    Ok(config)
}

fn load_user_config() -> Result<Option<Config>> {
    if let Some(proj_dirs) = ProjectDirs::from("com", "guestrs", "guestrs") {
        let config_path = proj_dirs.config_dir().join("config.toml");
        if config_path.exists() {
            info!("Loading user configuration from: {}", config_path.display());
            load_config_from_path(&config_path).map(Some)
        } else {
            debug!(
                "User configuration file not found at {}",
                config_path.display()
            );
            Ok(None)
        }
    } else {
        warn!("Could not determine user config directory.");
        Ok(None)
    }
}

fn load_project_config() -> Result<Option<Config>> {
    if let Some(project_config_path) = find_project_config_path()? {
        info!(
            "Loading project configuration from: {}",
            project_config_path.display()
        );
        load_config_from_path(&project_config_path).map(Some)
    } else {
        debug!("No project configuration file (.guestrs.toml) found in current directory or ancestors.");
        Ok(None)
    }
}

fn find_project_config_path() -> Result<Option<PathBuf>> {
    let current_dir = std::env::current_dir()
        .map_err(|e| GuestError::io("Failed to get current directory", e))?;
    Ok(find_project_config_from(&current_dir))
}

fn find_project_config_from(start: &Path) -> Option<PathBuf> {
    let mut path: &Path = start;
    loop {
        let project_config = path.join(PROJECT_CONFIG_FILENAME);
        if project_config.is_file() {
            return Some(project_config);
        }
        if path.join(".git").is_dir() {
            debug!(
                "Found .git directory at {}, stopping project config search.",
                path.display()
            );
            return None;
        }
        path = path.parent()?;
    }
}

/// Project values win over user values wherever they differ from the defaults.
fn merge_configs(user: Config, project: Option<Config>) -> Config {
    let project = match project {
        Some(p) => p,
        None => return user,
    };
    let mut merged = Config::default();
    merged.guest.address = pick_value(project.guest.address, user.guest.address, String::new());
    merged.guest.username = pick_value(project.guest.username, user.guest.username, String::new());
    merged.guest.password = pick_value(project.guest.password, user.guest.password, String::new());
    merged.guest.temp_dir = pick_value(
        project.guest.temp_dir,
        user.guest.temp_dir,
        default_guest_temp_dir(),
    );
    merged.tool.path = pick_value(project.tool.path, user.tool.path, default_tool_path());
    merged.tool.service_name = pick_value(
        project.tool.service_name,
        user.tool.service_name,
        default_service_name(),
    );
    merged.tool.interactive = project.tool.interactive && user.tool.interactive;
    merged.timeouts.default_start_secs = pick_value(
        project.timeouts.default_start_secs,
        user.timeouts.default_start_secs,
        default_start_secs(),
    );
    merged.timeouts.warm_up_secs = pick_value(
        project.timeouts.warm_up_secs,
        user.timeouts.warm_up_secs,
        default_warm_up_secs(),
    );
    merged.correlation.strategy = pick_value(
        project.correlation.strategy,
        user.correlation.strategy,
        CorrelationStrategyKind::default(),
    );
    merged.correlation.poll_interval_ms = pick_value(
        project.correlation.poll_interval_ms,
        user.correlation.poll_interval_ms,
        default_poll_interval_ms(),
    );
    merged
}

fn pick_value<T: PartialEq>(project: T, user: T, default: T) -> T {
    if project != default {
        project
    } else {
        user
    }
}

fn expand_config_paths(config: &mut Config) {
    config.tool.path = shellexpand::tilde(&config.tool.path).into_owned();
    debug!("Expanded tool path: {}", config.tool.path);
}

/// Checks that the configuration is usable for connecting to a guest.
///
/// Called after CLI overrides have been applied, since address and
/// credentials commonly arrive through flags.
pub fn validate_config(config: &Config) -> Result<()> {
    if config.guest.address.trim().is_empty() {
        return Err(GuestError::Config(
            "Guest address is not set (guest.address or --address).".to_string(),
        ));
    }
    if config.guest.username.trim().is_empty() {
        return Err(GuestError::Config(
            "Guest username is not set (guest.username or --user).".to_string(),
        ));
    }
    if config.tool.path.trim().is_empty() {
        return Err(GuestError::Config(
            "Elevation tool path (tool.path) cannot be empty.".to_string(),
        ));
    }
    if !is_absolute_windows_dir(&config.guest.temp_dir) {
        return Err(GuestError::Config(format!(
            "Guest temp directory '{}' must be an absolute Windows path like 'C:\\TMP1\\'.",
            config.guest.temp_dir
        )));
    }
    if config.correlation.poll_interval_ms == 0 {
        return Err(GuestError::Config(
            "correlation.poll_interval_ms must be greater than zero.".to_string(),
        ));
    }
    Ok(())
}

fn is_absolute_windows_dir(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'\\'
}
