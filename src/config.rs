//! Session configuration
//!
//! `DumpOptions` drives one `Dumper::dump` call. `AgentConfig` is what the
//! injected agent reads out of its environment.

use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::core::error::EXIT_CONFIG;

/// How long threads stay suspended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SuspendWindow {
    /// Only while memory is captured; files and patches go out after resume
    #[default]
    Capture,
    /// Across capture, file transfers and patch emission
    Session,
}

impl FromStr for SuspendWindow {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "capture" => Ok(Self::Capture),
            "session" => Ok(Self::Session),
            _ => Err(ConfigError::InvalidWindow(s.to_string())),
        }
    }
}

/// Options for a single dump session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpOptions {
    /// Dump loaded modules only; skip the bundle completion walk
    pub executable_only: bool,
    /// Bundle to dump instead of the process's main bundle
    pub bundle_root: Option<PathBuf>,
    /// Load bundled frameworks before cataloging
    pub warmup: bool,
    pub suspend_window: SuspendWindow,
    /// Play the completion signal when done
    pub signal_completion: bool,
}

impl DumpOptions {
    pub fn new() -> Self {
        Self {
            executable_only: false,
            bundle_root: None,
            warmup: true,
            suspend_window: SuspendWindow::default(),
            signal_completion: true,
        }
    }

    pub fn executable_only(mut self, yes: bool) -> Self {
        self.executable_only = yes;
        self
    }

    pub fn bundle_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.bundle_root = Some(path.into());
        self
    }

    pub fn warmup(mut self, yes: bool) -> Self {
        self.warmup = yes;
        self
    }

    pub fn suspend_window(mut self, window: SuspendWindow) -> Self {
        self.suspend_window = window;
        self
    }

    pub fn signal_completion(mut self, yes: bool) -> Self {
        self.signal_completion = yes;
        self
    }
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors reading agent configuration
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid suspend window {0:?} (expected capture or session)")]
    InvalidWindow(String),

    #[error("Invalid value {value:?} for {name} (expected 0 or 1)")]
    InvalidFlag { name: &'static str, value: String },
}

impl ConfigError {
    /// Completion code reported when the agent cannot start
    pub fn exit_code(&self) -> i32 {
        EXIT_CONFIG
    }
}

pub const ENV_OUTPUT: &str = "THAW_OUTPUT";
pub const ENV_EXECUTABLE_ONLY: &str = "THAW_EXECUTABLE_ONLY";
pub const ENV_ORACLE: &str = "THAW_ORACLE";
pub const ENV_WINDOW: &str = "THAW_WINDOW";
pub const ENV_NO_WARMUP: &str = "THAW_NO_WARMUP";
pub const ENV_BUNDLE: &str = "THAW_BUNDLE";

/// Configuration of the injected agent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentConfig {
    /// Where to write the stream; the agent stays idle when unset
    pub output: Option<PathBuf>,
    /// Library exporting `find_encryption_info`; built-in oracle when unset
    pub oracle: Option<PathBuf>,
    pub options: DumpOptions,
}

impl AgentConfig {
    /// Read the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = |name: &str| lookup(name).filter(|v| !v.is_empty()).map(PathBuf::from);
        let flag = |name: &'static str| -> Result<bool, ConfigError> {
            match lookup(name).as_deref().map(str::trim) {
                None | Some("") | Some("0") | Some("false") => Ok(false),
                Some("1") | Some("true") => Ok(true),
                Some(other) => Err(ConfigError::InvalidFlag {
                    name,
                    value: other.to_string(),
                }),
            }
        };

        let mut options = DumpOptions::new()
            .executable_only(flag(ENV_EXECUTABLE_ONLY)?)
            .warmup(!flag(ENV_NO_WARMUP)?);
        if let Some(window) = lookup(ENV_WINDOW).filter(|v| !v.is_empty()) {
            options = options.suspend_window(window.parse()?);
        }
        options.bundle_root = path(ENV_BUNDLE);

        Ok(Self {
            output: path(ENV_OUTPUT),
            oracle: path(ENV_ORACLE),
            options,
        })
    }

    /// Whether the agent should run a dump at load time
    pub fn is_active(&self) -> bool {
        self.output.is_some()
    }
}
