//! Error types and completion codes

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Completion code for a normal session
pub const EXIT_OK: i32 = 0;
/// No encryption oracle was bound before `dump`
pub const EXIT_ORACLE_NOT_BOUND: i32 = 2;
/// Threads could not be suspended
pub const EXIT_SUSPEND_FAILED: i32 = 3;
/// The process module list could not be enumerated
pub const EXIT_CATALOG_FAILED: i32 = 4;
/// The bundle root could not be determined
pub const EXIT_BUNDLE_ROOT: i32 = 5;
/// The output stream could not be opened or configured
pub const EXIT_CHANNEL: i32 = 6;
/// An agent setting in the environment could not be parsed
pub const EXIT_CONFIG: i32 = 7;

/// Errors that abort a dump session
#[derive(Error, Debug)]
pub enum DumpError {
    #[error("No encryption oracle bound; call prepare() before dump()")]
    OracleNotBound,

    #[error("Failed to suspend process threads: {0}")]
    Suspend(#[source] HostError),

    #[error("Failed to enumerate process modules: {0}")]
    Catalog(#[source] HostError),

    #[error("Failed to determine bundle root: {0}")]
    BundleRoot(#[source] HostError),
}

impl DumpError {
    /// Completion code reported to the caller
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::OracleNotBound => EXIT_ORACLE_NOT_BOUND,
            Self::Suspend(_) => EXIT_SUSPEND_FAILED,
            Self::Catalog(_) => EXIT_CATALOG_FAILED,
            Self::BundleRoot(_) => EXIT_BUNDLE_ROOT,
        }
    }
}

/// Errors raised by the process/platform layer
#[derive(Error, Debug)]
pub enum HostError {
    #[error("Module enumeration failed: {0}")]
    Enumeration(String),

    #[error("Failed to load {path}: {reason}")]
    LoadFailed { path: PathBuf, reason: String },

    #[error("Thread suspension failed: {0}")]
    SuspendFailed(String),

    #[error("Thread resumption failed: {0}")]
    ResumeFailed(String),

    #[error("No architecture slice for {path}: {reason}")]
    SliceNotFound { path: PathBuf, reason: String },

    #[error("Memory error: {0}")]
    Memory(#[from] super::memory::MemoryError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Errors raised by a transfer channel
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write stream: {0}")]
    Write(#[from] io::Error),

    #[error("Failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Channel rejected {0}")]
    Rejected(String),
}
