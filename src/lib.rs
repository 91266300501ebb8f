//! thaw - Dump decrypted images of a DRM-encrypted application bundle
//!
//! Runs inside the target process. While every other thread is suspended,
//! the decrypted text of each bundle image is copied out of memory and
//! described as patches against the encrypted files on disk; the files,
//! the patches and the rest of the bundle go out through a
//! `TransferChannel`.

pub mod config;
pub mod core;
pub mod engine;
pub mod host;
pub mod macho;
pub mod oracle;
pub mod transfer;
pub mod ui;

#[cfg(all(feature = "agent", target_vendor = "apple"))]
mod agent;

pub use crate::config::{AgentConfig, DumpOptions, SuspendWindow};
pub use crate::core::{BundleRoot, DownloadedSet, DumpError, EncryptionDescriptor, PatchInstruction};
pub use crate::engine::{DumpReport, Dumper, ModuleOutcome};
pub use crate::oracle::{EncryptionOracle, LoadCommandOracle};
pub use crate::transfer::TransferChannel;
