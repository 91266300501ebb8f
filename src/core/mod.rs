//! Core module - Session data model and error types
//!
//! This module contains the value types shared by every stage of a dump
//! session and the error taxonomy the stages report through.

pub mod error;
pub mod memory;
pub mod types;

// Re-export common types
pub use error::{DumpError, HostError, TransferError};
pub use memory::{MemoryError, ProcessMemory};
pub use types::{BundleRoot, DownloadedSet, EncryptionDescriptor, ModuleImage, PatchInstruction};
