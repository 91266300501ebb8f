//! Host module - Capabilities the dump engine needs from its environment.
//!
//! The engine never touches the platform directly. It goes through:
//! - `ProcessHost`: module enumeration, memory reads, slice lookup, loading
//! - `ThreadControl`: suspend/resume every thread but the caller's
//! - `FileSystem`: directory listing, tree walks, stat and normalization
//!
//! `darwin` implements the process side on Apple targets, `fs` implements
//! the filesystem side over std/walkdir, and `mock` scripts both for tests.

pub mod fs;
pub mod mock;

#[cfg(target_vendor = "apple")]
pub mod darwin;

#[cfg(target_vendor = "apple")]
pub use darwin::DarwinHost as PlatformHost;

pub use fs::StdFileSystem;

use std::io;
use std::path::{Path, PathBuf};

use crate::core::{HostError, ModuleImage, ProcessMemory};

/// Binding flags for `ProcessHost::open_library`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    pub global: bool,
    pub lazy: bool,
}

impl OpenFlags {
    /// `RTLD_GLOBAL | RTLD_LAZY`
    pub const GLOBAL_LAZY: Self = Self {
        global: true,
        lazy: true,
    };
    /// `RTLD_LOCAL | RTLD_NOW`
    pub const LOCAL_NOW: Self = Self {
        global: false,
        lazy: false,
    };
}

/// The process being dumped
pub trait ProcessHost: ProcessMemory {
    /// Path of the main bundle, before normalization
    fn main_bundle(&self) -> Result<PathBuf, HostError>;

    /// Snapshot of every image currently mapped, in loader order
    fn modules(&self) -> Result<Vec<ModuleImage>, HostError>;

    /// File offset of the slice the process mapped for this image
    fn slice_offset(&self, image: &ModuleImage) -> Result<u64, HostError>;

    /// Load (or re-open) a library into the process
    fn open_library(&self, path: &Path, flags: OpenFlags) -> Result<(), HostError>;

    /// Best-effort end-of-session feedback; must never fail
    fn completion_signal(&self) {}
}

/// Process-wide thread suspension
pub trait ThreadControl {
    /// Suspend every thread except the calling one
    fn suspend_others(&self) -> Result<(), HostError>;

    /// Resume every thread suspended by `suspend_others`
    fn resume_others(&self) -> Result<(), HostError>;
}

/// Guard holding the process frozen; threads resume when it is dropped
pub struct FrozenProcess<'a> {
    threads: &'a dyn ThreadControl,
}

impl<'a> FrozenProcess<'a> {
    /// Suspend all other threads
    pub fn freeze(threads: &'a dyn ThreadControl) -> Result<Self, HostError> {
        threads.suspend_others()?;
        log::debug!("Process frozen");
        Ok(Self { threads })
    }
}

impl Drop for FrozenProcess<'_> {
    fn drop(&mut self) {
        match self.threads.resume_others() {
            Ok(()) => log::debug!("Process thawed"),
            Err(e) => log::error!("Failed to resume threads: {}", e),
        }
    }
}

/// Result of a `stat` query
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileStat {
    pub exists: bool,
    pub is_directory: bool,
}

/// One entry produced by a tree walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: PathBuf,
    /// Links are not followed
    pub is_directory: bool,
}

/// Filesystem queries used by warmup and the completion walker
pub trait FileSystem {
    fn stat(&self, path: &Path) -> FileStat;

    /// Whole contents of a file
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Immediate children of a directory, sorted by name
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Every entry below `root` (not `root` itself), parents before children.
    ///
    /// An error for one directory abandons that subtree only; iteration
    /// continues with its siblings.
    fn walk<'a>(&'a self, root: &Path) -> Box<dyn Iterator<Item = io::Result<TreeEntry>> + 'a>;

    /// Canonical absolute form of a path
    fn normalize(&self, path: &Path) -> PathBuf;
}
