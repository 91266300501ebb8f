//! Value types for a dump session.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// Normalized path of the application bundle being dumped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleRoot(PathBuf);

impl BundleRoot {
    /// Wrap an already-normalized bundle path
    pub fn new(normalized: impl Into<PathBuf>) -> Self {
        Self(normalized.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Whether a normalized path lies inside the bundle
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.0)
    }

    /// Path relative to the bundle root, if it lies inside it
    pub fn relative<'a>(&self, path: &'a Path) -> Option<&'a Path> {
        path.strip_prefix(&self.0).ok()
    }
}

impl fmt::Display for BundleRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// A binary image currently mapped into the process.
///
/// The file offset of the mapped architecture slice is not stored here.
/// It is resolved through `ProcessHost::slice_offset` during capture, only
/// for encrypted images, and travels with `CaptureOutcome::Captured`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleImage {
    /// Absolute path of the image (normalized once cataloged)
    pub path: PathBuf,
    /// Address of the image's Mach-O header in the process
    pub base_address: u64,
}

impl ModuleImage {
    pub fn new(path: impl Into<PathBuf>, base_address: u64) -> Self {
        Self {
            path: path.into(),
            base_address,
        }
    }
}

/// Encryption metadata for one image, as reported by an oracle.
///
/// Offsets are relative to the start of the image's architecture slice.
/// A `region_address` of zero means the image is not encrypted or its
/// descriptor could not be located.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncryptionDescriptor {
    /// Address of the (decrypted) region in process memory
    pub region_address: u64,
    /// Offset of the region within the slice
    pub region_file_offset: u64,
    /// Size of the region in bytes
    pub region_size: u64,
    /// Offset within the slice of the field recording encryption state
    pub descriptor_file_offset: u64,
    /// Size of that field in bytes
    pub descriptor_size: u64,
}

impl EncryptionDescriptor {
    /// The "not encrypted / not found" answer
    pub const NOT_ENCRYPTED: Self = Self {
        region_address: 0,
        region_file_offset: 0,
        region_size: 0,
        descriptor_file_offset: 0,
        descriptor_size: 0,
    };

    pub fn is_encrypted(&self) -> bool {
        self.region_address != 0
    }
}

/// A directive for the transfer channel
#[derive(Clone, PartialEq, Eq)]
pub enum PatchInstruction {
    /// Overwrite `blob.len()` bytes at `offset` with `blob`
    Replace {
        filename: PathBuf,
        offset: u64,
        blob: Vec<u8>,
    },
    /// Zero-fill `size` bytes at `offset`
    Erase {
        filename: PathBuf,
        offset: u64,
        size: u64,
    },
}

impl PatchInstruction {
    pub fn filename(&self) -> &Path {
        match self {
            Self::Replace { filename, .. } | Self::Erase { filename, .. } => filename,
        }
    }

    pub fn offset(&self) -> u64 {
        match self {
            Self::Replace { offset, .. } | Self::Erase { offset, .. } => *offset,
        }
    }

    /// Number of file bytes the patch covers
    pub fn len(&self) -> u64 {
        match self {
            Self::Replace { blob, .. } => blob.len() as u64,
            Self::Erase { size, .. } => *size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for PatchInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Replace {
                filename,
                offset,
                blob,
            } => f
                .debug_struct("Replace")
                .field("filename", filename)
                .field("offset", &format_args!("{:#x}", offset))
                .field("blob_len", &format_args!("{:#x}", blob.len()))
                .finish(),
            Self::Erase {
                filename,
                offset,
                size,
            } => f
                .debug_struct("Erase")
                .field("filename", filename)
                .field("offset", &format_args!("{:#x}", offset))
                .field("size", size)
                .finish(),
        }
    }
}

/// Paths already transferred during the current session
#[derive(Debug, Clone, Default)]
pub struct DownloadedSet {
    paths: HashSet<PathBuf>,
}

impl DownloadedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a path; returns false if it was already present
    pub fn insert(&mut self, path: impl Into<PathBuf>) -> bool {
        self.paths.insert(path.into())
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.paths.iter().map(PathBuf::as_path)
    }
}
