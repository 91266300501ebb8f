//! Native oracle binding.
//!
//! Binds a caller-supplied `find_encryption_info` routine:
//!
//! ```c
//! struct encryption_info {
//!     void *region;          // NULL when not encrypted
//!     uint32_t offset;       // region offset within the slice
//!     uint32_t size;         // region size
//!     uint32_t offset_of_cmd;
//!     uint32_t size_of_cmd;
//! };
//! struct encryption_info find_encryption_info(const void *base);
//! ```

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::EncryptionOracle;
use crate::core::EncryptionDescriptor;

const ENTRY_POINT: &[u8] = b"find_encryption_info\0";

/// Result tuple of the native routine
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawEncryptionInfo {
    pub region: *const c_void,
    pub offset: u32,
    pub size: u32,
    pub offset_of_cmd: u32,
    pub size_of_cmd: u32,
}

impl From<RawEncryptionInfo> for EncryptionDescriptor {
    fn from(raw: RawEncryptionInfo) -> Self {
        if raw.region.is_null() {
            return EncryptionDescriptor::NOT_ENCRYPTED;
        }
        EncryptionDescriptor {
            region_address: raw.region as u64,
            region_file_offset: raw.offset as u64,
            region_size: raw.size as u64,
            descriptor_file_offset: raw.offset_of_cmd as u64,
            descriptor_size: raw.size_of_cmd as u64,
        }
    }
}

type FindEncryptionInfo = unsafe extern "C" fn(*const c_void) -> RawEncryptionInfo;

/// Errors binding a native oracle
#[derive(Error, Debug)]
pub enum OracleLoadError {
    #[error("Failed to open {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("{path} does not export find_encryption_info: {reason}")]
    MissingEntryPoint { path: PathBuf, reason: String },

    #[error("Invalid library path {0}")]
    InvalidPath(PathBuf),
}

/// A `find_encryption_info` routine loaded from a shared library
pub struct NativeOracle {
    handle: *mut c_void,
    entry: FindEncryptionInfo,
    path: PathBuf,
}

// The routine is a pure function of the image header it is pointed at
unsafe impl Send for NativeOracle {}
unsafe impl Sync for NativeOracle {}

impl NativeOracle {
    /// Load the library at `path` and bind its entry point
    pub fn load(path: impl AsRef<Path>) -> Result<Self, OracleLoadError> {
        let path = path.as_ref();
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| OracleLoadError::InvalidPath(path.to_path_buf()))?;

        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
        if handle.is_null() {
            return Err(OracleLoadError::Open {
                path: path.to_path_buf(),
                reason: dl_error(),
            });
        }

        let sym = unsafe { libc::dlsym(handle, ENTRY_POINT.as_ptr() as *const c_char) };
        if sym.is_null() {
            let reason = dl_error();
            unsafe { libc::dlclose(handle) };
            return Err(OracleLoadError::MissingEntryPoint {
                path: path.to_path_buf(),
                reason,
            });
        }

        log::info!("Bound find_encryption_info from {}", path.display());
        Ok(Self {
            handle,
            entry: unsafe { std::mem::transmute::<*mut c_void, FindEncryptionInfo>(sym) },
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EncryptionOracle for NativeOracle {
    fn find_encryption_info(&self, base_address: u64) -> EncryptionDescriptor {
        unsafe { (self.entry)(base_address as *const c_void) }.into()
    }
}

impl Drop for NativeOracle {
    fn drop(&mut self) {
        unsafe { libc::dlclose(self.handle) };
    }
}

impl std::fmt::Debug for NativeOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeOracle").field("path", &self.path).finish()
    }
}

/// The C routine from `native/encryption_info.c`, linked statically
#[cfg(feature = "native_oracle")]
#[derive(Debug, Clone, Copy, Default)]
pub struct BundledOracle;

#[cfg(feature = "native_oracle")]
extern "C" {
    fn find_encryption_info(base: *const c_void) -> RawEncryptionInfo;
}

#[cfg(feature = "native_oracle")]
impl EncryptionOracle for BundledOracle {
    fn find_encryption_info(&self, base_address: u64) -> EncryptionDescriptor {
        unsafe { find_encryption_info(base_address as *const c_void) }.into()
    }
}

/// Message from the most recent failed dl* call
pub(crate) fn dl_error() -> String {
    unsafe {
        let err = libc::dlerror();
        if err.is_null() {
            "unknown error".to_string()
        } else {
            CStr::from_ptr(err).to_string_lossy().into_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_region_is_not_encrypted() {
        let raw = RawEncryptionInfo {
            region: std::ptr::null(),
            offset: 0x4000,
            size: 0x2000,
            offset_of_cmd: 0x100,
            size_of_cmd: 4,
        };
        assert_eq!(EncryptionDescriptor::from(raw), EncryptionDescriptor::NOT_ENCRYPTED);
    }

    #[test]
    fn test_raw_conversion() {
        let raw = RawEncryptionInfo {
            region: 0x1_0000_4000usize as *const c_void,
            offset: 0x4000,
            size: 0x2000,
            offset_of_cmd: 0x100,
            size_of_cmd: 8,
        };
        let info = EncryptionDescriptor::from(raw);
        assert_eq!(info.region_address, 0x1_0000_4000);
        assert_eq!(info.descriptor_file_offset, 0x100);
        assert_eq!(info.descriptor_size, 8);
    }

    #[test]
    fn test_missing_library() {
        let err = NativeOracle::load("/nonexistent/liboracle.dylib").unwrap_err();
        assert!(matches!(err, OracleLoadError::Open { .. }));
    }

    #[cfg(feature = "native_oracle")]
    #[test]
    fn test_bundled_oracle_reads_header() {
        let mut image = Vec::new();
        for v in [0xfeed_facfu32, 0x0100_000c, 0, 2, 1, 24, 0, 0, 0x2c, 24, 0x4000, 0x2000, 1, 0] {
            image.extend_from_slice(&v.to_le_bytes());
        }
        let base = image.as_ptr() as u64;
        let info = BundledOracle.find_encryption_info(base);
        assert_eq!(info.region_address, base + 0x4000);
        assert_eq!(info.descriptor_file_offset, 32 + 16);
        assert_eq!(info.descriptor_size, 4);
    }
}
