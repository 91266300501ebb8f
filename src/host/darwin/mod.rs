//! Darwin host - dyld, Mach VM and dlopen backed process access.
//!
//! Runs inside the target process: the images, memory and threads are the
//! caller's own.

mod threads;

pub use threads::TaskThreads;

use std::ffi::{CStr, CString, OsStr};
use std::fs::File;
use std::io::Read;
use std::os::raw::{c_char, c_void};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use mach2::kern_return::KERN_SUCCESS;
use mach2::traps::mach_task_self;
use mach2::vm::mach_vm_read_overwrite;
use mach2::vm_types::{mach_vm_address_t, mach_vm_size_t};

use super::{OpenFlags, ProcessHost, ThreadControl};
use crate::core::{HostError, MemoryError, ModuleImage, ProcessMemory};
use crate::macho::{self, ImageHeader, HEADER_SIZE_64};
use crate::oracle::dl_error;

/// Bytes of the on-disk file read to locate the running slice
const FAT_HEAD_SIZE: u64 = 0x1000;

const AUDIO_TOOLBOX: &[u8] = b"/System/Library/Frameworks/AudioToolbox.framework/AudioToolbox\0";
const PLAY_SYSTEM_SOUND: &[u8] = b"AudioServicesPlaySystemSound\0";
const COMPLETION_SOUND: u32 = 1007;

extern "C" {
    fn _dyld_image_count() -> u32;
    fn _dyld_get_image_header(image_index: u32) -> *const c_void;
    fn _dyld_get_image_name(image_index: u32) -> *const c_char;
}

/// Reads the current task's memory through `mach_vm_read_overwrite`, so
/// unmapped pages come back as errors instead of faults
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskMemory;

impl ProcessMemory for TaskMemory {
    fn read_memory(&self, address: u64, size: usize) -> Result<Vec<u8>, MemoryError> {
        let mut buffer = vec![0u8; size];
        let mut read: mach_vm_size_t = 0;

        let kr = unsafe {
            mach_vm_read_overwrite(
                mach_task_self(),
                address as mach_vm_address_t,
                size as mach_vm_size_t,
                buffer.as_mut_ptr() as mach_vm_address_t,
                &mut read,
            )
        };

        if kr != KERN_SUCCESS {
            return Err(MemoryError::ReadFailed {
                address,
                reason: format!("mach_vm_read_overwrite returned {}", kr),
            });
        }
        if read as usize != size {
            return Err(MemoryError::ShortRead {
                address,
                wanted: size,
                got: read as usize,
            });
        }
        Ok(buffer)
    }
}

/// The current process, seen through dyld and Mach
#[derive(Debug, Default)]
pub struct DarwinHost {
    memory: TaskMemory,
    threads: TaskThreads,
}

impl DarwinHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copyable memory reader for the same task
    pub fn memory(&self) -> TaskMemory {
        self.memory
    }
}

impl ProcessMemory for DarwinHost {
    fn read_memory(&self, address: u64, size: usize) -> Result<Vec<u8>, MemoryError> {
        self.memory.read_memory(address, size)
    }
}

impl ProcessHost for DarwinHost {
    fn main_bundle(&self) -> Result<PathBuf, HostError> {
        let exe = std::env::current_exe().map_err(|source| HostError::Io {
            path: PathBuf::from("<main executable>"),
            source,
        })?;
        exe.parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| HostError::Enumeration("main executable has no parent".into()))
    }

    fn modules(&self) -> Result<Vec<ModuleImage>, HostError> {
        let count = unsafe { _dyld_image_count() };
        let mut modules = Vec::with_capacity(count as usize);

        for index in 0..count {
            let (header, name) =
                unsafe { (_dyld_get_image_header(index), _dyld_get_image_name(index)) };
            // Images can be unloaded between count and lookup
            if header.is_null() || name.is_null() {
                continue;
            }
            let name = unsafe { CStr::from_ptr(name) };
            modules.push(ModuleImage::new(
                PathBuf::from(OsStr::from_bytes(name.to_bytes())),
                header as u64,
            ));
        }

        log::debug!("dyld reports {} images", modules.len());
        Ok(modules)
    }

    fn slice_offset(&self, image: &ModuleImage) -> Result<u64, HostError> {
        let header_bytes = self.memory.read_memory(image.base_address, HEADER_SIZE_64)?;
        let header = ImageHeader::parse(&header_bytes).map_err(|e| HostError::SliceNotFound {
            path: image.path.clone(),
            reason: e.to_string(),
        })?;

        let io_err = |source| HostError::Io {
            path: image.path.clone(),
            source,
        };
        let mut head = Vec::new();
        File::open(&image.path)
            .map_err(io_err)?
            .take(FAT_HEAD_SIZE)
            .read_to_end(&mut head)
            .map_err(io_err)?;

        macho::slice_offset(&head, header.cputype, header.cpusubtype).map_err(|e| {
            HostError::SliceNotFound {
                path: image.path.clone(),
                reason: e.to_string(),
            }
        })
    }

    fn open_library(&self, path: &Path, flags: OpenFlags) -> Result<(), HostError> {
        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| HostError::LoadFailed {
            path: path.to_path_buf(),
            reason: "path contains a NUL byte".into(),
        })?;

        let mut mode = if flags.lazy {
            libc::RTLD_LAZY
        } else {
            libc::RTLD_NOW
        };
        mode |= if flags.global {
            libc::RTLD_GLOBAL
        } else {
            libc::RTLD_LOCAL
        };

        // The handle is intentionally leaked: the image must stay mapped
        let handle = unsafe { libc::dlopen(c_path.as_ptr(), mode) };
        if handle.is_null() {
            return Err(HostError::LoadFailed {
                path: path.to_path_buf(),
                reason: dl_error(),
            });
        }
        Ok(())
    }

    fn completion_signal(&self) {
        unsafe {
            let lib = libc::dlopen(AUDIO_TOOLBOX.as_ptr() as *const c_char, libc::RTLD_LAZY);
            if lib.is_null() {
                return;
            }
            let sym = libc::dlsym(lib, PLAY_SYSTEM_SOUND.as_ptr() as *const c_char);
            if sym.is_null() {
                return;
            }
            let play: extern "C" fn(u32) = std::mem::transmute(sym);
            play(COMPLETION_SOUND);
        }
    }
}

impl ThreadControl for DarwinHost {
    fn suspend_others(&self) -> Result<(), HostError> {
        self.threads.suspend_others()
    }

    fn resume_others(&self) -> Result<(), HostError> {
        self.threads.resume_others()
    }
}
