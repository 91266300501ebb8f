//! Memory - Process memory reads
//!
//! Provides the read side of process memory access used by the capture
//! coordinator and the built-in oracle.

use thiserror::Error;

/// Memory operation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("Failed to read memory at {address:#x}: {reason}")]
    ReadFailed { address: u64, reason: String },

    #[error("Short read at {address:#x}: wanted {wanted:#x} bytes, got {got:#x}")]
    ShortRead { address: u64, wanted: usize, got: usize },

    #[error("Invalid memory region: {address:#x} (+{size:#x})")]
    InvalidRegion { address: u64, size: usize },

    #[error("Access denied at {address:#x}")]
    AccessDenied { address: u64 },
}

/// Read access to the address space of the process being dumped
pub trait ProcessMemory: Send + Sync {
    /// Copy `size` bytes starting at `address` into a new buffer.
    ///
    /// Unmapped or protected ranges must surface as an error rather than
    /// a fault.
    fn read_memory(&self, address: u64, size: usize) -> Result<Vec<u8>, MemoryError>;
}

impl<T: ProcessMemory + ?Sized> ProcessMemory for &T {
    fn read_memory(&self, address: u64, size: usize) -> Result<Vec<u8>, MemoryError> {
        (**self).read_memory(address, size)
    }
}

impl<T: ProcessMemory + ?Sized> ProcessMemory for std::sync::Arc<T> {
    fn read_memory(&self, address: u64, size: usize) -> Result<Vec<u8>, MemoryError> {
        (**self).read_memory(address, size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Flat(Vec<u8>);

    impl ProcessMemory for Flat {
        fn read_memory(&self, address: u64, size: usize) -> Result<Vec<u8>, MemoryError> {
            let start = address as usize;
            self.0
                .get(start..start + size)
                .map(<[u8]>::to_vec)
                .ok_or(MemoryError::InvalidRegion { address, size })
        }
    }

    #[test]
    fn test_reads_through_references() {
        let memory = std::sync::Arc::new(Flat(vec![1, 2, 3, 4]));
        let by_ref: &dyn ProcessMemory = &memory;
        assert_eq!(by_ref.read_memory(1, 2).unwrap(), vec![2, 3]);
        assert_eq!(
            (&memory).read_memory(3, 4),
            Err(MemoryError::InvalidRegion { address: 3, size: 4 })
        );
    }
}
