//! Oracle module - Encryption descriptor resolution
//!
//! An oracle answers one question: given the base address of a loaded
//! image, where is its encrypted region and which bytes record that it is
//! encrypted. The engine depends only on the `EncryptionOracle` trait.
//!
//! Implementations:
//! - `LoadCommandOracle`: parses the image's load commands from memory
//! - `NativeOracle`: calls a `find_encryption_info` routine from a library
//! - `BundledOracle`: the C routine compiled in with `native_oracle`

#[cfg(unix)]
mod native;

#[cfg(unix)]
pub use native::{NativeOracle, OracleLoadError, RawEncryptionInfo};

#[cfg(unix)]
pub(crate) use native::dl_error;

#[cfg(all(unix, feature = "native_oracle"))]
pub use native::BundledOracle;

use crate::core::{EncryptionDescriptor, ProcessMemory};
use crate::macho::{self, ImageHeader, CRYPTID_SIZE, HEADER_SIZE_64};

/// Resolves the encryption descriptor of a loaded image
pub trait EncryptionOracle: Send + Sync {
    /// Descriptor for the image whose header is at `base_address`.
    ///
    /// Returns `EncryptionDescriptor::NOT_ENCRYPTED` when the image is not
    /// encrypted or its descriptor cannot be located.
    fn find_encryption_info(&self, base_address: u64) -> EncryptionDescriptor;
}

impl<F> EncryptionOracle for F
where
    F: Fn(u64) -> EncryptionDescriptor + Send + Sync,
{
    fn find_encryption_info(&self, base_address: u64) -> EncryptionDescriptor {
        self(base_address)
    }
}

/// Reads the Mach-O load commands of an image out of process memory
#[derive(Debug, Clone)]
pub struct LoadCommandOracle<M> {
    memory: M,
}

impl<M: ProcessMemory> LoadCommandOracle<M> {
    pub fn new(memory: M) -> Self {
        Self { memory }
    }

    fn resolve(&self, base_address: u64) -> Result<EncryptionDescriptor, String> {
        let head = self
            .memory
            .read_memory(base_address, HEADER_SIZE_64)
            .map_err(|e| e.to_string())?;
        let header = ImageHeader::parse(&head).map_err(|e| e.to_string())?;

        let image = self
            .memory
            .read_memory(base_address, header.load_commands_end())
            .map_err(|e| e.to_string())?;

        let cmd = match macho::find_encryption_command(&image).map_err(|e| e.to_string())? {
            Some(cmd) if cmd.is_encrypted() => cmd,
            _ => return Ok(EncryptionDescriptor::NOT_ENCRYPTED),
        };

        Ok(EncryptionDescriptor {
            region_address: base_address + cmd.cryptoff as u64,
            region_file_offset: cmd.cryptoff as u64,
            region_size: cmd.cryptsize as u64,
            descriptor_file_offset: cmd.cryptid_offset(),
            descriptor_size: CRYPTID_SIZE,
        })
    }
}

impl<M: ProcessMemory> EncryptionOracle for LoadCommandOracle<M> {
    fn find_encryption_info(&self, base_address: u64) -> EncryptionDescriptor {
        match self.resolve(base_address) {
            Ok(descriptor) => descriptor,
            Err(reason) => {
                log::debug!("No encryption info at {:#x}: {}", base_address, reason);
                EncryptionDescriptor::NOT_ENCRYPTED
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::mock::MockProcess;

    const LC_ENCRYPTION_INFO_64: u32 = 0x2c;

    fn image(cryptid: u32) -> Vec<u8> {
        let mut out = Vec::new();
        for v in [0xfeed_facfu32, 0x0100_000c, 0, 2, 1, 24, 0, 0] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        for v in [LC_ENCRYPTION_INFO_64, 24, 0x4000, 0x2000, cryptid, 0] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    #[test]
    fn test_load_command_oracle_reports_region() {
        let process = MockProcess::new("/b/App");
        process.map(0x1_0000_0000, image(1));
        let oracle = LoadCommandOracle::new(process.clone());

        let info = oracle.find_encryption_info(0x1_0000_0000);
        assert_eq!(
            info,
            EncryptionDescriptor {
                region_address: 0x1_0000_4000,
                region_file_offset: 0x4000,
                region_size: 0x2000,
                descriptor_file_offset: 32 + 16,
                descriptor_size: 4,
            }
        );
    }

    #[test]
    fn test_load_command_oracle_cryptid_zero() {
        let process = MockProcess::new("/b/App");
        process.map(0x1000, image(0));
        let oracle = LoadCommandOracle::new(process);
        assert!(!oracle.find_encryption_info(0x1000).is_encrypted());
    }

    #[test]
    fn test_load_command_oracle_unreadable_header() {
        let process = MockProcess::new("/b/App");
        let oracle = LoadCommandOracle::new(process);
        assert_eq!(
            oracle.find_encryption_info(0xdead_0000),
            EncryptionDescriptor::NOT_ENCRYPTED
        );
    }

    #[test]
    fn test_closure_oracle() {
        let oracle = |base: u64| EncryptionDescriptor {
            region_address: base + 0x10,
            ..EncryptionDescriptor::NOT_ENCRYPTED
        };
        assert!(oracle.find_encryption_info(0x1000).is_encrypted());
    }
}
