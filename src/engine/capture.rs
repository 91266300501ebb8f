//! Capture coordinator
//!
//! Resolves each cataloged module through the oracle and copies its
//! decrypted region out of memory. Must run with the process frozen.

use crate::core::{EncryptionDescriptor, ModuleImage};
use crate::host::ProcessHost;
use crate::oracle::EncryptionOracle;

/// What capturing one module produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// The oracle reported no encrypted region
    Skipped,
    /// The decrypted region, ready to patch into the file
    Captured {
        fat_offset: u64,
        descriptor: EncryptionDescriptor,
        blob: Vec<u8>,
    },
    /// Resolution succeeded but the slice or memory was unreachable
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleCapture {
    pub image: ModuleImage,
    pub outcome: CaptureOutcome,
}

/// Capture a single module
pub fn capture_module<H>(host: &H, oracle: &dyn EncryptionOracle, image: ModuleImage) -> ModuleCapture
where
    H: ProcessHost + ?Sized,
{
    let descriptor = oracle.find_encryption_info(image.base_address);
    if !descriptor.is_encrypted() {
        log::debug!("{} is not encrypted", image.path.display());
        return ModuleCapture {
            image,
            outcome: CaptureOutcome::Skipped,
        };
    }

    let outcome = match capture_region(host, &image, descriptor) {
        Ok(outcome) => outcome,
        Err(reason) => {
            log::error!("Failed to capture {}: {}", image.path.display(), reason);
            CaptureOutcome::Failed(reason)
        }
    };
    ModuleCapture { image, outcome }
}

fn capture_region<H>(
    host: &H,
    image: &ModuleImage,
    descriptor: EncryptionDescriptor,
) -> Result<CaptureOutcome, String>
where
    H: ProcessHost + ?Sized,
{
    let fat_offset = host.slice_offset(image).map_err(|e| e.to_string())?;
    let size = usize::try_from(descriptor.region_size)
        .map_err(|_| format!("region size {:#x} too large", descriptor.region_size))?;
    let blob = host
        .read_memory(descriptor.region_address, size)
        .map_err(|e| e.to_string())?;

    log::info!(
        "Captured {} bytes of {} from {:#x} (slice at {:#x})",
        blob.len(),
        image.path.display(),
        descriptor.region_address,
        fat_offset
    );
    Ok(CaptureOutcome::Captured {
        fat_offset,
        descriptor,
        blob,
    })
}

/// Capture every module, in order. A failure is confined to its module.
pub fn capture_all<H>(
    host: &H,
    oracle: &dyn EncryptionOracle,
    modules: Vec<ModuleImage>,
) -> Vec<ModuleCapture>
where
    H: ProcessHost + ?Sized,
{
    modules
        .into_iter()
        .map(|image| capture_module(host, oracle, image))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::mock::MockProcess;

    fn oracle(base: u64) -> EncryptionDescriptor {
        if base == 0x1_0000_0000 {
            EncryptionDescriptor {
                region_address: 0x1_0000_4000,
                region_file_offset: 0x4000,
                region_size: 0x10,
                descriptor_file_offset: 0x100,
                descriptor_size: 4,
            }
        } else {
            EncryptionDescriptor::NOT_ENCRYPTED
        }
    }

    #[test]
    fn test_captures_region_with_slice_offset() {
        let process = MockProcess::new("/b");
        process
            .add_module("/b/App", 0x1_0000_0000, 0x8000)
            .map(0x1_0000_4000, (0u8..0x10).collect());

        let capture = capture_module(&process, &oracle, ModuleImage::new("/b/App", 0x1_0000_0000));
        match capture.outcome {
            CaptureOutcome::Captured {
                fat_offset, blob, ..
            } => {
                assert_eq!(fat_offset, 0x8000);
                assert_eq!(blob, (0u8..0x10).collect::<Vec<_>>());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_unencrypted_module_skipped() {
        let process = MockProcess::new("/b");
        let capture = capture_module(&process, &oracle, ModuleImage::new("/b/Lib", 0x2000));
        assert_eq!(capture.outcome, CaptureOutcome::Skipped);
    }

    #[test]
    fn test_fault_fails_only_that_module() {
        let process = MockProcess::new("/b");
        process
            .add_module("/b/App", 0x1_0000_0000, 0)
            .fault(0x1_0000_4000, 0x10)
            .add_module("/b/Lib", 0x2000, 0);

        let captures = capture_all(
            &process,
            &oracle,
            vec![
                ModuleImage::new("/b/App", 0x1_0000_0000),
                ModuleImage::new("/b/Lib", 0x2000),
            ],
        );
        assert!(matches!(captures[0].outcome, CaptureOutcome::Failed(_)));
        assert_eq!(captures[1].outcome, CaptureOutcome::Skipped);
    }
}
