//! Patch emitter

use std::path::Path;

use crate::core::{EncryptionDescriptor, PatchInstruction, TransferError};
use crate::transfer::TransferChannel;

/// The replace and erase patches for one captured module, in emission order
pub fn patches_for(
    filename: &Path,
    fat_offset: u64,
    descriptor: &EncryptionDescriptor,
    blob: Vec<u8>,
) -> [PatchInstruction; 2] {
    [
        PatchInstruction::Replace {
            filename: filename.to_path_buf(),
            offset: fat_offset + descriptor.region_file_offset,
            blob,
        },
        PatchInstruction::Erase {
            filename: filename.to_path_buf(),
            offset: fat_offset + descriptor.descriptor_file_offset,
            size: descriptor.descriptor_size,
        },
    ]
}

/// Passes patches straight through to a channel, counting them
pub struct PatchEmitter<'a> {
    channel: &'a mut dyn TransferChannel,
    sent: usize,
}

impl<'a> PatchEmitter<'a> {
    pub fn new(channel: &'a mut dyn TransferChannel) -> Self {
        Self { channel, sent: 0 }
    }

    pub fn emit(&mut self, patch: &PatchInstruction) -> Result<(), TransferError> {
        log::debug!("Patch {:?}", patch);
        self.channel.send_patch(patch)?;
        self.sent += 1;
        Ok(())
    }

    /// Emit every patch, stopping at the first channel error
    pub fn emit_all<'p>(
        &mut self,
        patches: impl IntoIterator<Item = &'p PatchInstruction>,
    ) -> Result<(), TransferError> {
        patches.into_iter().try_for_each(|p| self.emit(p))
    }

    pub fn sent(&self) -> usize {
        self.sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::RecordingChannel;

    #[test]
    fn test_offsets_include_fat_offset() {
        let descriptor = EncryptionDescriptor {
            region_address: 0x1000,
            region_file_offset: 0x4000,
            region_size: 4,
            descriptor_file_offset: 0x100,
            descriptor_size: 8,
        };
        let [replace, erase] = patches_for(Path::new("/b/App"), 0x10000, &descriptor, vec![1; 4]);
        assert_eq!(replace.offset(), 0x14000);
        assert_eq!(replace.len(), 4);
        assert_eq!(
            erase,
            PatchInstruction::Erase {
                filename: "/b/App".into(),
                offset: 0x10100,
                size: 8,
            }
        );
    }

    #[test]
    fn test_emitter_counts() {
        let mut channel = RecordingChannel::new();
        let patches = patches_for(
            Path::new("/b/App"),
            0,
            &EncryptionDescriptor::NOT_ENCRYPTED,
            Vec::new(),
        );
        let mut emitter = PatchEmitter::new(&mut channel);
        emitter.emit_all(&patches).unwrap();
        assert_eq!(emitter.sent(), 2);
        assert_eq!(channel.patches().len(), 2);
    }
}
