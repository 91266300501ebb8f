//! Mach-O Module
//!
//! Parses just enough of the Mach-O format to dump encrypted images:
//! - Image header (magic, CPU type, load command extent)
//! - The `LC_ENCRYPTION_INFO(_64)` command
//! - Fat headers, to locate the running slice within a multi-arch file
//!
//! In-memory parsing works on raw header bytes copied out of the process;
//! whole-file inspection goes through goblin.

use std::fs;
use std::path::Path;

use goblin::mach::fat::FAT_MAGIC;
use goblin::mach::header::{MH_MAGIC, MH_MAGIC_64};
use goblin::mach::load_command::{CommandVariant, LC_ENCRYPTION_INFO, LC_ENCRYPTION_INFO_64};
use goblin::mach::{MachO, MultiArch};
use thiserror::Error;

/// Size of `mach_header`
pub const HEADER_SIZE_32: usize = 28;
/// Size of `mach_header_64`
pub const HEADER_SIZE_64: usize = 32;
/// Offset of `cryptid` within `encryption_info_command(_64)`
pub const CRYPTID_OFFSET: u64 = 16;
/// Size of the `cryptid` field
pub const CRYPTID_SIZE: u64 = 4;

/// Capability bits stripped before comparing CPU subtypes
const CPU_SUBTYPE_MASK: u32 = 0xff00_0000;
const FAT_MAGIC_64: u32 = 0xcafe_babf;

/// Mach-O parsing errors
#[derive(Error, Debug)]
pub enum MachOError {
    #[error("Not a Mach-O image (magic {0:#010x})")]
    BadMagic(u32),

    #[error("Truncated image: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Malformed load command at {offset:#x}: cmdsize {cmdsize}")]
    BadLoadCommand { offset: usize, cmdsize: u32 },

    #[error("No slice for cputype {cputype:#x}/{cpusubtype:#x}")]
    NoMatchingSlice { cputype: u32, cpusubtype: u32 },

    #[error("64-bit fat headers are not supported")]
    Fat64Unsupported,

    #[error("Slice at {offset:#x} (+{size:#x}) lies outside the file")]
    SliceOutOfBounds { offset: u64, size: u64 },

    #[error("Parse error: {0}")]
    Goblin(#[from] goblin::error::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The fields of a Mach-O header the dumper cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    pub cputype: u32,
    pub cpusubtype: u32,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    pub is_64: bool,
}

impl ImageHeader {
    /// Parse a little-endian Mach-O header
    pub fn parse(bytes: &[u8]) -> Result<Self, MachOError> {
        let magic = read_u32_le(bytes, 0)?;
        let is_64 = match magic {
            MH_MAGIC_64 => true,
            MH_MAGIC => false,
            other => return Err(MachOError::BadMagic(other)),
        };
        let header = Self {
            cputype: read_u32_le(bytes, 4)?,
            cpusubtype: read_u32_le(bytes, 8)?,
            ncmds: read_u32_le(bytes, 16)?,
            sizeofcmds: read_u32_le(bytes, 20)?,
            is_64,
        };
        if bytes.len() < header.size() {
            return Err(MachOError::Truncated {
                needed: header.size(),
                available: bytes.len(),
            });
        }
        Ok(header)
    }

    /// Size of the header structure itself
    pub fn size(&self) -> usize {
        if self.is_64 {
            HEADER_SIZE_64
        } else {
            HEADER_SIZE_32
        }
    }

    /// Offset one past the last load command
    pub fn load_commands_end(&self) -> usize {
        self.size() + self.sizeofcmds as usize
    }
}

/// An `LC_ENCRYPTION_INFO(_64)` command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionCommand {
    /// Offset of the command from the start of the slice
    pub cmd_offset: u64,
    pub cryptoff: u32,
    pub cryptsize: u32,
    pub cryptid: u32,
}

impl EncryptionCommand {
    pub fn is_encrypted(&self) -> bool {
        self.cryptid != 0
    }

    /// Slice offset of the `cryptid` field
    pub fn cryptid_offset(&self) -> u64 {
        self.cmd_offset + CRYPTID_OFFSET
    }
}

/// Scan the load commands of an image for its encryption command.
///
/// `image` must start at the Mach-O header and cover all load commands.
pub fn find_encryption_command(image: &[u8]) -> Result<Option<EncryptionCommand>, MachOError> {
    let header = ImageHeader::parse(image)?;
    let end = header.load_commands_end();
    if image.len() < end {
        return Err(MachOError::Truncated {
            needed: end,
            available: image.len(),
        });
    }

    let mut offset = header.size();
    for _ in 0..header.ncmds {
        if offset + 8 > end {
            break;
        }
        let cmd = read_u32_le(image, offset)?;
        let cmdsize = read_u32_le(image, offset + 4)?;
        if cmdsize < 8 || offset + cmdsize as usize > end {
            return Err(MachOError::BadLoadCommand { offset, cmdsize });
        }

        if cmd == LC_ENCRYPTION_INFO || cmd == LC_ENCRYPTION_INFO_64 {
            if cmdsize < 20 {
                return Err(MachOError::BadLoadCommand { offset, cmdsize });
            }
            return Ok(Some(EncryptionCommand {
                cmd_offset: offset as u64,
                cryptoff: read_u32_le(image, offset + 8)?,
                cryptsize: read_u32_le(image, offset + 12)?,
                cryptid: read_u32_le(image, offset + 16)?,
            }));
        }

        offset += cmdsize as usize;
    }

    Ok(None)
}

/// Offset of the slice matching `cputype`/`cpusubtype` within a file.
///
/// `head` is the start of the on-disk file; it only needs to cover the fat
/// header and its architecture table. Thin files always yield zero.
pub fn slice_offset(head: &[u8], cputype: u32, cpusubtype: u32) -> Result<u64, MachOError> {
    let magic_be = read_u32_be(head, 0)?;
    match magic_be {
        FAT_MAGIC => {
            let multi = MultiArch::new(head)?;
            let wanted_sub = cpusubtype & !CPU_SUBTYPE_MASK;
            for arch in multi.iter_arches() {
                let arch = arch?;
                if arch.cputype == cputype && (arch.cpusubtype & !CPU_SUBTYPE_MASK) == wanted_sub {
                    return Ok(arch.offset as u64);
                }
            }
            Err(MachOError::NoMatchingSlice {
                cputype,
                cpusubtype,
            })
        }
        FAT_MAGIC_64 => Err(MachOError::Fat64Unsupported),
        _ => {
            ImageHeader::parse(head)?;
            Ok(0)
        }
    }
}

/// One architecture slice of a file on disk
#[derive(Debug, Clone)]
pub struct SliceInfo {
    pub cputype: u32,
    pub cpusubtype: u32,
    /// Offset of the slice within the file
    pub file_offset: u64,
    pub size: u64,
    pub is_64: bool,
    pub encryption: Option<EncryptionCommand>,
}

impl SliceInfo {
    pub fn arch_name(&self) -> &'static str {
        arch_name(self.cputype, self.cpusubtype)
    }
}

/// List every slice of a Mach-O file with its encryption state
pub fn inspect_file<P: AsRef<Path>>(path: P) -> Result<Vec<SliceInfo>, MachOError> {
    let data = fs::read(path)?;
    inspect_bytes(&data)
}

/// List every slice of an in-memory Mach-O file
pub fn inspect_bytes(data: &[u8]) -> Result<Vec<SliceInfo>, MachOError> {
    match read_u32_be(data, 0)? {
        FAT_MAGIC => {
            let multi = MultiArch::new(data)?;
            let mut slices = Vec::new();
            for arch in multi.iter_arches() {
                let arch = arch?;
                let start = arch.offset as usize;
                let end = start + arch.size as usize;
                if end > data.len() {
                    return Err(MachOError::SliceOutOfBounds {
                        offset: arch.offset as u64,
                        size: arch.size as u64,
                    });
                }
                slices.push(describe_slice(&data[start..end], arch.offset as u64)?);
            }
            Ok(slices)
        }
        FAT_MAGIC_64 => Err(MachOError::Fat64Unsupported),
        _ => Ok(vec![describe_slice(data, 0)?]),
    }
}

fn describe_slice(bytes: &[u8], file_offset: u64) -> Result<SliceInfo, MachOError> {
    let macho = MachO::parse(bytes, 0)?;

    let encryption = macho.load_commands.iter().find_map(|lc| match &lc.command {
        CommandVariant::EncryptionInfo32(cmd) => Some(EncryptionCommand {
            cmd_offset: lc.offset as u64,
            cryptoff: cmd.cryptoff,
            cryptsize: cmd.cryptsize,
            cryptid: cmd.cryptid,
        }),
        CommandVariant::EncryptionInfo64(cmd) => Some(EncryptionCommand {
            cmd_offset: lc.offset as u64,
            cryptoff: cmd.cryptoff,
            cryptsize: cmd.cryptsize,
            cryptid: cmd.cryptid,
        }),
        _ => None,
    });

    Ok(SliceInfo {
        cputype: macho.header.cputype,
        cpusubtype: macho.header.cpusubtype,
        file_offset,
        size: bytes.len() as u64,
        is_64: macho.is_64,
        encryption,
    })
}

/// Short architecture name for display
pub fn arch_name(cputype: u32, cpusubtype: u32) -> &'static str {
    match (cputype, cpusubtype & !CPU_SUBTYPE_MASK) {
        (0x0100_000c, 2) => "arm64e",
        (0x0100_000c, _) => "arm64",
        (0x0200_000c, _) => "arm64_32",
        (12, 9) => "armv7",
        (12, 11) => "armv7s",
        (12, _) => "arm",
        (0x0100_0007, _) => "x86_64",
        (7, _) => "i386",
        _ => "unknown",
    }
}

fn read_u32_le(bytes: &[u8], offset: usize) -> Result<u32, MachOError> {
    bytes
        .get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(MachOError::Truncated {
            needed: offset + 4,
            available: bytes.len(),
        })
}

fn read_u32_be(bytes: &[u8], offset: usize) -> Result<u32, MachOError> {
    bytes
        .get(offset..offset + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(MachOError::Truncated {
            needed: offset + 4,
            available: bytes.len(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CPU_ARM64: u32 = 0x0100_000c;
    const LC_UUID: u32 = 0x1b;

    /// Minimal 64-bit image: header, LC_UUID, optional LC_ENCRYPTION_INFO_64
    fn image(encryption: Option<(u32, u32, u32)>) -> Vec<u8> {
        let mut cmds = Vec::new();
        cmds.extend_from_slice(&LC_UUID.to_le_bytes());
        cmds.extend_from_slice(&24u32.to_le_bytes());
        cmds.extend_from_slice(&[0xab; 16]);
        let mut ncmds = 1u32;
        if let Some((cryptoff, cryptsize, cryptid)) = encryption {
            for v in [LC_ENCRYPTION_INFO_64, 24, cryptoff, cryptsize, cryptid, 0] {
                cmds.extend_from_slice(&v.to_le_bytes());
            }
            ncmds += 1;
        }

        let mut out = Vec::new();
        for v in [MH_MAGIC_64, CPU_ARM64, 0, 2, ncmds, cmds.len() as u32, 0, 0] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&cmds);
        out.resize(0x100, 0);
        out
    }

    fn fat_head(arches: &[(u32, u32, u32)]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&FAT_MAGIC.to_be_bytes());
        out.extend_from_slice(&(arches.len() as u32).to_be_bytes());
        for &(cputype, cpusubtype, offset) in arches {
            for v in [cputype, cpusubtype, offset, 0x100, 14] {
                out.extend_from_slice(&v.to_be_bytes());
            }
        }
        out.resize(0x1000, 0);
        out
    }

    #[test]
    fn test_finds_encryption_command() {
        let img = image(Some((0x4000, 0x2000, 1)));
        let cmd = find_encryption_command(&img).unwrap().unwrap();
        assert_eq!(cmd.cmd_offset, (HEADER_SIZE_64 + 24) as u64);
        assert_eq!(cmd.cryptoff, 0x4000);
        assert_eq!(cmd.cryptsize, 0x2000);
        assert!(cmd.is_encrypted());
        assert_eq!(cmd.cryptid_offset(), (HEADER_SIZE_64 + 24 + 16) as u64);
    }

    #[test]
    fn test_image_without_encryption_command() {
        assert_eq!(find_encryption_command(&image(None)).unwrap(), None);
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut img = image(None);
        img[0] = 0;
        assert!(matches!(
            find_encryption_command(&img),
            Err(MachOError::BadMagic(_))
        ));
    }

    #[test]
    fn test_rejects_truncated_commands() {
        let img = image(Some((0x4000, 0x2000, 1)));
        assert!(matches!(
            find_encryption_command(&img[..HEADER_SIZE_64 + 30]),
            Err(MachOError::Truncated { .. })
        ));
    }

    #[test]
    fn test_rejects_zero_cmdsize() {
        let mut img = image(None);
        img[HEADER_SIZE_64 + 4..HEADER_SIZE_64 + 8].copy_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            find_encryption_command(&img),
            Err(MachOError::BadLoadCommand { .. })
        ));
    }

    #[test]
    fn test_thin_file_slice_offset_is_zero() {
        assert_eq!(slice_offset(&image(None), CPU_ARM64, 0).unwrap(), 0);
    }

    #[test]
    fn test_fat_slice_offset_matches_cpu() {
        let head = fat_head(&[(12, 9, 0x4000), (CPU_ARM64, 0, 0x8000)]);
        assert_eq!(slice_offset(&head, CPU_ARM64, 0).unwrap(), 0x8000);
        assert_eq!(slice_offset(&head, 12, 9).unwrap(), 0x4000);
        // capability bits in the running subtype are ignored
        assert_eq!(slice_offset(&head, CPU_ARM64, 0x8000_0000).unwrap(), 0x8000);
    }

    #[test]
    fn test_fat_without_matching_slice() {
        let head = fat_head(&[(12, 9, 0x4000)]);
        assert!(matches!(
            slice_offset(&head, CPU_ARM64, 0),
            Err(MachOError::NoMatchingSlice { .. })
        ));
    }

    #[test]
    fn test_arch_names() {
        assert_eq!(arch_name(CPU_ARM64, 0), "arm64");
        assert_eq!(arch_name(CPU_ARM64, 0x8000_0002), "arm64e");
        assert_eq!(arch_name(12, 11), "armv7s");
    }
}
