//! Wire stream - JSON header lines with raw payloads
//!
//! Every record is one line of JSON tagged by `subject`, followed by the
//! number of raw bytes its header announces:
//!
//! ```text
//! {"subject":"begin","bundle":"/var/containers/Bundle/App"}
//! {"subject":"download","filename":".../App","size":N}   + N bytes
//! {"subject":"patch","filename":".../App","offset":O,"blob":N} + N bytes
//! {"subject":"patch","filename":".../App","offset":O,"size":N}
//! {"subject":"end","code":0}
//! ```

use std::fs;
use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::TransferChannel;
use crate::core::{BundleRoot, PatchInstruction, TransferError};

/// Header line of a stream record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "subject", rename_all = "lowercase")]
pub enum WireHeader {
    Begin {
        bundle: PathBuf,
    },
    Download {
        filename: PathBuf,
        size: u64,
    },
    Patch {
        filename: PathBuf,
        offset: u64,
        /// Length of the replacement payload that follows
        #[serde(default, skip_serializing_if = "Option::is_none")]
        blob: Option<u64>,
        /// Length of the zero-filled range
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<u64>,
    },
    End {
        code: i32,
    },
}

impl WireHeader {
    /// Raw bytes following this header
    pub fn payload_len(&self) -> u64 {
        match self {
            Self::Download { size, .. } => *size,
            Self::Patch { blob: Some(n), .. } => *n,
            _ => 0,
        }
    }
}

impl From<&PatchInstruction> for WireHeader {
    fn from(patch: &PatchInstruction) -> Self {
        match patch {
            PatchInstruction::Replace {
                filename,
                offset,
                blob,
            } => Self::Patch {
                filename: filename.clone(),
                offset: *offset,
                blob: Some(blob.len() as u64),
                size: None,
            },
            PatchInstruction::Erase {
                filename,
                offset,
                size,
            } => Self::Patch {
                filename: filename.clone(),
                offset: *offset,
                blob: None,
                size: Some(*size),
            },
        }
    }
}

/// Writes a session as a wire stream
pub struct StreamChannel<W: Write> {
    out: W,
    records: usize,
}

impl<W: Write> StreamChannel<W> {
    pub fn new(out: W) -> Self {
        Self { out, records: 0 }
    }

    /// Records written so far
    pub fn records(&self) -> usize {
        self.records
    }

    fn write_header(&mut self, header: &WireHeader) -> Result<(), TransferError> {
        serde_json::to_writer(&mut self.out, header)?;
        self.out.write_all(b"\n")?;
        self.records += 1;
        Ok(())
    }

    /// Write the `end` record and hand back the writer
    pub fn finish(mut self, code: i32) -> Result<W, TransferError> {
        self.write_header(&WireHeader::End { code })?;
        self.out.flush()?;
        Ok(self.out)
    }
}

impl<W: Write> TransferChannel for StreamChannel<W> {
    fn begin_session(&mut self, bundle: &BundleRoot) -> Result<(), TransferError> {
        self.write_header(&WireHeader::Begin {
            bundle: bundle.path().to_path_buf(),
        })
    }

    fn transfer(&mut self, path: &Path) -> Result<(), TransferError> {
        // Read whole before framing so a failed read never leaves a header behind
        let data = fs::read(path).map_err(|source| TransferError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        self.write_header(&WireHeader::Download {
            filename: path.to_path_buf(),
            size: data.len() as u64,
        })?;
        self.out.write_all(&data)?;
        log::debug!("Sent {} ({} bytes)", path.display(), data.len());
        Ok(())
    }

    fn send_patch(&mut self, patch: &PatchInstruction) -> Result<(), TransferError> {
        self.write_header(&WireHeader::from(patch))?;
        if let PatchInstruction::Replace { blob, .. } = patch {
            self.out.write_all(blob)?;
        }
        Ok(())
    }
}

/// Errors decoding a wire stream
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("I/O error reading stream: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed header in record {index}: {source}")]
    Header {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Record {index} ended after {got} of {expected} payload bytes")]
    ShortPayload { index: usize, expected: u64, got: u64 },
}

/// A decoded record: header plus its payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireRecord {
    pub header: WireHeader,
    pub payload: Vec<u8>,
}

/// Reads records back out of a wire stream
pub struct StreamReader<R: BufRead> {
    input: R,
    index: usize,
}

impl<R: BufRead> StreamReader<R> {
    pub fn new(input: R) -> Self {
        Self { input, index: 0 }
    }

    /// Next record, or `None` at a clean end of input
    pub fn next_record(&mut self) -> Result<Option<WireRecord>, FrameError> {
        let mut line = Vec::new();
        if self.input.read_until(b'\n', &mut line)? == 0 {
            return Ok(None);
        }
        let index = self.index;
        self.index += 1;

        let header: WireHeader =
            serde_json::from_slice(&line).map_err(|source| FrameError::Header { index, source })?;

        let expected = header.payload_len();
        let mut payload = Vec::new();
        let got = (&mut self.input).take(expected).read_to_end(&mut payload)? as u64;
        if got != expected {
            return Err(FrameError::ShortPayload {
                index,
                expected,
                got,
            });
        }
        Ok(Some(WireRecord { header, payload }))
    }
}

impl<R: BufRead> Iterator for StreamReader<R> {
    type Item = Result<WireRecord, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
