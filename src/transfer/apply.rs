//! Apply - Rebuild a decrypted bundle from a wire stream
//!
//! Downloads become files under `<output>/<bundle name>/`, replace patches
//! overwrite bytes in place and erase patches zero-fill them.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

use super::wire::{FrameError, StreamReader, WireHeader, WireRecord};

/// Errors applying a stream
#[derive(Error, Debug)]
pub enum ApplyError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("Stream does not start with a begin record")]
    MissingBegin,

    #[error("{0} lies outside the dumped bundle")]
    OutsideBundle(PathBuf),

    #[error("Patch for {0}, which was never downloaded")]
    UnknownFile(PathBuf),

    #[error("Patch {offset:#x}+{len:#x} runs past the end of {path} ({file_len:#x} bytes)")]
    OutOfBounds {
        path: PathBuf,
        offset: u64,
        len: u64,
        file_len: u64,
    },

    #[error("Patch for {0} carries neither blob nor size")]
    EmptyPatch(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Summary of an applied stream
#[derive(Debug, Clone, Default)]
pub struct ApplyStats {
    /// Directory the bundle was written to
    pub output: PathBuf,
    pub files: usize,
    pub replaced: usize,
    pub erased: usize,
    pub bytes: u64,
    /// Completion code from the `end` record; `None` if the stream was cut short
    pub code: Option<i32>,
}

struct Materializer {
    out_dir: PathBuf,
    bundle: Option<PathBuf>,
    written: HashMap<PathBuf, PathBuf>,
    stats: ApplyStats,
}

impl Materializer {
    fn new(out_dir: &Path) -> Self {
        Self {
            out_dir: out_dir.to_path_buf(),
            bundle: None,
            written: HashMap::new(),
            stats: ApplyStats::default(),
        }
    }

    fn destination(&self, filename: &Path) -> Result<PathBuf, ApplyError> {
        let bundle = self.bundle.as_ref().ok_or(ApplyError::MissingBegin)?;
        let rel = filename
            .strip_prefix(bundle)
            .map_err(|_| ApplyError::OutsideBundle(filename.to_path_buf()))?;
        if !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(ApplyError::OutsideBundle(filename.to_path_buf()));
        }
        Ok(self.stats.output.join(rel))
    }

    /// Returns false once the `end` record has been seen
    fn apply(&mut self, record: WireRecord) -> Result<bool, ApplyError> {
        match record.header {
            WireHeader::Begin { bundle } => {
                let name = bundle.file_name().map(PathBuf::from).unwrap_or_default();
                self.stats.output = self.out_dir.join(name);
                log::info!("Materializing {} into {}", bundle.display(), self.stats.output.display());
                self.bundle = Some(bundle);
            }
            WireHeader::Download { filename, .. } => {
                let dest = self.destination(&filename)?;
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent).map_err(|source| ApplyError::Io {
                        path: parent.to_path_buf(),
                        source,
                    })?;
                }
                fs::write(&dest, &record.payload).map_err(|source| ApplyError::Io {
                    path: dest.clone(),
                    source,
                })?;
                log::debug!("Wrote {} ({} bytes)", dest.display(), record.payload.len());
                self.stats.files += 1;
                self.stats.bytes += record.payload.len() as u64;
                self.written.insert(filename, dest);
            }
            WireHeader::Patch {
                filename,
                offset,
                blob,
                size,
            } => {
                let dest = self
                    .written
                    .get(&filename)
                    .ok_or_else(|| ApplyError::UnknownFile(filename.clone()))?
                    .clone();
                match (blob, size) {
                    (Some(_), _) => {
                        let len = record.payload.len() as u64;
                        write_at(&dest, offset, len, &record.payload[..])?;
                        self.stats.replaced += 1;
                    }
                    (None, Some(size)) => {
                        write_at(&dest, offset, size, io::repeat(0))?;
                        self.stats.erased += 1;
                    }
                    (None, None) => return Err(ApplyError::EmptyPatch(filename)),
                }
            }
            WireHeader::End { code } => {
                self.stats.code = Some(code);
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Overwrite `len` existing bytes of `path` from `data`; never extends the file
fn write_at<R: Read>(path: &Path, offset: u64, len: u64, data: R) -> Result<(), ApplyError> {
    let io_err = |source| ApplyError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = OpenOptions::new().write(true).open(path).map_err(io_err)?;
    let file_len = file.metadata().map_err(io_err)?.len();
    if offset.checked_add(len).map_or(true, |end| end > file_len) {
        return Err(ApplyError::OutOfBounds {
            path: path.to_path_buf(),
            offset,
            len,
            file_len,
        });
    }
    file.seek(SeekFrom::Start(offset)).map_err(io_err)?;
    io::copy(&mut data.take(len), &mut file).map_err(io_err)?;
    Ok(())
}

/// Materialize the bundle carried by `input` under `out_dir`
pub fn apply_stream<R: BufRead>(input: R, out_dir: &Path) -> Result<ApplyStats, ApplyError> {
    let mut materializer = Materializer::new(out_dir);
    for record in StreamReader::new(input) {
        if !materializer.apply(record?)? {
            break;
        }
    }
    if materializer.stats.code.is_none() {
        log::warn!("Stream ended without an end record");
    }
    Ok(materializer.stats)
}
