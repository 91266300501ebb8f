//! Transfer module - Where captured bytes go
//!
//! The engine hands whole files and patch instructions to a
//! `TransferChannel` one at a time, in session order.
//!
//! - `wire`: framed stream format, writer and reader
//! - `apply`: rebuilds a decrypted bundle from a stream
//! - `recording`: keeps every event in memory

pub mod apply;
pub mod recording;
pub mod wire;

pub use apply::{apply_stream, ApplyError, ApplyStats};
pub use recording::{ChannelEvent, RecordingChannel};
pub use wire::{FrameError, StreamChannel, StreamReader, WireHeader, WireRecord};

use std::path::Path;

use crate::core::{BundleRoot, PatchInstruction, TransferError};

/// Sink for session output
pub trait TransferChannel {
    /// Called once the bundle root is known, before anything is sent
    fn begin_session(&mut self, _bundle: &BundleRoot) -> Result<(), TransferError> {
        Ok(())
    }

    /// Send the file at `path` verbatim
    fn transfer(&mut self, path: &Path) -> Result<(), TransferError>;

    /// Send one patch instruction
    fn send_patch(&mut self, patch: &PatchInstruction) -> Result<(), TransferError>;
}

impl<T: TransferChannel + ?Sized> TransferChannel for &mut T {
    fn begin_session(&mut self, bundle: &BundleRoot) -> Result<(), TransferError> {
        (**self).begin_session(bundle)
    }

    fn transfer(&mut self, path: &Path) -> Result<(), TransferError> {
        (**self).transfer(path)
    }

    fn send_patch(&mut self, patch: &PatchInstruction) -> Result<(), TransferError> {
        (**self).send_patch(patch)
    }
}
