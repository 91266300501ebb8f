//! In-memory channel that records every event

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::TransferChannel;
use crate::core::{BundleRoot, PatchInstruction, TransferError};

/// One thing sent through a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Begin(PathBuf),
    Transfer(PathBuf),
    Patch(PatchInstruction),
}

/// Records events instead of sending them anywhere
#[derive(Debug, Default)]
pub struct RecordingChannel {
    events: Vec<ChannelEvent>,
    reject: HashSet<PathBuf>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any transfer of `path`
    pub fn reject(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.reject.insert(path.into());
        self
    }

    pub fn events(&self) -> &[ChannelEvent] {
        &self.events
    }

    /// Paths transferred, in order
    pub fn transfers(&self) -> Vec<&Path> {
        self.events
            .iter()
            .filter_map(|e| match e {
                ChannelEvent::Transfer(p) => Some(p.as_path()),
                _ => None,
            })
            .collect()
    }

    /// Patches sent, in order
    pub fn patches(&self) -> Vec<&PatchInstruction> {
        self.events
            .iter()
            .filter_map(|e| match e {
                ChannelEvent::Patch(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    /// Patches that target `filename`
    pub fn patches_for(&self, filename: &Path) -> Vec<&PatchInstruction> {
        self.patches()
            .into_iter()
            .filter(|p| p.filename() == filename)
            .collect()
    }
}

impl TransferChannel for RecordingChannel {
    fn begin_session(&mut self, bundle: &BundleRoot) -> Result<(), TransferError> {
        self.events.push(ChannelEvent::Begin(bundle.path().to_path_buf()));
        Ok(())
    }

    fn transfer(&mut self, path: &Path) -> Result<(), TransferError> {
        if self.reject.contains(path) {
            return Err(TransferError::Rejected(path.display().to_string()));
        }
        self.events.push(ChannelEvent::Transfer(path.to_path_buf()));
        Ok(())
    }

    fn send_patch(&mut self, patch: &PatchInstruction) -> Result<(), TransferError> {
        self.events.push(ChannelEvent::Patch(patch.clone()));
        Ok(())
    }
}
