//! Bundle completion walker
//!
//! Sends every remaining regular file of the bundle, except the DRM
//! manifest artifacts under `SC_Info/` and anything already transferred.

use std::io;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::core::{BundleRoot, DownloadedSet};
use crate::host::FileSystem;
use crate::transfer::TransferChannel;

static DRM_MANIFEST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bSC_Info/((.+\.s(inf|up[fpx]))|Manifest\.plist)$")
        .expect("DRM manifest pattern is valid")
});

/// Whether a bundle-relative path is a DRM manifest artifact
pub fn is_drm_manifest(relative: &Path) -> bool {
    DRM_MANIFEST.is_match(&relative.to_string_lossy())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkReport {
    pub transferred: usize,
    pub excluded: usize,
    pub already_downloaded: usize,
    /// Contained failures, one line each
    pub errors: Vec<String>,
}

/// Transfer what the capture phase did not, recording each path sent
pub fn complete_bundle<F>(
    fs: &F,
    channel: &mut dyn TransferChannel,
    bundle: &BundleRoot,
    downloaded: &mut DownloadedSet,
) -> WalkReport
where
    F: FileSystem + ?Sized,
{
    let mut report = WalkReport::default();

    for entry in fs.walk(bundle.path()) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("Vanished during walk: {}", e);
                continue;
            }
            Err(e) => {
                log::error!("Walk error under {}: {}", bundle, e);
                report.errors.push(e.to_string());
                continue;
            }
        };

        let relative = bundle.relative(&entry.path).unwrap_or(&entry.path);
        if is_drm_manifest(relative) {
            log::debug!("Excluding {}", relative.display());
            report.excluded += 1;
            continue;
        }

        let path = fs.normalize(&entry.path);
        if downloaded.contains(&path) {
            report.already_downloaded += 1;
            continue;
        }
        // Follows links, so a symlinked directory is skipped too
        if fs.stat(&path).is_directory {
            continue;
        }

        match channel.transfer(&path) {
            Ok(()) => {
                downloaded.insert(path);
                report.transferred += 1;
            }
            Err(e) => {
                log::error!("Failed to transfer {}: {}", path.display(), e);
                report.errors.push(e.to_string());
            }
        }
    }

    log::info!(
        "Bundle walk: {} transferred, {} excluded, {} already sent",
        report.transferred,
        report.excluded,
        report.already_downloaded
    );
    report
}
