//! Engine module - The dump session
//!
//! A session runs in fixed phases:
//!
//! 1. warmup: load bundled frameworks, re-open mapped images
//! 2. freeze every other thread
//! 3. catalog the images mapped from the bundle
//! 4. capture each image's decrypted region
//! 5. transfer each image and emit its replace/erase patches
//! 6. thaw, then walk the rest of the bundle
//!
//! Where the thaw falls relative to step 5 is set by `SuspendWindow`.

pub mod capture;
pub mod catalog;
pub mod emit;
pub mod warmup;
pub mod walker;

pub use capture::{CaptureOutcome, ModuleCapture};
pub use catalog::list_bundle_modules;
pub use emit::{patches_for, PatchEmitter};
pub use warmup::WarmupReport;
pub use walker::{is_drm_manifest, WalkReport};

use std::path::PathBuf;

use crate::config::{DumpOptions, SuspendWindow};
use crate::core::error::EXIT_OK;
use crate::core::{BundleRoot, DownloadedSet, DumpError};
use crate::host::{FileSystem, FrozenProcess, ProcessHost, ThreadControl};
use crate::oracle::EncryptionOracle;
use crate::transfer::TransferChannel;

/// Final state of one cataloged module
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleOutcome {
    /// Not encrypted; sent as-is
    Skipped,
    /// Sent with replace and erase patches
    Patched { fat_offset: u64, region_size: u64 },
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleReport {
    pub path: PathBuf,
    pub base_address: u64,
    pub outcome: ModuleOutcome,
}

/// Everything a finished session did
#[derive(Debug, Clone)]
pub struct DumpReport {
    pub bundle: BundleRoot,
    pub modules: Vec<ModuleReport>,
    pub patches: usize,
    pub transfers: usize,
    pub warmup: Option<WarmupReport>,
    pub walk: Option<WalkReport>,
    /// Contained failures, in the order they happened
    pub errors: Vec<String>,
    pub downloaded: DownloadedSet,
}

impl DumpReport {
    fn new(bundle: BundleRoot) -> Self {
        Self {
            bundle,
            modules: Vec::new(),
            patches: 0,
            transfers: 0,
            warmup: None,
            walk: None,
            errors: Vec::new(),
            downloaded: DownloadedSet::new(),
        }
    }

    /// Completion code of a session that ran to the end
    pub fn exit_code(&self) -> i32 {
        EXIT_OK
    }

    pub fn patched(&self) -> usize {
        self.count(|o| matches!(o, ModuleOutcome::Patched { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ModuleOutcome::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&ModuleOutcome) -> bool) -> usize {
        self.modules.iter().filter(|m| pred(&m.outcome)).count()
    }
}

/// Dumps the bundle of the process behind `host`
pub struct Dumper<H, F> {
    host: H,
    fs: F,
    oracle: Option<Box<dyn EncryptionOracle>>,
}

impl<H, F> Dumper<H, F>
where
    H: ProcessHost + ThreadControl,
    F: FileSystem,
{
    pub fn new(host: H, fs: F) -> Self {
        Self {
            host,
            fs,
            oracle: None,
        }
    }

    /// Bind the encryption oracle. Required before `dump`.
    pub fn prepare(&mut self, oracle: impl EncryptionOracle + 'static) {
        self.oracle = Some(Box::new(oracle));
    }

    pub fn is_prepared(&self) -> bool {
        self.oracle.is_some()
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Run one session, sending everything through `channel`
    pub fn dump(
        &self,
        options: &DumpOptions,
        channel: &mut dyn TransferChannel,
    ) -> Result<DumpReport, DumpError> {
        let oracle = self.oracle.as_deref().ok_or(DumpError::OracleNotBound)?;

        let bundle_path = match &options.bundle_root {
            Some(path) => path.clone(),
            None => self.host.main_bundle().map_err(DumpError::BundleRoot)?,
        };
        let bundle = BundleRoot::new(self.fs.normalize(&bundle_path));
        log::info!("Dumping {}", bundle);

        let mut report = DumpReport::new(bundle.clone());
        if let Err(e) = channel.begin_session(&bundle) {
            log::error!("Channel refused session start: {}", e);
            report.errors.push(e.to_string());
        }

        if options.warmup {
            let warm = warmup::warm_up(&self.host, &self.fs, &bundle);
            report.errors.extend(warm.errors.iter().cloned());
            report.warmup = Some(warm);
        }

        let frozen = FrozenProcess::freeze(&self.host).map_err(DumpError::Suspend)?;
        let modules =
            list_bundle_modules(&self.host, &self.fs, &bundle).map_err(DumpError::Catalog)?;
        let captures = capture::capture_all(&self.host, oracle, modules);

        let frozen = match options.suspend_window {
            SuspendWindow::Capture => {
                drop(frozen);
                None
            }
            SuspendWindow::Session => Some(frozen),
        };
        for module in captures {
            self.emit_module(module, channel, &mut report);
        }
        drop(frozen);

        if !options.executable_only {
            let walk = walker::complete_bundle(&self.fs, channel, &bundle, &mut report.downloaded);
            report.transfers += walk.transferred;
            report.errors.extend(walk.errors.iter().cloned());
            report.walk = Some(walk);
        }

        if options.signal_completion {
            self.host.completion_signal();
        }

        log::info!(
            "Dump complete: {} module(s), {} patched, {} failed, {} file(s) sent",
            report.modules.len(),
            report.patched(),
            report.failed(),
            report.transfers
        );
        Ok(report)
    }

    /// Transfer one module's file, then its patches
    fn emit_module(
        &self,
        module: ModuleCapture,
        channel: &mut dyn TransferChannel,
        report: &mut DumpReport,
    ) {
        let ModuleCapture { image, outcome } = module;

        let mut transferred = true;
        if report.downloaded.insert(image.path.clone()) {
            match channel.transfer(&image.path) {
                Ok(()) => report.transfers += 1,
                Err(e) => {
                    log::error!("Failed to transfer {}: {}", image.path.display(), e);
                    report.errors.push(e.to_string());
                    transferred = false;
                }
            }
        }

        let outcome = match outcome {
            CaptureOutcome::Skipped => ModuleOutcome::Skipped,
            CaptureOutcome::Failed(reason) => {
                report.errors.push(format!("{}: {}", image.path.display(), reason));
                ModuleOutcome::Failed(reason)
            }
            CaptureOutcome::Captured { .. } if !transferred => {
                ModuleOutcome::Failed("file transfer failed".into())
            }
            CaptureOutcome::Captured {
                fat_offset,
                descriptor,
                blob,
            } => {
                let patches = patches_for(&image.path, fat_offset, &descriptor, blob);
                let mut emitter = PatchEmitter::new(&mut *channel);
                let result = emitter.emit_all(&patches);
                report.patches += emitter.sent();
                match result {
                    Ok(()) => ModuleOutcome::Patched {
                        fat_offset,
                        region_size: descriptor.region_size,
                    },
                    Err(e) => {
                        log::error!("Failed to emit patches for {}: {}", image.path.display(), e);
                        report.errors.push(e.to_string());
                        ModuleOutcome::Failed(e.to_string())
                    }
                }
            }
        };

        report.modules.push(ModuleReport {
            path: image.path,
            base_address: image.base_address,
            outcome,
        });
    }
}
