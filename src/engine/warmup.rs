//! Framework warmup
//!
//! Loads every framework shipped inside the bundle, then re-opens each
//! mapped image with global lazy binding so their pages are resident and
//! decrypted before the catalog is taken.

use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::core::BundleRoot;
use crate::host::{FileSystem, OpenFlags, ProcessHost};

const FRAMEWORKS_DIR: &str = "Frameworks";

/// Where a bundle keeps its Info.plist: flat (iOS) or versioned (macOS)
const INFO_PLISTS: [&str; 2] = ["Info.plist", "Resources/Info.plist"];

#[derive(Debug, Deserialize)]
struct BundleInfo {
    #[serde(rename = "CFBundleExecutable")]
    executable: Option<String>,
}

/// Executable of the bundle at `dir`, named by `CFBundleExecutable`.
/// Falls back to the directory stem when no Info.plist names one.
fn bundle_executable<F>(fs: &F, dir: &Path) -> Option<PathBuf>
where
    F: FileSystem + ?Sized,
{
    for name in INFO_PLISTS {
        let info = dir.join(name);
        let Ok(data) = fs.read(&info) else { continue };
        match plist::from_bytes::<BundleInfo>(&data) {
            Ok(BundleInfo {
                executable: Some(executable),
            }) => return Some(dir.join(executable)),
            Ok(_) => break,
            Err(e) => {
                log::warn!("Unreadable {}: {}", info.display(), e);
                break;
            }
        }
    }
    dir.file_stem().map(|stem| dir.join(stem))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarmupReport {
    pub frameworks_loaded: usize,
    pub modules_reopened: usize,
    /// Contained failures, one line each
    pub errors: Vec<String>,
}

/// Run both warmup passes. Never fails; problems land in the report.
pub fn warm_up<H, F>(host: &H, fs: &F, bundle: &BundleRoot) -> WarmupReport
where
    H: ProcessHost + ?Sized,
    F: FileSystem + ?Sized,
{
    let mut report = WarmupReport::default();
    load_frameworks(host, fs, bundle.path(), &mut report);

    match host.modules() {
        Ok(modules) => {
            for module in modules {
                match host.open_library(&module.path, OpenFlags::GLOBAL_LAZY) {
                    Ok(()) => report.modules_reopened += 1,
                    Err(e) => {
                        log::warn!("{}", e);
                        report.errors.push(e.to_string());
                    }
                }
            }
        }
        Err(e) => {
            log::warn!("Skipping module reopen: {}", e);
            report.errors.push(e.to_string());
        }
    }

    log::info!(
        "Warmup loaded {} framework(s), reopened {} module(s)",
        report.frameworks_loaded,
        report.modules_reopened
    );
    report
}

/// Load each bundle under `<dir>/Frameworks` and recurse into it
fn load_frameworks<H, F>(host: &H, fs: &F, dir: &Path, report: &mut WarmupReport)
where
    H: ProcessHost + ?Sized,
    F: FileSystem + ?Sized,
{
    let frameworks = dir.join(FRAMEWORKS_DIR);
    let children = match fs.read_dir(&frameworks) {
        Ok(children) => children,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return,
        Err(e) => {
            log::error!("Failed to list {}: {}", frameworks.display(), e);
            report
                .errors
                .push(format!("{}: {}", frameworks.display(), e));
            return;
        }
    };

    for child in children {
        if !fs.stat(&child).is_directory {
            continue;
        }
        if let Some(executable) = bundle_executable(fs, &child) {
            if fs.stat(&executable).exists {
                match host.open_library(&executable, OpenFlags::GLOBAL_LAZY) {
                    Ok(()) => {
                        log::debug!("Loaded {}", executable.display());
                        report.frameworks_loaded += 1;
                    }
                    Err(e) => {
                        log::warn!("{}", e);
                        report.errors.push(e.to_string());
                    }
                }
            }
        }
        load_frameworks(host, fs, &child, report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::mock::{MemoryFs, MockProcess};
    use std::path::PathBuf;

    #[test]
    fn test_loads_nested_frameworks_then_reopens() {
        let mut fs = MemoryFs::new();
        fs.add_file("/b/App", "exe")
            .add_file("/b/Frameworks/A.framework/A", "a")
            .add_file("/b/Frameworks/A.framework/Frameworks/B.framework/B", "b")
            .add_file("/b/Frameworks/libswiftCore.dylib", "dylib");

        let process = MockProcess::new("/b");
        process
            .add_module("/b/App", 0x1000, 0)
            .loadable("/b/Frameworks/A.framework/A", 0x2000);

        let report = warm_up(&process, &fs, &BundleRoot::new("/b"));
        assert_eq!(report.frameworks_loaded, 2);
        assert_eq!(report.modules_reopened, 2);
        assert!(report.errors.is_empty());

        let opened: Vec<PathBuf> = process.opened().into_iter().map(|(p, _)| p).collect();
        assert_eq!(
            opened,
            vec![
                PathBuf::from("/b/Frameworks/A.framework/A"),
                PathBuf::from("/b/Frameworks/A.framework/Frameworks/B.framework/B"),
                PathBuf::from("/b/App"),
                PathBuf::from("/b/Frameworks/A.framework/A"),
            ]
        );
        assert!(process
            .opened()
            .iter()
            .all(|(_, flags)| *flags == OpenFlags::GLOBAL_LAZY));
    }

    #[test]
    fn test_executable_named_by_info_plist() {
        let mut fs = MemoryFs::new();
        fs.add_file(
            "/b/Frameworks/Kit.framework/Info.plist",
            r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0"><dict>
<key>CFBundleExecutable</key><string>KitCore</string>
</dict></plist>"#,
        )
        .add_file("/b/Frameworks/Kit.framework/KitCore", "kit")
        .add_file(
            "/b/Frameworks/Mac.framework/Resources/Info.plist",
            r#"<plist version="1.0"><dict><key>CFBundleExecutable</key><string>MacMain</string></dict></plist>"#,
        )
        .add_file("/b/Frameworks/Mac.framework/MacMain", "mac");

        let process = MockProcess::new("/b");
        let report = warm_up(&process, &fs, &BundleRoot::new("/b"));

        assert_eq!(report.frameworks_loaded, 2);
        let opened: Vec<PathBuf> = process.opened().into_iter().map(|(p, _)| p).collect();
        assert_eq!(
            opened,
            vec![
                PathBuf::from("/b/Frameworks/Kit.framework/KitCore"),
                PathBuf::from("/b/Frameworks/Mac.framework/MacMain"),
            ]
        );
    }

    #[test]
    fn test_info_plist_without_executable_uses_stem() {
        let mut fs = MemoryFs::new();
        fs.add_file(
            "/b/Frameworks/A.framework/Info.plist",
            r#"<plist version="1.0"><dict><key>CFBundleName</key><string>A</string></dict></plist>"#,
        )
        .add_file("/b/Frameworks/A.framework/A", "a");
        assert_eq!(
            bundle_executable(&fs, Path::new("/b/Frameworks/A.framework")),
            Some(PathBuf::from("/b/Frameworks/A.framework/A"))
        );
    }

    #[test]
    fn test_missing_frameworks_dir_is_silent() {
        let mut fs = MemoryFs::new();
        fs.add_file("/b/App", "exe");
        let process = MockProcess::new("/b");
        let report = warm_up(&process, &fs, &BundleRoot::new("/b"));
        assert!(report.errors.is_empty());
        assert_eq!(report.frameworks_loaded, 0);
    }

    #[test]
    fn test_unreadable_branch_abandoned() {
        let mut fs = MemoryFs::new();
        fs.add_file("/b/Frameworks/A.framework/A", "a")
            .add_file("/b/Frameworks/A.framework/Frameworks/B.framework/B", "b")
            .add_file("/b/Frameworks/C.framework/C", "c")
            .break_dir("/b/Frameworks/A.framework/Frameworks", io::ErrorKind::PermissionDenied);

        let process = MockProcess::new("/b");
        process.fail_load("/b/Frameworks/C.framework/C");
        let report = warm_up(&process, &fs, &BundleRoot::new("/b"));

        assert_eq!(report.frameworks_loaded, 1);
        assert_eq!(report.errors.len(), 2);
        assert!(!process
            .opened()
            .iter()
            .any(|(p, _)| p.ends_with("B.framework/B")));
    }
}
