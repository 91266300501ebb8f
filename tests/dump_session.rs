//! Integration tests for a dump session against a scripted process
//!
//! Run with: cargo test --test dump_session

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use thaw::host::mock::{MemoryFs, MockProcess};
    use thaw::transfer::{ChannelEvent, RecordingChannel};
    use thaw::{
        DumpOptions, Dumper, EncryptionDescriptor, ModuleOutcome, PatchInstruction, SuspendWindow,
    };

    const ROOT: &str = "/var/containers/Bundle/App";
    const APP: &str = "/var/containers/Bundle/App/App";
    const APP_BASE: u64 = 0x1_0000_0000;

    fn app_descriptor() -> EncryptionDescriptor {
        EncryptionDescriptor {
            region_address: 0x1000,
            region_file_offset: 0x4000,
            region_size: 0x2000,
            descriptor_file_offset: 0x100,
            descriptor_size: 8,
        }
    }

    /// Encrypted `App`, plain `Plain.framework`, plus a system library
    fn process() -> MockProcess {
        let process = MockProcess::new(ROOT);
        process
            .add_module("/usr/lib/libSystem.B.dylib", 0x7000_0000, 0)
            .add_module(APP, APP_BASE, 0)
            .add_module(
                "/var/containers/Bundle/App/Frameworks/Plain.framework/Plain",
                0x2_0000_0000,
                0,
            )
            .map(0x1000, (0..0x2000u32).map(|i| (i % 251) as u8).collect());
        process
    }

    fn bundle_fs() -> MemoryFs {
        let mut fs = MemoryFs::new();
        fs.add_file(APP, vec![0xee; 0x8000])
            .add_file("/var/containers/Bundle/App/Frameworks/Plain.framework/Plain", "plain")
            .add_file("/var/containers/Bundle/App/Info.plist", "plist")
            .add_file("/var/containers/Bundle/App/SC_Info/App.sinf", "sinf")
            .add_file("/var/containers/Bundle/App/SC_Info/App.supp", "supp")
            .add_file("/var/containers/Bundle/App/SC_Info/Manifest.plist", "manifest")
            .add_file("/var/containers/Bundle/App/Assets.car", "assets");
        fs
    }

    fn oracle(base: u64) -> EncryptionDescriptor {
        if base == APP_BASE {
            app_descriptor()
        } else {
            EncryptionDescriptor::NOT_ENCRYPTED
        }
    }

    fn prepared(process: &MockProcess) -> Dumper<MockProcess, MemoryFs> {
        let mut dumper = Dumper::new(process.clone(), bundle_fs());
        dumper.prepare(oracle);
        dumper
    }

    #[test]
    fn test_encrypted_module_yields_replace_and_erase() {
        let process = process();
        let mut channel = RecordingChannel::new();
        let report = prepared(&process)
            .dump(&DumpOptions::new(), &mut channel)
            .unwrap();

        let patches = channel.patches_for(Path::new(APP));
        assert_eq!(patches.len(), 2);
        match patches[0] {
            PatchInstruction::Replace { offset, blob, .. } => {
                assert_eq!(*offset, 0x4000);
                assert_eq!(blob.len(), 0x2000);
                assert_eq!(blob[..4], [0, 1, 2, 3]);
                assert_eq!(blob[251], 0);
            }
            other => panic!("expected replace, got {:?}", other),
        }
        assert_eq!(
            *patches[1],
            PatchInstruction::Erase {
                filename: PathBuf::from(APP),
                offset: 0x100,
                size: 8,
            }
        );
        assert_eq!(report.patches, 2);
        assert_eq!(report.patched(), 1);
    }

    #[test]
    fn test_unencrypted_module_has_no_patches() {
        let process = process();
        let mut channel = RecordingChannel::new();
        let report = prepared(&process)
            .dump(&DumpOptions::new(), &mut channel)
            .unwrap();

        let plain = Path::new("/var/containers/Bundle/App/Frameworks/Plain.framework/Plain");
        assert!(channel.patches_for(plain).is_empty());
        assert!(channel.transfers().contains(&plain));
        assert_eq!(report.modules[1].outcome, ModuleOutcome::Skipped);
    }

    #[test]
    fn test_each_file_sent_once_and_drm_manifest_withheld() {
        let process = process();
        let mut channel = RecordingChannel::new();
        let report = prepared(&process)
            .dump(&DumpOptions::new(), &mut channel)
            .unwrap();

        let mut sent = channel.transfers();
        let count = sent.len();
        sent.sort();
        sent.dedup();
        assert_eq!(sent.len(), count, "a file was transferred twice");

        assert!(!sent.iter().any(|p| p.starts_with("/var/containers/Bundle/App/SC_Info")));
        assert!(!sent.contains(&Path::new("/usr/lib/libSystem.B.dylib")));
        assert!(sent.contains(&Path::new("/var/containers/Bundle/App/Info.plist")));
        assert!(sent.contains(&Path::new("/var/containers/Bundle/App/Assets.car")));

        assert_eq!(report.downloaded.len(), count);
        let walk = report.walk.unwrap();
        assert_eq!(walk.excluded, 3);
        assert_eq!(walk.already_downloaded, 2);
    }

    #[test]
    fn test_modules_precede_walker_files() {
        let process = process();
        let mut channel = RecordingChannel::new();
        prepared(&process)
            .dump(&DumpOptions::new(), &mut channel)
            .unwrap();

        let sent = channel.transfers();
        assert_eq!(sent[0], Path::new(APP));
        assert_eq!(
            sent[1],
            Path::new("/var/containers/Bundle/App/Frameworks/Plain.framework/Plain")
        );
    }

    #[test]
    fn test_executable_only_skips_walker() {
        let process = process();
        let mut channel = RecordingChannel::new();
        let report = prepared(&process)
            .dump(&DumpOptions::new().executable_only(true), &mut channel)
            .unwrap();

        assert!(report.walk.is_none());
        assert_eq!(report.downloaded.len(), 2);
        assert!(report.downloaded.contains(Path::new(APP)));
        assert_eq!(channel.transfers().len(), 2);
    }

    #[test]
    fn test_fault_contained_and_thawed_once() {
        for window in [SuspendWindow::Capture, SuspendWindow::Session] {
            let process = process();
            process
                .add_module("/var/containers/Bundle/App/PlugIns/Ext.appex/Ext", 0x3_0000_0000, 0)
                .fault(0x1800, 0x10);
            let mut channel = RecordingChannel::new();

            let report = prepared(&process)
                .dump(&DumpOptions::new().suspend_window(window), &mut channel)
                .unwrap();

            assert!(matches!(report.modules[0].outcome, ModuleOutcome::Failed(_)));
            assert_eq!(report.modules.len(), 3);
            assert!(channel.patches().is_empty());
            assert!(channel.transfers().contains(&Path::new(APP)));
            assert_eq!(process.suspend_count(), 1, "{:?}", window);
            assert_eq!(process.resume_count(), 1, "{:?}", window);
            assert!(!process.is_frozen());
            assert_eq!(process.thawed_reads(), 0);
        }
    }

    #[test]
    fn test_repeat_dumps_are_identical() {
        let process = process();
        let dumper = prepared(&process);

        let mut first = RecordingChannel::new();
        let mut second = RecordingChannel::new();
        dumper.dump(&DumpOptions::new(), &mut first).unwrap();
        dumper.dump(&DumpOptions::new(), &mut second).unwrap();

        assert_eq!(first.events(), second.events());
        assert_eq!(process.suspend_count(), 2);
        assert_eq!(process.resume_count(), 2);
    }

    #[test]
    fn test_fat_offset_shifts_patches() {
        let process = MockProcess::new(ROOT);
        process
            .add_module(APP, APP_BASE, 0x8000)
            .map(0x1000, vec![0x11; 0x2000]);
        let mut dumper = Dumper::new(process, bundle_fs());
        dumper.prepare(oracle);
        let mut channel = RecordingChannel::new();

        dumper
            .dump(&DumpOptions::new().executable_only(true), &mut channel)
            .unwrap();
        let offsets: Vec<u64> = channel.patches().iter().map(|p| p.offset()).collect();
        assert_eq!(offsets, vec![0xc000, 0x8100]);
    }

    #[test]
    fn test_unprepared_dump_fails_before_suspension() {
        let process = process();
        let dumper = Dumper::new(process.clone(), bundle_fs());
        let mut channel = RecordingChannel::new();

        let err = dumper.dump(&DumpOptions::new(), &mut channel).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert_eq!(process.suspend_count(), 0);
        assert!(channel.events().is_empty());
    }

    #[test]
    fn test_session_starts_with_bundle_root() {
        let process = process();
        let mut channel = RecordingChannel::new();
        prepared(&process)
            .dump(&DumpOptions::new().bundle_root("/var/containers/Bundle/./App"), &mut channel)
            .unwrap();
        assert_eq!(channel.events()[0], ChannelEvent::Begin(PathBuf::from(ROOT)));
    }

    #[test]
    fn test_completion_signal_optional() {
        let process = process();
        let dumper = prepared(&process);
        dumper
            .dump(&DumpOptions::new().signal_completion(false), &mut RecordingChannel::new())
            .unwrap();
        assert_eq!(process.signals(), 0);
        dumper
            .dump(&DumpOptions::new(), &mut RecordingChannel::new())
            .unwrap();
        assert_eq!(process.signals(), 1);
    }
}
