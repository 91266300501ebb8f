//! Filesystem access backed by std and walkdir

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use super::{FileStat, FileSystem, TreeEntry};

/// The real filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFileSystem;

impl FileSystem for StdFileSystem {
    fn stat(&self, path: &Path) -> FileStat {
        match fs::metadata(path) {
            Ok(meta) => FileStat {
                exists: true,
                is_directory: meta.is_dir(),
            },
            Err(_) => FileStat::default(),
        }
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut children = fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<io::Result<Vec<_>>>()?;
        children.sort();
        Ok(children)
    }

    fn walk<'a>(&'a self, root: &Path) -> Box<dyn Iterator<Item = io::Result<TreeEntry>> + 'a> {
        let iter = WalkDir::new(root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .map(|entry| {
                entry.map_err(io::Error::from).map(|e| TreeEntry {
                    is_directory: e.file_type().is_dir(),
                    path: e.into_path(),
                })
            });
        Box::new(iter)
    }

    fn normalize(&self, path: &Path) -> PathBuf {
        fs::canonicalize(path).unwrap_or_else(|_| normalize_lexically(path))
    }
}

/// Resolve `.` and `..` components without touching the filesystem
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}
