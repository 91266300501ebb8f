//! Mock host
//!
//! A scripted process and an in-memory filesystem for exercising the dump
//! engine without a live target.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use super::fs::normalize_lexically;
use super::{FileStat, FileSystem, OpenFlags, ProcessHost, ThreadControl, TreeEntry};
use crate::core::{HostError, MemoryError, ModuleImage, ProcessMemory};

#[derive(Debug, Default)]
struct ProcessState {
    bundle: PathBuf,
    modules: Vec<ModuleImage>,
    slice_offsets: HashMap<u64, u64>,
    regions: Vec<(u64, Vec<u8>)>,
    faults: Vec<(u64, u64)>,
    loadable: HashMap<PathBuf, u64>,
    load_failures: HashSet<PathBuf>,
    opened: Vec<(PathBuf, OpenFlags)>,
    fail_suspend: bool,
    fail_enumeration: bool,
    frozen: bool,
    suspend_count: usize,
    resume_count: usize,
    thawed_reads: usize,
    signals: usize,
}

/// A scripted process. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockProcess {
    state: Arc<Mutex<ProcessState>>,
}

impl MockProcess {
    /// Create a process whose main bundle lives at `bundle`
    pub fn new(bundle: impl Into<PathBuf>) -> Self {
        let process = Self::default();
        process.lock().bundle = bundle.into();
        process
    }

    fn lock(&self) -> MutexGuard<'_, ProcessState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Map an image at `base`, loaded from the slice at `slice_offset`
    pub fn add_module(&self, path: impl Into<PathBuf>, base: u64, slice_offset: u64) -> &Self {
        let mut state = self.lock();
        state.modules.push(ModuleImage::new(path, base));
        state.slice_offsets.insert(base, slice_offset);
        self
    }

    /// Place bytes in memory at `address`
    pub fn map(&self, address: u64, bytes: Vec<u8>) -> &Self {
        self.lock().regions.push((address, bytes));
        self
    }

    /// Make any read overlapping `[address, address + len)` fault
    pub fn fault(&self, address: u64, len: u64) -> &Self {
        self.lock().faults.push((address, len));
        self
    }

    /// Map `path` as a new module at `base` once it is opened
    pub fn loadable(&self, path: impl Into<PathBuf>, base: u64) -> &Self {
        self.lock().loadable.insert(path.into(), base);
        self
    }

    pub fn fail_load(&self, path: impl Into<PathBuf>) -> &Self {
        self.lock().load_failures.insert(path.into());
        self
    }

    pub fn fail_suspend(&self) -> &Self {
        self.lock().fail_suspend = true;
        self
    }

    pub fn fail_enumeration(&self) -> &Self {
        self.lock().fail_enumeration = true;
        self
    }

    pub fn is_frozen(&self) -> bool {
        self.lock().frozen
    }

    pub fn suspend_count(&self) -> usize {
        self.lock().suspend_count
    }

    pub fn resume_count(&self) -> usize {
        self.lock().resume_count
    }

    /// Memory reads performed while the process was not frozen
    pub fn thawed_reads(&self) -> usize {
        self.lock().thawed_reads
    }

    /// Every `open_library` call, in order
    pub fn opened(&self) -> Vec<(PathBuf, OpenFlags)> {
        self.lock().opened.clone()
    }

    pub fn signals(&self) -> usize {
        self.lock().signals
    }
}

impl ProcessMemory for MockProcess {
    fn read_memory(&self, address: u64, size: usize) -> Result<Vec<u8>, MemoryError> {
        let mut state = self.lock();
        if !state.frozen {
            state.thawed_reads += 1;
        }

        let end = address + size as u64;
        if state
            .faults
            .iter()
            .any(|&(start, len)| address < start + len && start < end)
        {
            return Err(MemoryError::AccessDenied { address });
        }

        state
            .regions
            .iter()
            .find(|(start, bytes)| address >= *start && end <= start + bytes.len() as u64)
            .map(|(start, bytes)| {
                let from = (address - start) as usize;
                bytes[from..from + size].to_vec()
            })
            .ok_or(MemoryError::InvalidRegion { address, size })
    }
}

impl ProcessHost for MockProcess {
    fn main_bundle(&self) -> Result<PathBuf, HostError> {
        Ok(self.lock().bundle.clone())
    }

    fn modules(&self) -> Result<Vec<ModuleImage>, HostError> {
        let state = self.lock();
        if state.fail_enumeration {
            return Err(HostError::Enumeration("mock enumeration failure".into()));
        }
        Ok(state.modules.clone())
    }

    fn slice_offset(&self, image: &ModuleImage) -> Result<u64, HostError> {
        self.lock()
            .slice_offsets
            .get(&image.base_address)
            .copied()
            .ok_or_else(|| HostError::SliceNotFound {
                path: image.path.clone(),
                reason: "unknown base address".into(),
            })
    }

    fn open_library(&self, path: &Path, flags: OpenFlags) -> Result<(), HostError> {
        let mut state = self.lock();
        state.opened.push((path.to_path_buf(), flags));
        if state.load_failures.contains(path) {
            return Err(HostError::LoadFailed {
                path: path.to_path_buf(),
                reason: "mock load failure".into(),
            });
        }
        if let Some(base) = state.loadable.remove(path) {
            state.modules.push(ModuleImage::new(path, base));
            state.slice_offsets.insert(base, 0);
        }
        Ok(())
    }

    fn completion_signal(&self) {
        self.lock().signals += 1;
    }
}

impl ThreadControl for MockProcess {
    fn suspend_others(&self) -> Result<(), HostError> {
        let mut state = self.lock();
        if state.fail_suspend {
            return Err(HostError::SuspendFailed("mock suspend failure".into()));
        }
        state.frozen = true;
        state.suspend_count += 1;
        Ok(())
    }

    fn resume_others(&self) -> Result<(), HostError> {
        let mut state = self.lock();
        state.frozen = false;
        state.resume_count += 1;
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File(Vec<u8>),
}

/// An in-memory directory tree
#[derive(Debug, Default)]
pub struct MemoryFs {
    nodes: BTreeMap<PathBuf, Node>,
    broken: HashMap<PathBuf, io::ErrorKind>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a directory and all of its ancestors
    pub fn add_dir(&mut self, path: impl AsRef<Path>) -> &mut Self {
        for ancestor in path.as_ref().ancestors() {
            if ancestor.as_os_str().is_empty() || ancestor == Path::new("/") {
                continue;
            }
            self.nodes.entry(ancestor.to_path_buf()).or_insert(Node::Dir);
        }
        self
    }

    /// Add a file, creating its parent directories
    pub fn add_file(&mut self, path: impl AsRef<Path>, contents: impl Into<Vec<u8>>) -> &mut Self {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            self.add_dir(parent);
        }
        self.nodes
            .insert(path.to_path_buf(), Node::File(contents.into()));
        self
    }

    /// Make listing `path` fail with `kind`
    pub fn break_dir(&mut self, path: impl Into<PathBuf>, kind: io::ErrorKind) -> &mut Self {
        self.broken.insert(path.into(), kind);
        self
    }

    pub fn contents(&self, path: &Path) -> Option<&[u8]> {
        match self.nodes.get(path) {
            Some(Node::File(data)) => Some(data),
            _ => None,
        }
    }

    fn children(&self, path: &Path) -> Vec<PathBuf> {
        self.nodes
            .keys()
            .filter(|p| p.parent() == Some(path))
            .cloned()
            .collect()
    }

    fn walk_into(&self, dir: &Path, out: &mut Vec<io::Result<TreeEntry>>) {
        match self.read_dir(dir) {
            Ok(children) => {
                for child in children {
                    let is_directory = matches!(self.nodes.get(&child), Some(Node::Dir));
                    out.push(Ok(TreeEntry {
                        path: child.clone(),
                        is_directory,
                    }));
                    if is_directory {
                        self.walk_into(&child, out);
                    }
                }
            }
            Err(e) => out.push(Err(e)),
        }
    }
}

impl FileSystem for MemoryFs {
    fn stat(&self, path: &Path) -> FileStat {
        match self.nodes.get(path) {
            Some(Node::Dir) => FileStat {
                exists: true,
                is_directory: true,
            },
            Some(Node::File(_)) => FileStat {
                exists: true,
                is_directory: false,
            },
            None => FileStat::default(),
        }
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.contents(path).map(<[u8]>::to_vec).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{}: no such file", path.display()),
            )
        })
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        if let Some(kind) = self.broken.get(path) {
            return Err(io::Error::new(*kind, format!("{}: mock failure", path.display())));
        }
        match self.nodes.get(path) {
            Some(Node::Dir) => Ok(self.children(path)),
            Some(Node::File(_)) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{}: not a directory", path.display()),
            )),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{}: no such directory", path.display()),
            )),
        }
    }

    fn walk<'a>(&'a self, root: &Path) -> Box<dyn Iterator<Item = io::Result<TreeEntry>> + 'a> {
        let mut out = Vec::new();
        self.walk_into(root, &mut out);
        Box::new(out.into_iter())
    }

    fn normalize(&self, path: &Path) -> PathBuf {
        normalize_lexically(path)
    }
}
