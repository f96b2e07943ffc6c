//! Cached, path-indexed view of one directory tree.
//!
//! An `FsTree` mirrors a directory root as an arena of nodes. Children
//! are populated lazily from disk on first access, one level at a time;
//! parent links are arena indices, never owning references.
//!
//! The tree doubles as the dry-run overlay: with `what_if` enabled no
//! mutator touches the disk, but the in-memory tree is updated as if the
//! change had succeeded, so a dry run plans and classifies exactly like
//! the real run that would follow.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{trace, warn};

use super::entry::{EntryData, FsEntry, Timestamp};
use super::path::{CaseSensitivity, SyncPath};

/// How much of the tree `get_entries` should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryScope {
    /// Direct children of the root only.
    TopOnly,
    /// The whole tree, loading it if necessary.
    All,
}

#[derive(Error, Debug)]
pub enum FsError {
    #[error("path '{}' is outside the tree root", path.display())]
    PathOutsideRoot { path: PathBuf },

    #[error("'{path}' not found")]
    NotFound { path: SyncPath },

    #[error("'{path}' is not a file")]
    NotAFile { path: SyncPath },

    #[error("'{path}' is not a directory")]
    NotADirectory { path: SyncPath },

    #[error("'{path}' already exists")]
    AlreadyExists { path: SyncPath },

    #[error("directory '{path}' is not empty")]
    DirectoryNotEmpty { path: SyncPath },

    #[error("parent directory of '{path}' is missing")]
    MissingParent { path: SyncPath },

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FsError {
    fn io(path: &Path, source: io::Error) -> Self {
        FsError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

struct Node {
    /// Final path component; empty for the root.
    name: String,
    parent: Option<usize>,
    data: EntryData,
    /// Folded child name -> arena index. Only directories have children;
    /// keying by the folded name makes duplicate siblings under the case
    /// rule unrepresentable.
    children: BTreeMap<String, usize>,
    loaded: bool,
    loaded_deep: bool,
}

impl Node {
    fn is_dir(&self) -> bool {
        matches!(self.data, EntryData::Directory { .. })
    }
}

const ROOT: usize = 0;

/// Cached view of one directory tree, rooted at an absolute path.
pub struct FsTree {
    root_path: PathBuf,
    case: CaseSensitivity,
    what_if: bool,
    nodes: Vec<Option<Node>>,
}

impl FsTree {
    /// Open a tree rooted at `path`, which must be an existing directory.
    pub fn new_root(path: &Path, case: CaseSensitivity, what_if: bool) -> Result<Self, FsError> {
        let metadata = fs::metadata(path).map_err(|e| FsError::io(path, e))?;
        if !metadata.is_dir() {
            return Err(FsError::NotADirectory {
                path: SyncPath::root(),
            });
        }
        Ok(FsTree {
            root_path: path.to_path_buf(),
            case,
            what_if,
            nodes: vec![Some(Node {
                name: String::new(),
                parent: None,
                data: EntryData::from_metadata(&metadata),
                children: BTreeMap::new(),
                loaded: false,
                loaded_deep: false,
            })],
        })
    }

    #[inline]
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    #[inline]
    pub fn case(&self) -> CaseSensitivity {
        self.case
    }

    #[inline]
    pub fn is_what_if(&self) -> bool {
        self.what_if
    }

    /// Absolute location of a universal relative path under this root.
    pub fn abs_path(&self, path: &SyncPath) -> PathBuf {
        path.to_path(&self.root_path)
    }

    /// Canonicalize an externally supplied path into universal form.
    ///
    /// Absolute paths must lie under the root (the root prefix is
    /// stripped); anything escaping the root is rejected.
    pub fn normalize(&self, raw: &Path) -> Result<SyncPath, FsError> {
        let outside = || FsError::PathOutsideRoot {
            path: raw.to_path_buf(),
        };
        let relative = if raw.is_absolute() {
            let stripped = raw.strip_prefix(&self.root_path).map_err(|_| outside())?;
            SyncPath::new(stripped.to_string_lossy())
        } else {
            SyncPath::new(raw.to_string_lossy())
        };
        if relative.components().next() == Some("..") {
            return Err(outside());
        }
        Ok(relative)
    }

    /// Look up a cached entry, loading directory levels on demand.
    ///
    /// Accepts absolute paths under the root as well as relative
    /// universal paths. Returns `None` when no such entry exists.
    pub fn try_get_entry(&mut self, path: impl AsRef<Path>) -> Result<Option<FsEntry>, FsError> {
        let relative = self.normalize(path.as_ref())?;
        Ok(self.resolve(&relative)?.map(|idx| self.snapshot(idx)))
    }

    /// Enumerate entries under the root, in deterministic sibling order.
    pub fn get_entries(&mut self, scope: EntryScope) -> Result<Vec<FsEntry>, FsError> {
        match scope {
            EntryScope::TopOnly => self.ensure_loaded(ROOT)?,
            EntryScope::All => self.ensure_loaded_deep(ROOT)?,
        }
        let mut out = Vec::new();
        self.collect(ROOT, scope, &mut out);
        Ok(out)
    }

    fn collect(&self, idx: usize, scope: EntryScope, out: &mut Vec<FsEntry>) {
        let node = self.node(idx);
        for &child in node.children.values() {
            out.push(self.snapshot(child));
            if scope == EntryScope::All && self.node(child).is_dir() {
                self.collect(child, scope, out);
            }
        }
    }

    /// Re-stat one path and replace or drop the cached entry.
    ///
    /// Used after the executor mutates the disk. In what-if mode the
    /// disk is not consulted: the ghost state is already authoritative.
    pub fn refresh_entry(&mut self, path: &SyncPath) -> Result<Option<FsEntry>, FsError> {
        if self.what_if {
            return Ok(self.resolve(path)?.map(|idx| self.snapshot(idx)));
        }

        let abs = self.abs_path(path);
        match fs::metadata(&abs) {
            Ok(metadata) => {
                let data = EntryData::from_metadata(&metadata);
                let idx = self.attach(path, data)?;
                Ok(Some(self.snapshot(idx)))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if let Some(idx) = self.resolve(path)? {
                    self.detach(idx);
                }
                Ok(None)
            }
            Err(e) => Err(FsError::io(&abs, e)),
        }
    }

    /// Move an entry to a new path.
    ///
    /// Fails if the destination already exists (other than as the source
    /// itself under a different case) or its parent directory is missing.
    pub fn move_file(&mut self, src: &SyncPath, dest: &SyncPath) -> Result<FsEntry, FsError> {
        let src_idx = self.resolve(src)?.ok_or_else(|| FsError::NotFound {
            path: src.clone(),
        })?;
        if let Some(existing) = self.resolve(dest)? {
            if existing != src_idx {
                return Err(FsError::AlreadyExists { path: dest.clone() });
            }
        }
        let dest_parent = dest.parent().ok_or_else(|| FsError::MissingParent {
            path: dest.clone(),
        })?;
        let parent_idx = self
            .resolve(&dest_parent)?
            .filter(|&i| self.node(i).is_dir())
            .ok_or_else(|| FsError::MissingParent { path: dest.clone() })?;
        let dest_name = dest
            .file_name()
            .ok_or_else(|| FsError::MissingParent { path: dest.clone() })?
            .to_string();

        if !self.what_if {
            let abs_src = self.abs_path(src);
            let abs_dest = self.abs_path(dest);
            fs::rename(&abs_src, &abs_dest).map_err(|e| FsError::io(&abs_src, e))?;
        }

        if let Some(old_parent) = self.node(src_idx).parent {
            let key = self.case.fold(&self.node(src_idx).name);
            self.node_mut(old_parent).children.remove(&key);
        }
        let folded = self.case.fold(&dest_name);
        {
            let node = self.node_mut(src_idx);
            node.name = dest_name;
            node.parent = Some(parent_idx);
        }
        self.node_mut(parent_idx).children.insert(folded, src_idx);

        trace!(from = %src, to = %dest, what_if = self.what_if, "moved entry");
        Ok(self.snapshot(src_idx))
    }

    /// Delete a file entry.
    pub fn delete_file(&mut self, path: &SyncPath) -> Result<(), FsError> {
        let idx = self.resolve(path)?.ok_or_else(|| FsError::NotFound {
            path: path.clone(),
        })?;
        if self.node(idx).is_dir() {
            return Err(FsError::NotAFile { path: path.clone() });
        }
        if !self.what_if {
            let abs = self.abs_path(path);
            fs::remove_file(&abs).map_err(|e| FsError::io(&abs, e))?;
        }
        self.detach(idx);
        trace!(%path, what_if = self.what_if, "deleted file");
        Ok(())
    }

    /// Delete a directory entry. Non-recursive deletion fails on a
    /// non-empty directory.
    pub fn delete_directory(&mut self, path: &SyncPath, recursive: bool) -> Result<(), FsError> {
        let idx = self.resolve(path)?.ok_or_else(|| FsError::NotFound {
            path: path.clone(),
        })?;
        if !self.node(idx).is_dir() {
            return Err(FsError::NotADirectory { path: path.clone() });
        }
        if !recursive {
            self.ensure_loaded(idx)?;
            if !self.node(idx).children.is_empty() {
                return Err(FsError::DirectoryNotEmpty { path: path.clone() });
            }
        }
        if !self.what_if {
            let abs = self.abs_path(path);
            let result = if recursive {
                fs::remove_dir_all(&abs)
            } else {
                fs::remove_dir(&abs)
            };
            result.map_err(|e| FsError::io(&abs, e))?;
        }
        self.detach(idx);
        trace!(%path, recursive, what_if = self.what_if, "deleted directory");
        Ok(())
    }

    /// Create a directory entry. In what-if mode only the tree changes.
    pub fn create_directory(&mut self, path: &SyncPath) -> Result<FsEntry, FsError> {
        if self.resolve(path)?.is_some() {
            return Err(FsError::AlreadyExists { path: path.clone() });
        }
        if self.what_if {
            return self.insert_ghost(
                path,
                EntryData::Directory {
                    modified: Timestamp::now(),
                },
            );
        }
        let abs = self.abs_path(path);
        fs::create_dir(&abs).map_err(|e| FsError::io(&abs, e))?;
        let metadata = fs::metadata(&abs).map_err(|e| FsError::io(&abs, e))?;
        let idx = self.attach(path, EntryData::from_metadata(&metadata))?;
        Ok(self.snapshot(idx))
    }

    /// Insert a ghost file entry with the given length and the current
    /// time as its last-write time, without touching the disk.
    ///
    /// An existing entry at the path is replaced in place, mirroring an
    /// overwrite.
    pub fn what_if_add_file(&mut self, path: &SyncPath, len: u64) -> Result<FsEntry, FsError> {
        let data = EntryData::File {
            modified: Timestamp::now(),
            len,
        };
        if let Some(idx) = self.resolve(path)? {
            self.node_mut(idx).data = data;
            return Ok(self.snapshot(idx));
        }
        self.insert_ghost(path, data)
    }

    /// Discard all cached children and revert the load flags.
    pub fn reset(&mut self) -> Result<(), FsError> {
        let metadata =
            fs::metadata(&self.root_path).map_err(|e| FsError::io(&self.root_path, e))?;
        self.nodes.truncate(1);
        let root = self.node_mut(ROOT);
        root.children.clear();
        root.loaded = false;
        root.loaded_deep = false;
        root.data = EntryData::from_metadata(&metadata);
        Ok(())
    }

    // ==================== internals ====================

    fn node(&self, idx: usize) -> &Node {
        self.nodes[idx]
            .as_ref()
            .unwrap_or_else(|| unreachable!("dangling arena index {idx}"))
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node {
        self.nodes[idx]
            .as_mut()
            .unwrap_or_else(|| unreachable!("dangling arena index {idx}"))
    }

    fn path_of(&self, idx: usize) -> SyncPath {
        let mut names = Vec::new();
        let mut cursor = Some(idx);
        while let Some(i) = cursor {
            let node = self.node(i);
            if !node.name.is_empty() {
                names.push(node.name.as_str());
            }
            cursor = node.parent;
        }
        names.reverse();
        SyncPath::new(names.join("/"))
    }

    fn snapshot(&self, idx: usize) -> FsEntry {
        FsEntry::new(self.path_of(idx), self.node(idx).data.clone())
    }

    /// Walk the path down from the root, loading levels as needed.
    fn resolve(&mut self, path: &SyncPath) -> Result<Option<usize>, FsError> {
        let mut idx = ROOT;
        for component in path.components() {
            if !self.node(idx).is_dir() {
                return Ok(None);
            }
            self.ensure_loaded(idx)?;
            let key = self.case.fold(component);
            match self.node(idx).children.get(&key) {
                Some(&child) => idx = child,
                None => return Ok(None),
            }
        }
        Ok(Some(idx))
    }

    /// Populate one directory level from disk.
    ///
    /// Entries already present in memory win: in what-if mode they are
    /// ghosts of simulated mutations and must not be clobbered.
    fn ensure_loaded(&mut self, idx: usize) -> Result<(), FsError> {
        if self.node(idx).loaded || !self.node(idx).is_dir() {
            return Ok(());
        }
        let dir_path = self.abs_path(&self.path_of(idx));
        let reader = fs::read_dir(&dir_path).map_err(|e| FsError::io(&dir_path, e))?;
        for dirent in reader {
            let dirent = dirent.map_err(|e| FsError::io(&dir_path, e))?;
            let name = match dirent.file_name().into_string() {
                Ok(name) => name,
                Err(_) => {
                    warn!(dir = %dir_path.display(), "skipping entry with non-UTF-8 name");
                    continue;
                }
            };
            let key = self.case.fold(&name);
            if self.node(idx).children.contains_key(&key) {
                continue;
            }
            let metadata = match fs::metadata(dirent.path()) {
                Ok(m) => m,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(FsError::io(&dirent.path(), e)),
            };
            self.insert_child(idx, name, EntryData::from_metadata(&metadata));
        }
        self.node_mut(idx).loaded = true;
        Ok(())
    }

    fn ensure_loaded_deep(&mut self, idx: usize) -> Result<(), FsError> {
        if self.node(idx).loaded_deep {
            return Ok(());
        }
        self.ensure_loaded(idx)?;
        let children: Vec<usize> = self.node(idx).children.values().copied().collect();
        for child in children {
            if self.node(child).is_dir() {
                self.ensure_loaded_deep(child)?;
            }
        }
        self.node_mut(idx).loaded_deep = true;
        Ok(())
    }

    fn insert_child(&mut self, parent: usize, name: String, data: EntryData) -> usize {
        let key = self.case.fold(&name);
        let idx = self.nodes.len();
        self.nodes.push(Some(Node {
            name,
            parent: Some(parent),
            data,
            children: BTreeMap::new(),
            loaded: false,
            loaded_deep: false,
        }));
        self.node_mut(parent).children.insert(key, idx);
        idx
    }

    /// Place `data` at `path`, replacing an existing node in its slot or
    /// inserting a new one. Intermediate directories are looked up on
    /// disk when not yet cached.
    fn attach(&mut self, path: &SyncPath, data: EntryData) -> Result<usize, FsError> {
        let parent = match path.parent() {
            Some(parent) => parent,
            None => {
                self.node_mut(ROOT).data = data;
                return Ok(ROOT);
            }
        };

        // Materialize the parent chain.
        let mut idx = ROOT;
        let mut walked = SyncPath::root();
        for component in parent.components() {
            walked = walked.join(component);
            self.ensure_loaded(idx)?;
            let key = self.case.fold(component);
            idx = match self.node(idx).children.get(&key).copied() {
                Some(child) => child,
                None => {
                    let abs = self.abs_path(&walked);
                    let metadata = fs::metadata(&abs).map_err(|e| FsError::io(&abs, e))?;
                    self.insert_child(idx, component.to_string(), EntryData::from_metadata(&metadata))
                }
            };
        }
        if !self.node(idx).is_dir() {
            return Err(FsError::MissingParent { path: path.clone() });
        }

        let name = path
            .file_name()
            .ok_or_else(|| FsError::MissingParent { path: path.clone() })?
            .to_string();
        let key = self.case.fold(&name);
        match self.node(idx).children.get(&key).copied() {
            Some(existing) => {
                let changed_shape = self.node(existing).is_dir()
                    != matches!(data, EntryData::Directory { .. });
                let node = self.node_mut(existing);
                node.data = data;
                node.name = name;
                if changed_shape {
                    node.loaded = false;
                    node.loaded_deep = false;
                    let orphans: Vec<usize> = node.children.values().copied().collect();
                    node.children.clear();
                    for orphan in orphans {
                        self.free_subtree(orphan);
                    }
                }
                Ok(existing)
            }
            None => Ok(self.insert_child(idx, name, data)),
        }
    }

    fn insert_ghost(&mut self, path: &SyncPath, data: EntryData) -> Result<FsEntry, FsError> {
        let parent = path.parent().ok_or_else(|| FsError::MissingParent {
            path: path.clone(),
        })?;
        let parent_idx = self
            .resolve(&parent)?
            .filter(|&i| self.node(i).is_dir())
            .ok_or_else(|| FsError::MissingParent { path: path.clone() })?;
        let name = path
            .file_name()
            .ok_or_else(|| FsError::MissingParent { path: path.clone() })?
            .to_string();
        let key = self.case.fold(&name);
        if self.node(parent_idx).children.contains_key(&key) {
            return Err(FsError::AlreadyExists { path: path.clone() });
        }
        let idx = self.insert_child(parent_idx, name, data);
        // Nothing on disk backs a ghost; mark it loaded so nothing tries.
        self.node_mut(idx).loaded = true;
        self.node_mut(idx).loaded_deep = true;
        Ok(self.snapshot(idx))
    }

    fn detach(&mut self, idx: usize) {
        if let Some(parent) = self.node(idx).parent {
            let key = self.case.fold(&self.node(idx).name);
            self.node_mut(parent).children.remove(&key);
        }
        self.free_subtree(idx);
    }

    fn free_subtree(&mut self, idx: usize) {
        let children: Vec<usize> = self.node(idx).children.values().copied().collect();
        for child in children {
            self.free_subtree(child);
        }
        self.nodes[idx] = None;
    }
}
