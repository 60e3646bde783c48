//! Durable document storage.
//!
//! All persisted state is a small set of JSON documents per workspace
//! directory. This module owns every byte that goes to or comes from those
//! files:
//! - Reads parse strictly and run [`Document::check`]. A damaged file
//!   surfaces as [`AnnostoreError::StorageCorruption`] and is copied aside as
//!   `<name>.corrupt-<crc32c>` so it survives later repairs. The original
//!   file is never rewritten by a read. If the copy cannot be made, the
//!   path is refused to every write and removal until a later read finds
//!   it intact or copies it aside.
//! - Writes serialize fully in memory, go to a temp file in the same
//!   directory, and are renamed over the destination. A reader sees the old
//!   document or the new one, never a partial write.
//! - Writers must hold the workspace's [`WorkspaceGuard`].
//!
//! The last good bytes of the documents a workspace is working on are
//! cached in memory, so a document that goes bad while the process is
//! running can still be recovered with [`Storage::read_document_or_cached`].
//! The cache holds one slot per workspace directory and document kind. A
//! recovering read claims the slot; a write refreshes it only when the slot
//! is empty or already tracks the written path. Plain reads never touch it.

mod atomic;
mod lock;

pub use atomic::{TEMP_PREFIX, TEMP_SUFFIX};
pub use lock::WorkspaceGuard;

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::StoreConfig;
use crate::error::{AnnostoreError, Result};
use crate::model::{Document, VersionId, WorkspaceId, INDEX_FILE};

use atomic::{is_temp_file_name, sync_dir, write_atomic};
use lock::LockTable;

/// Marker between a document's file name and the checksum of a quarantine copy.
pub const QUARANTINE_MARKER: &str = ".corrupt-";

/// A document read from disk, or from the last-good cache if the file on
/// disk turned out to be corrupt.
#[derive(Debug)]
pub struct Recovered<D> {
    pub document: D,
    /// Set when `document` came from the cache instead of the file.
    pub corruption: Option<AnnostoreError>,
}

/// Cache slot: the workspace directory and the document kind.
type SlotKey = (PathBuf, &'static str);

/// The path a slot currently tracks and its last good bytes.
#[derive(Debug)]
struct CachedDocument {
    path: PathBuf,
    bytes: Vec<u8>,
}

/// Storage backend for one workspaces directory.
#[derive(Debug)]
pub struct Storage {
    workspaces_dir: PathBuf,
    fsync: bool,
    locks: LockTable,
    last_good: Mutex<HashMap<SlotKey, CachedDocument>>,
    /// Corrupt documents whose bytes exist nowhere but at their own path.
    unpreserved: Mutex<HashSet<PathBuf>>,
}

impl Storage {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            workspaces_dir: config.workspaces_dir.clone(),
            fsync: config.fsync,
            locks: LockTable::default(),
            last_good: Mutex::new(HashMap::new()),
            unpreserved: Mutex::new(HashSet::new()),
        }
    }

    /// Directory holding one subdirectory per workspace.
    pub fn workspaces_dir(&self) -> &Path {
        &self.workspaces_dir
    }

    /// Directory of one workspace.
    pub fn workspace_dir(&self, id: &WorkspaceId) -> PathBuf {
        self.workspaces_dir.join(id.as_str())
    }

    /// Takes the advisory lock for a workspace directory, blocking while
    /// another thread holds it.
    pub fn lock_workspace(&self, dir: &Path) -> WorkspaceGuard<'_> {
        self.locks.acquire(dir)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Reads and checks a document.
    pub fn read_document<D: Document>(&self, path: &Path) -> Result<D> {
        self.read_checked(path, |_: &D| Ok(()))
    }

    /// Reads a document, falling back to the last good cached copy if the
    /// file is corrupt. Fails if the file is corrupt and nothing is cached.
    pub fn read_document_or_cached<D: Document>(&self, path: &Path) -> Result<Recovered<D>> {
        self.read_checked_or_cached(path, |_: &D| Ok(()))
    }

    /// [`read_document`](Self::read_document) with an extra check that
    /// depends on where the document was found.
    pub(crate) fn read_checked<D, F>(&self, path: &Path, expect: F) -> Result<D>
    where
        D: Document,
        F: Fn(&D) -> std::result::Result<(), String>,
    {
        self.read_with_bytes(path, &expect).map(|(document, _)| document)
    }

    fn read_with_bytes<D, F>(&self, path: &Path, expect: &F) -> Result<(D, Vec<u8>)>
    where
        D: Document,
        F: Fn(&D) -> std::result::Result<(), String>,
    {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(AnnostoreError::DocumentNotFound {
                    path: path.to_path_buf(),
                })
            }
            Err(e) => return Err(AnnostoreError::io(path, e)),
        };

        match decode(&bytes, expect) {
            Ok(document) => {
                debug!(path = %path.display(), kind = D::KIND, bytes = bytes.len(), "read document");
                self.unpreserved().remove(path);
                Ok((document, bytes))
            }
            Err(message) => {
                warn!(path = %path.display(), kind = D::KIND, %message, "corrupt document");
                match self.quarantine(path, &bytes) {
                    Some(_) => self.unpreserved().remove(path),
                    None => self.unpreserved().insert(path.to_path_buf()),
                };
                Err(AnnostoreError::corruption(
                    path,
                    format!("{}: {}", D::KIND, message),
                ))
            }
        }
    }

    pub(crate) fn read_checked_or_cached<D, F>(&self, path: &Path, expect: F) -> Result<Recovered<D>>
    where
        D: Document,
        F: Fn(&D) -> std::result::Result<(), String>,
    {
        match self.read_with_bytes(path, &expect) {
            Ok((document, bytes)) => {
                self.remember::<D>(path, bytes, true);
                Ok(Recovered {
                    document,
                    corruption: None,
                })
            }
            Err(err) if err.is_corruption() => {
                let cached = self.cached_bytes::<D>(path);
                match cached.and_then(|bytes| decode(&bytes, &expect).ok()) {
                    Some(document) => {
                        warn!(path = %path.display(), kind = D::KIND, "using last good copy of corrupt document");
                        Ok(Recovered {
                            document,
                            corruption: Some(err),
                        })
                    }
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Atomically replaces the document at `path`.
    ///
    /// `path` must be directly inside the directory `guard` locks.
    pub fn write_document<D: Document>(
        &self,
        guard: &WorkspaceGuard<'_>,
        path: &Path,
        document: &D,
    ) -> Result<()> {
        debug_assert!(
            guard.covers(path),
            "{} written without holding the lock for its workspace",
            path.display()
        );

        self.ensure_preserved(path)?;

        let bytes = serde_json::to_vec_pretty(document).map_err(|source| {
            AnnostoreError::Serialize {
                path: path.to_path_buf(),
                source,
            }
        })?;

        write_atomic(path, &bytes, self.fsync).map_err(|e| AnnostoreError::io(path, e))?;
        debug!(path = %path.display(), kind = D::KIND, bytes = bytes.len(), "wrote document");
        self.remember::<D>(path, bytes, false);
        Ok(())
    }

    /// Removes a document. Returns false if it did not exist.
    pub fn remove_document(&self, guard: &WorkspaceGuard<'_>, path: &Path) -> Result<bool> {
        debug_assert!(guard.covers(path));

        self.ensure_preserved(path)?;
        self.forget(path);
        match fs::remove_file(path) {
            Ok(()) => {
                if self.fsync {
                    sync_dir(guard.dir()).map_err(|e| AnnostoreError::io(guard.dir(), e))?;
                }
                debug!(path = %path.display(), "removed document");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AnnostoreError::io(path, e)),
        }
    }

    /// Removes a whole workspace directory and drops its cached documents.
    pub(crate) fn remove_workspace_dir(&self, guard: &WorkspaceGuard<'_>) -> Result<()> {
        let dir = guard.dir();
        self.cache().retain(|(slot_dir, _), _| slot_dir != dir);
        self.unpreserved().retain(|path| !path.starts_with(dir));
        match fs::remove_dir_all(dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AnnostoreError::io(dir, e)),
        }
    }

    // ------------------------------------------------------------------
    // Listing
    // ------------------------------------------------------------------

    /// Version ids of every `v{id}.json` file in a workspace directory.
    ///
    /// Temp files and quarantine copies never parse as version files.
    pub fn list_version_files(&self, workspace_dir: &Path) -> Result<Vec<VersionId>> {
        let mut ids: Vec<VersionId> = list_file_names(workspace_dir)?
            .iter()
            .filter_map(|name| VersionId::from_file_name(name))
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Temp files left behind by an interrupted write.
    pub fn list_stale_temp_files(&self, workspace_dir: &Path) -> Result<Vec<PathBuf>> {
        Ok(list_file_names(workspace_dir)?
            .into_iter()
            .filter(|name| is_temp_file_name(name))
            .map(|name| workspace_dir.join(name))
            .collect())
    }

    /// Quarantine copies of corrupt documents.
    pub fn list_quarantine_files(&self, workspace_dir: &Path) -> Result<Vec<PathBuf>> {
        Ok(list_file_names(workspace_dir)?
            .into_iter()
            .filter(|name| name.contains(QUARANTINE_MARKER))
            .map(|name| workspace_dir.join(name))
            .collect())
    }

    /// Every directory under the workspaces directory that holds an index.
    ///
    /// A missing workspaces directory simply has no workspaces.
    pub fn list_workspace_dirs(&self) -> Result<Vec<PathBuf>> {
        if !self.workspaces_dir.exists() {
            return Ok(Vec::new());
        }

        let mut dirs = Vec::new();
        for entry in WalkDir::new(&self.workspaces_dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| AnnostoreError::io(&self.workspaces_dir, e.into()))?;
            if entry.file_type().is_dir() && entry.path().join(INDEX_FILE).is_file() {
                dirs.push(entry.path().to_path_buf());
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Copies corrupt bytes aside. Failures are logged here and enforced by
    /// [`ensure_preserved`](Self::ensure_preserved) on the next write.
    fn quarantine(&self, path: &Path, bytes: &[u8]) -> Option<PathBuf> {
        let file_name = path.file_name()?.to_string_lossy();
        let target = path.with_file_name(format!(
            "{}{}{:08x}",
            file_name,
            QUARANTINE_MARKER,
            crc32c::crc32c(bytes)
        ));
        if target.is_file() {
            return Some(target);
        }
        match write_atomic(&target, bytes, self.fsync) {
            Ok(()) => {
                warn!(path = %path.display(), copy = %target.display(), "quarantined corrupt document");
                Some(target)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to quarantine corrupt document");
                None
            }
        }
    }

    fn ensure_preserved(&self, path: &Path) -> Result<()> {
        if self.unpreserved().contains(path) {
            return Err(AnnostoreError::CorruptDocumentNotPreserved {
                path: path.to_path_buf(),
            });
        }
        Ok(())
    }

    fn unpreserved(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        match self.unpreserved.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<SlotKey, CachedDocument>> {
        match self.last_good.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Stores `bytes` as the last good copy of `path`. Without `claim`, a
    /// slot tracking another document of the same kind is left alone.
    fn remember<D: Document>(&self, path: &Path, bytes: Vec<u8>, claim: bool) {
        let Some(slot) = slot_key::<D>(path) else {
            return;
        };
        let mut cache = self.cache();
        if !claim && cache.get(&slot).is_some_and(|cached| cached.path != path) {
            return;
        }
        cache.insert(
            slot,
            CachedDocument {
                path: path.to_path_buf(),
                bytes,
            },
        );
    }

    fn forget(&self, path: &Path) {
        self.cache().retain(|_, cached| cached.path != path);
    }

    fn cached_bytes<D: Document>(&self, path: &Path) -> Option<Vec<u8>> {
        let slot = slot_key::<D>(path)?;
        self.cache()
            .get(&slot)
            .filter(|cached| cached.path == path)
            .map(|cached| cached.bytes.clone())
    }

    #[cfg(test)]
    fn cached_documents(&self) -> usize {
        self.cache().len()
    }
}

fn slot_key<D: Document>(path: &Path) -> Option<SlotKey> {
    Some((path.parent()?.to_path_buf(), D::KIND))
}

fn decode<D, F>(bytes: &[u8], expect: &F) -> std::result::Result<D, String>
where
    D: Document,
    F: Fn(&D) -> std::result::Result<(), String>,
{
    let document: D = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
    document.check()?;
    expect(&document)?;
    Ok(document)
}

/// Fuzz-only entrypoint for strict document parsing.
#[cfg(feature = "fuzzing")]
pub fn fuzz_parse_document<D: Document>(bytes: &[u8]) -> std::result::Result<(), String> {
    decode(bytes, &|_: &D| Ok(())).map(|_| ())
}

fn list_file_names(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| AnnostoreError::io(dir, e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}
