//! In-process advisory locks keyed by workspace directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard};

use tracing::trace;

/// Set of currently locked workspace directories.
#[derive(Debug, Default)]
pub(crate) struct LockTable {
    held: Mutex<HashSet<PathBuf>>,
    released: Condvar,
}

impl LockTable {
    /// Blocks until `dir` is free, then marks it held.
    pub(crate) fn acquire(&self, dir: &Path) -> WorkspaceGuard<'_> {
        let mut held = self.held_set();
        while held.contains(dir) {
            trace!(dir = %dir.display(), "waiting for workspace lock");
            held = match self.released.wait(held) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        held.insert(dir.to_path_buf());
        WorkspaceGuard {
            table: self,
            dir: dir.to_path_buf(),
        }
    }

    // A panic while holding the set mutex cannot leave it half-updated:
    // every critical section is a single insert or remove.
    fn held_set(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        match self.held.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Exclusive hold on one workspace directory. Released on drop.
///
/// Every write to a workspace's documents takes one of these, so document
/// writers must be handed a guard to prove the lock is held.
#[derive(Debug)]
pub struct WorkspaceGuard<'a> {
    table: &'a LockTable,
    dir: PathBuf,
}

impl WorkspaceGuard<'_> {
    /// The locked workspace directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns true if `path` lives directly inside the locked directory.
    pub fn covers(&self, path: &Path) -> bool {
        path.parent() == Some(self.dir.as_path())
    }
}

impl Drop for WorkspaceGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.table.held_set();
        held.remove(&self.dir);
        drop(held);
        self.table.released.notify_all();
    }
}
