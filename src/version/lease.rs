//! Counted tokens marking versions as open.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::model::{VersionId, WorkspaceId};

type LeaseKey = (WorkspaceId, VersionId);

#[derive(Debug, Default)]
pub(crate) struct LeaseTable {
    open: Mutex<HashMap<LeaseKey, usize>>,
}

impl LeaseTable {
    pub(crate) fn acquire(self: &Arc<Self>, ws: &WorkspaceId, version_id: &VersionId) -> VersionLease {
        *self
            .counts()
            .entry((ws.clone(), version_id.clone()))
            .or_default() += 1;
        VersionLease {
            table: Arc::clone(self),
            workspace_id: ws.clone(),
            version_id: version_id.clone(),
        }
    }

    pub(crate) fn open_for_version(&self, ws: &WorkspaceId, version_id: &VersionId) -> usize {
        self.counts()
            .get(&(ws.clone(), version_id.clone()))
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn open_for_workspace(&self, ws: &WorkspaceId) -> usize {
        self.counts()
            .iter()
            .filter(|((lease_ws, _), _)| lease_ws == ws)
            .map(|(_, count)| count)
            .sum()
    }

    fn release(&self, ws: &WorkspaceId, version_id: &VersionId) {
        let mut counts = self.counts();
        let key = (ws.clone(), version_id.clone());
        if let Some(count) = counts.get_mut(&key) {
            *count -= 1;
            if *count == 0 {
                counts.remove(&key);
            }
        }
    }

    fn counts(&self) -> MutexGuard<'_, HashMap<LeaseKey, usize>> {
        match self.open.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Marks a version as open by a collaborator.
///
/// While any lease on a version is alive the version cannot be deleted, and
/// while any lease in a workspace is alive the workspace cannot be deleted.
/// The lease carries no annotation data; dropping it closes the version.
#[derive(Debug)]
pub struct VersionLease {
    table: Arc<LeaseTable>,
    workspace_id: WorkspaceId,
    version_id: VersionId,
}

impl VersionLease {
    pub fn workspace_id(&self) -> &WorkspaceId {
        &self.workspace_id
    }

    pub fn version_id(&self) -> &VersionId {
        &self.version_id
    }
}

impl Drop for VersionLease {
    fn drop(&mut self) {
        self.table.release(&self.workspace_id, &self.version_id);
    }
}
