//! Version lifecycle within one workspace.
//!
//! Every version is a complete snapshot file (`v{id}.json`) plus an entry in
//! the workspace index. Versions are independent nodes: the optional
//! `sourceVersionId` records where a copy came from but nothing depends on
//! it, so any non-current version can be deleted on its own.
//!
//! Write ordering keeps a crash from ever leaving the index pointing at a
//! file that was never written:
//! - create: snapshot file first, then the index;
//! - delete: index first, then the snapshot file.
//!
//! The worst a crash can leave behind is an orphaned snapshot file, which
//! [`repair_workspace`](crate::workspace::WorkspaceManager::repair_workspace)
//! reports.
//!
//! Open versions are tracked here too: a [`VersionLease`] handed out with a
//! loaded workspace blocks deletion of its version through every entry
//! point.

mod lease;

pub use lease::VersionLease;

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::error::{AnnostoreError, Result};
use crate::model::{
    AnnotationStats, IndexDocument, KeyScheme, VersionId, VersionSnapshot, WorkspaceId,
    FORMAT_VERSION, INDEX_FILE,
};
use crate::storage::{Recovered, Storage, WorkspaceGuard};

use lease::LeaseTable;

/// Whether a listed version's snapshot file can be loaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VersionHealth {
    Ok,
    /// Listed in the index but the file does not exist.
    Missing,
    /// The file exists but does not parse or fails its checks.
    Corrupt,
}

/// One row of a version listing.
///
/// Fields read from the snapshot are `None` unless `health` is
/// [`VersionHealth::Ok`].
#[derive(Clone, Debug, PartialEq)]
pub struct VersionSummary {
    pub version_id: VersionId,
    pub is_current: bool,
    pub health: VersionHealth,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub source_version_id: Option<VersionId>,
    pub key_scheme: Option<KeyScheme>,
    pub stats: AnnotationStats,
}

/// Creates, switches, deletes and lists versions.
///
/// Public methods take the workspace lock themselves. The `_locked`
/// variants are for callers that already hold it.
#[derive(Clone, Debug)]
pub struct VersionManager {
    storage: Arc<Storage>,
    leases: Arc<LeaseTable>,
}

impl VersionManager {
    pub(crate) fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            leases: Arc::new(LeaseTable::default()),
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    // ------------------------------------------------------------------
    // Leases
    // ------------------------------------------------------------------

    /// Marks a version as open until the returned lease is dropped.
    pub(crate) fn open_lease(&self, ws: &WorkspaceId, version_id: &VersionId) -> VersionLease {
        self.leases.acquire(ws, version_id)
    }

    /// Number of live leases on one version.
    pub fn open_leases(&self, ws: &WorkspaceId, version_id: &VersionId) -> usize {
        self.leases.open_for_version(ws, version_id)
    }

    /// Number of live leases on any version of a workspace.
    pub fn open_leases_in_workspace(&self, ws: &WorkspaceId) -> usize {
        self.leases.open_for_workspace(ws)
    }

    // ------------------------------------------------------------------
    // Paths and raw documents
    // ------------------------------------------------------------------

    pub(crate) fn index_path(&self, ws: &WorkspaceId) -> PathBuf {
        self.storage.workspace_dir(ws).join(INDEX_FILE)
    }

    pub(crate) fn snapshot_path(&self, ws: &WorkspaceId, version_id: &VersionId) -> PathBuf {
        self.storage.workspace_dir(ws).join(version_id.file_name())
    }

    /// Reads a workspace index. A missing index means the workspace does
    /// not exist.
    pub(crate) fn read_index(&self, ws: &WorkspaceId) -> Result<IndexDocument> {
        self.storage
            .read_checked(&self.index_path(ws), |index: &IndexDocument| {
                check_index_owner(index, ws)
            })
            .map_err(|e| unknown_workspace_if_missing(e, ws))
    }

    pub(crate) fn read_index_or_cached(&self, ws: &WorkspaceId) -> Result<Recovered<IndexDocument>> {
        self.storage
            .read_checked_or_cached(&self.index_path(ws), |index: &IndexDocument| {
                check_index_owner(index, ws)
            })
            .map_err(|e| unknown_workspace_if_missing(e, ws))
    }

    pub(crate) fn write_index(&self, guard: &WorkspaceGuard<'_>, index: &IndexDocument) -> Result<()> {
        self.storage
            .write_document(guard, &self.index_path(&index.workspace.id), index)
    }

    /// Reads a snapshot file, checking that it belongs where it was found.
    /// A missing file is reported as [`AnnostoreError::DocumentNotFound`].
    pub(crate) fn read_snapshot(
        &self,
        ws: &WorkspaceId,
        version_id: &VersionId,
    ) -> Result<VersionSnapshot> {
        self.storage
            .read_checked(&self.snapshot_path(ws, version_id), |snapshot: &VersionSnapshot| {
                check_snapshot_owner(snapshot, ws, version_id)
            })
    }

    pub(crate) fn read_snapshot_or_cached(
        &self,
        ws: &WorkspaceId,
        version_id: &VersionId,
    ) -> Result<Recovered<VersionSnapshot>> {
        self.storage.read_checked_or_cached(
            &self.snapshot_path(ws, version_id),
            |snapshot: &VersionSnapshot| check_snapshot_owner(snapshot, ws, version_id),
        )
    }

    pub(crate) fn write_snapshot(
        &self,
        guard: &WorkspaceGuard<'_>,
        snapshot: &VersionSnapshot,
    ) -> Result<()> {
        let path = self.snapshot_path(&snapshot.workspace_id, &snapshot.version_id);
        self.storage.write_document(guard, &path, snapshot)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// The version the workspace currently points at.
    pub fn current_version_id(&self, ws: &WorkspaceId) -> Result<VersionId> {
        Ok(self.read_index(ws)?.current_version_id)
    }

    /// Loads one listed version's snapshot.
    pub fn load_version(&self, ws: &WorkspaceId, version_id: &VersionId) -> Result<VersionSnapshot> {
        let index = self.read_index(ws)?;
        if !index.lists(version_id) {
            return Err(unknown_version(ws, version_id));
        }
        self.read_snapshot(ws, version_id)
            .map_err(|e| dangling_if_missing(e, ws, version_id))
    }

    /// Summarizes every listed version, in index order.
    ///
    /// Missing and corrupt snapshots are listed with their health marker
    /// rather than failing the whole listing.
    pub fn list_versions(&self, ws: &WorkspaceId) -> Result<Vec<VersionSummary>> {
        let index = self.read_index(ws)?;
        let mut summaries = Vec::with_capacity(index.version_list.len());

        for version_id in &index.version_list {
            let is_current = *version_id == index.current_version_id;
            let summary = match self.read_snapshot(ws, version_id) {
                Ok(snapshot) => VersionSummary {
                    version_id: version_id.clone(),
                    is_current,
                    health: VersionHealth::Ok,
                    created_at: Some(snapshot.created_at),
                    modified_at: Some(snapshot.modified_at),
                    description: Some(snapshot.description),
                    source_version_id: snapshot.source_version_id,
                    key_scheme: Some(snapshot.key_scheme),
                    stats: AnnotationStats::of(&snapshot.annotations),
                },
                Err(AnnostoreError::DocumentNotFound { .. }) => {
                    unhealthy(version_id, is_current, VersionHealth::Missing)
                }
                Err(e) if e.is_corruption() => {
                    unhealthy(version_id, is_current, VersionHealth::Corrupt)
                }
                Err(e) => return Err(e),
            };
            summaries.push(summary);
        }

        Ok(summaries)
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Creates a version, either empty or as a full copy of `source`.
    pub fn create_version(
        &self,
        ws: &WorkspaceId,
        new_id: &VersionId,
        source: Option<&VersionId>,
        description: Option<&str>,
    ) -> Result<VersionSnapshot> {
        let dir = self.storage.workspace_dir(ws);
        let guard = self.storage.lock_workspace(&dir);
        self.create_version_locked(&guard, ws, new_id, source, description)
    }

    pub(crate) fn create_version_locked(
        &self,
        guard: &WorkspaceGuard<'_>,
        ws: &WorkspaceId,
        new_id: &VersionId,
        source: Option<&VersionId>,
        description: Option<&str>,
    ) -> Result<VersionSnapshot> {
        let mut index = self.read_index(ws)?;

        if index.lists(new_id) || self.snapshot_path(ws, new_id).exists() {
            return Err(AnnostoreError::DuplicateVersionId {
                workspace_id: ws.clone(),
                version_id: new_id.clone(),
            });
        }

        let now = Utc::now();
        let snapshot = match source {
            Some(source_id) => {
                if !index.lists(source_id) {
                    return Err(unknown_version(ws, source_id));
                }
                let source_snapshot = self
                    .read_snapshot(ws, source_id)
                    .map_err(|e| dangling_if_missing(e, ws, source_id))?;
                VersionSnapshot {
                    format: FORMAT_VERSION,
                    workspace_id: ws.clone(),
                    version_id: new_id.clone(),
                    created_at: now,
                    modified_at: now,
                    source_version_id: Some(source_id.clone()),
                    description: description.unwrap_or_default().to_string(),
                    key_scheme: source_snapshot.key_scheme,
                    annotations: source_snapshot.annotations,
                    transforms: source_snapshot.transforms,
                }
            }
            None => VersionSnapshot::empty(ws.clone(), new_id.clone(), description.unwrap_or_default()),
        };

        self.write_snapshot(guard, &snapshot)?;

        index.version_list.push(new_id.clone());
        index.workspace.modified_at = now;
        self.write_index(guard, &index)?;

        info!(
            workspace = %ws,
            version = %new_id,
            source = ?source.map(VersionId::as_str),
            "created version"
        );
        Ok(snapshot)
    }

    /// Points the workspace at another listed version.
    pub fn switch_version(&self, ws: &WorkspaceId, version_id: &VersionId) -> Result<()> {
        let dir = self.storage.workspace_dir(ws);
        let guard = self.storage.lock_workspace(&dir);
        self.switch_version_locked(&guard, ws, version_id)
    }

    pub(crate) fn switch_version_locked(
        &self,
        guard: &WorkspaceGuard<'_>,
        ws: &WorkspaceId,
        version_id: &VersionId,
    ) -> Result<()> {
        let mut index = self.read_index(ws)?;
        if !index.lists(version_id) {
            return Err(unknown_version(ws, version_id));
        }

        // Refuse to point at something that cannot be loaded
        self.read_snapshot(ws, version_id)
            .map_err(|e| dangling_if_missing(e, ws, version_id))?;

        if index.current_version_id == *version_id {
            return Ok(());
        }

        let previous = std::mem::replace(&mut index.current_version_id, version_id.clone());
        index.workspace.modified_at = Utc::now();
        self.write_index(guard, &index)?;

        info!(workspace = %ws, from = %previous, to = %version_id, "switched version");
        Ok(())
    }

    /// Deletes a non-current version that nobody has open. The index is
    /// rewritten first, so a crash in between leaves only an orphaned file.
    pub fn delete_version(&self, ws: &WorkspaceId, version_id: &VersionId) -> Result<()> {
        let dir = self.storage.workspace_dir(ws);
        let guard = self.storage.lock_workspace(&dir);
        self.delete_version_locked(&guard, ws, version_id)
    }

    pub(crate) fn delete_version_locked(
        &self,
        guard: &WorkspaceGuard<'_>,
        ws: &WorkspaceId,
        version_id: &VersionId,
    ) -> Result<()> {
        let open = self.open_leases(ws, version_id);
        if open > 0 {
            return Err(AnnostoreError::VersionInUse {
                version_id: version_id.clone(),
                open,
            });
        }

        let mut index = self.read_index(ws)?;
        if !index.lists(version_id) {
            return Err(unknown_version(ws, version_id));
        }
        if index.version_list.len() == 1 {
            return Err(AnnostoreError::CannotDeleteLastVersion {
                version_id: version_id.clone(),
            });
        }
        if index.current_version_id == *version_id {
            return Err(AnnostoreError::CannotDeleteCurrentVersion {
                version_id: version_id.clone(),
            });
        }

        index.version_list.retain(|v| v != version_id);
        index.workspace.modified_at = Utc::now();
        self.write_index(guard, &index)?;

        let existed = self
            .storage
            .remove_document(guard, &self.snapshot_path(ws, version_id))?;

        info!(workspace = %ws, version = %version_id, file_existed = existed, "deleted version");
        Ok(())
    }
}

fn unhealthy(version_id: &VersionId, is_current: bool, health: VersionHealth) -> VersionSummary {
    VersionSummary {
        version_id: version_id.clone(),
        is_current,
        health,
        created_at: None,
        modified_at: None,
        description: None,
        source_version_id: None,
        key_scheme: None,
        stats: AnnotationStats::default(),
    }
}

fn check_index_owner(index: &IndexDocument, ws: &WorkspaceId) -> std::result::Result<(), String> {
    if index.workspace.id != *ws {
        return Err(format!(
            "index belongs to workspace {} but lives in directory {}",
            index.workspace.id, ws
        ));
    }
    Ok(())
}

fn check_snapshot_owner(
    snapshot: &VersionSnapshot,
    ws: &WorkspaceId,
    version_id: &VersionId,
) -> std::result::Result<(), String> {
    if snapshot.version_id != *version_id {
        return Err(format!(
            "file for version {} holds version {}",
            version_id, snapshot.version_id
        ));
    }
    if snapshot.workspace_id != *ws {
        return Err(format!(
            "snapshot belongs to workspace {}, not {}",
            snapshot.workspace_id, ws
        ));
    }
    Ok(())
}

pub(crate) fn unknown_version(ws: &WorkspaceId, version_id: &VersionId) -> AnnostoreError {
    AnnostoreError::UnknownVersion {
        workspace_id: ws.clone(),
        version_id: version_id.clone(),
    }
}

pub(crate) fn dangling_if_missing(
    err: AnnostoreError,
    ws: &WorkspaceId,
    version_id: &VersionId,
) -> AnnostoreError {
    match err {
        AnnostoreError::DocumentNotFound { .. } => AnnostoreError::DanglingVersionReference {
            workspace_id: ws.clone(),
            version_id: version_id.clone(),
        },
        other => other,
    }
}

fn unknown_workspace_if_missing(err: AnnostoreError, ws: &WorkspaceId) -> AnnostoreError {
    match err {
        AnnostoreError::DocumentNotFound { .. } => AnnostoreError::UnknownWorkspace(ws.clone()),
        other => other,
    }
}
