//! Workspace lifecycle, loading and saving.
//!
//! A [`WorkspaceManager`] is the single entry point collaborators use. It is
//! an explicit value rather than a process-wide singleton, and it is
//! `Send + Sync`, so one manager can be shared behind an `Arc`.
//!
//! On-disk layout of one workspace (`<workspaces_dir>/<workspace_id>/`):
//!
//! ```text
//! workspace.json   metadata, currentVersionId, versionList
//! v1.json          full annotation snapshot of version "1"
//! v2.json          ...
//! exports.json     append-only export ledger
//! ```
//!
//! # Example
//!
//! ```no_run
//! use annostore::{StoreConfig, WorkspaceManager};
//! use annostore::model::{derive_key, AnnotationRecord};
//!
//! # fn main() -> annostore::Result<()> {
//! let manager = WorkspaceManager::new(StoreConfig::new("/var/lib/annostore"));
//! let workspace = manager.create_workspace("Receipts", "/data/receipts")?;
//!
//! let mut loaded = manager.load_workspace(&workspace.id)?;
//! let key = derive_key(&workspace.root_image_dir, "/data/receipts/r1.jpg".as_ref())?;
//! loaded.annotations.insert(key, vec![AnnotationRecord::rect(0.0, 0.0, 50.0, 20.0, "TOTAL")]);
//! manager.save_current_version(&workspace.id, &loaded.annotations)?;
//! # Ok(())
//! # }
//! ```

mod repair;

pub use crate::version::VersionLease;
pub use repair::{RepairIssue, RepairReport};

use chrono::Utc;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::error::{AnnostoreError, Result};
use crate::migration::legacy_cache::read_legacy_cache;
use crate::migration::{migrate_with_transforms, MigrationReport};
use crate::model::{
    AnnotationMap, ExportLedger, ExportRecord, IndexDocument, KeyScheme, TransformMap, VersionId,
    VersionSnapshot, Workspace, WorkspaceId, WorkspaceIndex, FORMAT_VERSION, LEDGER_FILE,
};
use crate::storage::{Recovered, Storage, WorkspaceGuard};
use crate::validation::{validate_annotations, validate_version, ValidateOptions};
use crate::version::{dangling_if_missing, unknown_version, VersionManager, VersionSummary};

/// Description given to the first version of a new workspace.
const INITIAL_VERSION_DESCRIPTION: &str = "Initial version";

/// Parameters for [`WorkspaceManager::create_workspace_with`].
#[derive(Clone, Debug)]
pub struct WorkspaceOptions {
    /// Explicit id; a random one is generated when `None`.
    pub id: Option<WorkspaceId>,
    pub display_name: String,
    pub description: String,
    pub root_image_dir: PathBuf,
}

impl WorkspaceOptions {
    pub fn new(display_name: impl Into<String>, root_image_dir: impl Into<PathBuf>) -> Self {
        Self {
            id: None,
            display_name: display_name.into(),
            description: String::new(),
            root_image_dir: root_image_dir.into(),
        }
    }

    pub fn with_id(mut self, id: WorkspaceId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Something [`WorkspaceManager::load_workspace`] recovered from on its own.
#[derive(Clone, Debug, PartialEq)]
pub enum LoadNotice {
    /// The current version's snapshot is missing; another listed version was
    /// loaded instead. The index still points at `missing`.
    DanglingCurrentVersion {
        missing: VersionId,
        fallback: VersionId,
    },
    /// A document was corrupt on disk and its last good in-memory copy was
    /// used.
    RecoveredFromCache { path: PathBuf, message: String },
    /// The export ledger could not be read; the export history is empty.
    ExportLedgerUnavailable { message: String },
}

/// A loaded workspace: the annotation map of one version plus its context.
///
/// The map is owned by the caller. Edits reach disk only through
/// [`WorkspaceManager::save_current_version`].
#[derive(Debug)]
pub struct LoadedWorkspace {
    pub workspace: Workspace,
    pub index: WorkspaceIndex,
    /// The version whose annotations were loaded. Differs from
    /// `index.current_version_id` only after a dangling fallback.
    pub version_id: VersionId,
    pub annotations: AnnotationMap,
    /// Per-image rotations of the loaded version, keyed like `annotations`.
    pub transforms: TransformMap,
    /// What key migration did on this load. Empty for path-keyed snapshots.
    pub migration: MigrationReport,
    pub notices: Vec<LoadNotice>,
    /// Keeps the loaded version open until dropped.
    pub lease: VersionLease,
}

/// One row of [`WorkspaceManager::list_workspaces`].
#[derive(Clone, Debug, PartialEq)]
pub struct WorkspaceSummary {
    pub workspace: Workspace,
    pub current_version_id: VersionId,
    pub version_count: usize,
}

/// Result of [`WorkspaceManager::import_legacy_cache`].
#[derive(Clone, Debug)]
pub struct LegacyImport {
    pub workspace: Workspace,
    /// What migration will do to the imported keys on every load, until
    /// the first save stores them as path keys.
    pub migration: MigrationReport,
}

/// Entry point for everything that touches workspaces on disk.
#[derive(Debug)]
pub struct WorkspaceManager {
    config: StoreConfig,
    storage: Arc<Storage>,
    versions: VersionManager,
}

impl WorkspaceManager {
    pub fn new(config: StoreConfig) -> Self {
        let storage = Arc::new(Storage::new(&config));
        Self {
            versions: VersionManager::new(Arc::clone(&storage)),
            storage,
            config,
        }
    }

    /// Creates a manager from a TOML config file.
    pub fn from_config_file(path: &Path) -> Result<Self> {
        Ok(Self::new(StoreConfig::from_toml_file(path)?))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn versions(&self) -> &VersionManager {
        &self.versions
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Directory of one workspace.
    pub fn workspace_dir(&self, ws: &WorkspaceId) -> PathBuf {
        self.storage.workspace_dir(ws)
    }

    // ------------------------------------------------------------------
    // Workspace lifecycle
    // ------------------------------------------------------------------

    /// Creates a workspace with a generated id and one empty version.
    pub fn create_workspace(
        &self,
        display_name: impl Into<String>,
        root_image_dir: impl Into<PathBuf>,
    ) -> Result<Workspace> {
        self.create_workspace_with(WorkspaceOptions::new(display_name, root_image_dir))
    }

    /// Creates a workspace with one empty version.
    pub fn create_workspace_with(&self, options: WorkspaceOptions) -> Result<Workspace> {
        self.create_workspace_from(
            options,
            AnnotationMap::new(),
            TransformMap::new(),
            KeyScheme::Path,
            INITIAL_VERSION_DESCRIPTION,
        )
    }

    /// Creates the directory, then the initial snapshot, the ledger and
    /// finally the index. A directory without an index is not a workspace,
    /// so a crash before the last write leaves nothing half-visible.
    fn create_workspace_from(
        &self,
        options: WorkspaceOptions,
        annotations: AnnotationMap,
        transforms: TransformMap,
        key_scheme: KeyScheme,
        version_description: &str,
    ) -> Result<Workspace> {
        let id = options.id.unwrap_or_else(WorkspaceId::generate);
        let dir = self.storage.workspace_dir(&id);

        fs::create_dir_all(self.storage.workspaces_dir())
            .map_err(|e| AnnostoreError::io(self.storage.workspaces_dir(), e))?;
        match fs::create_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(AnnostoreError::WorkspaceExists(id))
            }
            Err(e) => return Err(AnnostoreError::io(&dir, e)),
        }

        let guard = self.storage.lock_workspace(&dir);
        let now = Utc::now();
        let workspace = Workspace {
            id: id.clone(),
            display_name: options.display_name,
            description: options.description,
            root_image_dir: options.root_image_dir,
            created_at: now,
            modified_at: now,
        };

        let mut snapshot =
            VersionSnapshot::empty(id.clone(), VersionId::initial(), version_description);
        snapshot.key_scheme = key_scheme;
        snapshot.annotations = annotations;
        snapshot.transforms = transforms;
        self.versions.write_snapshot(&guard, &snapshot)?;

        self.storage
            .write_document(&guard, &dir.join(LEDGER_FILE), &ExportLedger::empty(id.clone()))?;

        let index = IndexDocument {
            format: FORMAT_VERSION,
            workspace: workspace.clone(),
            current_version_id: VersionId::initial(),
            version_list: vec![VersionId::initial()],
        };
        self.versions.write_index(&guard, &index)?;

        info!(workspace = %id, name = %workspace.display_name, "created workspace");
        Ok(workspace)
    }

    /// Changes a workspace's display name.
    pub fn rename_workspace(&self, ws: &WorkspaceId, display_name: impl Into<String>) -> Result<Workspace> {
        let guard = self.lock(ws);
        let mut index = self.versions.read_index(ws)?;

        let display_name = display_name.into();
        let previous = std::mem::replace(&mut index.workspace.display_name, display_name);
        index.workspace.modified_at = Utc::now();
        self.versions.write_index(&guard, &index)?;

        info!(workspace = %ws, from = %previous, to = %index.workspace.display_name, "renamed workspace");
        Ok(index.workspace)
    }

    /// Deletes a workspace and all of its versions.
    ///
    /// The index goes first, so a crash part-way leaves a directory that is
    /// no longer listed as a workspace.
    pub fn delete_workspace(&self, ws: &WorkspaceId) -> Result<()> {
        let guard = self.lock(ws);
        if !guard.dir().exists() {
            return Err(AnnostoreError::UnknownWorkspace(ws.clone()));
        }

        let open = self.versions.open_leases_in_workspace(ws);
        if open > 0 {
            return Err(AnnostoreError::WorkspaceInUse {
                workspace_id: ws.clone(),
                open,
            });
        }

        self.storage
            .remove_document(&guard, &self.versions.index_path(ws))?;
        self.storage.remove_workspace_dir(&guard)?;

        info!(workspace = %ws, "deleted workspace");
        Ok(())
    }

    /// Summaries of every readable workspace, newest first.
    ///
    /// Directories whose index cannot be read are skipped with a warning;
    /// [`repair_workspace`](Self::repair_workspace) reports the details.
    pub fn list_workspaces(&self) -> Result<Vec<WorkspaceSummary>> {
        let mut summaries = Vec::new();

        for dir in self.storage.list_workspace_dirs()? {
            let Some(name) = dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Ok(ws) = WorkspaceId::new(name) else {
                warn!(dir = %dir.display(), "skipping directory with invalid workspace id");
                continue;
            };

            match self.versions.read_index(&ws) {
                Ok(index) => summaries.push(WorkspaceSummary {
                    version_count: index.version_list.len(),
                    current_version_id: index.current_version_id,
                    workspace: index.workspace,
                }),
                Err(e) => warn!(workspace = %ws, error = %e, "skipping unreadable workspace"),
            }
        }

        summaries.sort_by(|a, b| {
            b.workspace
                .created_at
                .cmp(&a.workspace.created_at)
                .then_with(|| a.workspace.id.cmp(&b.workspace.id))
        });
        Ok(summaries)
    }

    // ------------------------------------------------------------------
    // Loading and saving annotations
    // ------------------------------------------------------------------

    /// Loads the current version's annotations.
    ///
    /// Legacy-keyed snapshots are migrated before the map is returned. If
    /// the current snapshot file is missing, the first other listed version
    /// that loads is returned instead and a
    /// [`LoadNotice::DanglingCurrentVersion`] is attached. The index is not
    /// changed by a load.
    pub fn load_workspace(&self, ws: &WorkspaceId) -> Result<LoadedWorkspace> {
        // Held so that taking the lease is ordered against deletions
        let _guard = self.lock(ws);
        let mut notices = Vec::new();

        let index = self.versions.read_index_or_cached(ws)?;
        let index = recovered(index, &mut notices);

        let ledger = match self.read_ledger_or_cached(ws) {
            Ok(ledger) => recovered(ledger, &mut notices),
            Err(e) => {
                warn!(workspace = %ws, error = %e, "export ledger unavailable");
                notices.push(LoadNotice::ExportLedgerUnavailable {
                    message: e.to_string(),
                });
                ExportLedger::empty(ws.clone())
            }
        };

        let snapshot = self.load_current_or_fallback(ws, &index, &mut notices)?;

        let VersionSnapshot {
            version_id,
            key_scheme,
            annotations,
            transforms,
            ..
        } = snapshot;
        let (annotations, transforms, migration) = match key_scheme {
            KeyScheme::Legacy => {
                let outcome = migrate_with_transforms(annotations, transforms);
                if !outcome.report.is_clean() {
                    info!(
                        workspace = %ws,
                        version = %version_id,
                        renamed = outcome.report.renamed.len(),
                        kept = outcome.report.warnings.len(),
                        "migrated legacy keys"
                    );
                }
                (outcome.annotations, outcome.transforms, outcome.report)
            }
            KeyScheme::Path => (annotations, transforms, MigrationReport::default()),
        };

        let lease = self.versions.open_lease(ws, &version_id);
        debug!(workspace = %ws, version = %version_id, images = annotations.len(), "loaded workspace");

        Ok(LoadedWorkspace {
            workspace: index.workspace.clone(),
            index: WorkspaceIndex::from_parts(index, ledger),
            version_id,
            annotations,
            transforms,
            migration,
            notices,
            lease,
        })
    }

    fn load_current_or_fallback(
        &self,
        ws: &WorkspaceId,
        index: &IndexDocument,
        notices: &mut Vec<LoadNotice>,
    ) -> Result<VersionSnapshot> {
        let current = &index.current_version_id;
        match self.versions.read_snapshot_or_cached(ws, current) {
            Ok(snapshot) => return Ok(recovered(snapshot, notices)),
            Err(AnnostoreError::DocumentNotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        for candidate in index.version_list.iter().filter(|v| *v != current) {
            match self.versions.read_snapshot_or_cached(ws, candidate) {
                Ok(snapshot) => {
                    warn!(
                        workspace = %ws,
                        missing = %current,
                        fallback = %candidate,
                        "current version is missing; loaded another version"
                    );
                    notices.push(LoadNotice::DanglingCurrentVersion {
                        missing: current.clone(),
                        fallback: candidate.clone(),
                    });
                    return Ok(recovered(snapshot, notices));
                }
                Err(e) => debug!(workspace = %ws, version = %candidate, error = %e, "fallback candidate unusable"),
            }
        }

        Err(AnnostoreError::DanglingVersionReference {
            workspace_id: ws.clone(),
            version_id: current.clone(),
        })
    }

    /// Validates `annotations` and writes them as the complete content of
    /// the workspace's current version. Returns the version written.
    ///
    /// The version's stored rotations are kept. The saved keys are
    /// authoritative: the snapshot is written with path keys, so nothing in
    /// it is migrated again on later loads.
    pub fn save_current_version(&self, ws: &WorkspaceId, annotations: &AnnotationMap) -> Result<VersionId> {
        self.save_version_data(ws, annotations, None)
    }

    /// [`save_current_version`](Self::save_current_version) that also
    /// replaces the version's per-image rotations.
    pub fn save_current_version_with_transforms(
        &self,
        ws: &WorkspaceId,
        annotations: &AnnotationMap,
        transforms: &TransformMap,
    ) -> Result<VersionId> {
        self.save_version_data(ws, annotations, Some(transforms))
    }

    /// The only write path for annotation data.
    fn save_version_data(
        &self,
        ws: &WorkspaceId,
        annotations: &AnnotationMap,
        transforms: Option<&TransformMap>,
    ) -> Result<VersionId> {
        let options = ValidateOptions {
            strict: self.config.strict_validation,
        };
        let report = match transforms {
            Some(transforms) => validate_version(annotations, transforms, &options),
            None => validate_annotations(annotations, &options),
        };
        if options.rejects(&report) {
            warn!(
                workspace = %ws,
                errors = report.error_count(),
                warnings = report.warning_count(),
                "refusing to save invalid annotations"
            );
            return Err(AnnostoreError::ValidationFailed {
                error_count: report.error_count(),
                warning_count: report.warning_count(),
                report,
            });
        }

        let guard = self.lock(ws);
        let mut index = self.versions.read_index(ws)?;
        let version_id = index.current_version_id.clone();

        let existing = self
            .versions
            .read_snapshot_or_cached(ws, &version_id)
            .map_err(|e| dangling_if_missing(e, ws, &version_id))?
            .document;

        let transforms = match (transforms, existing.key_scheme) {
            (Some(transforms), _) => transforms.clone(),
            // The caller's keys were migrated on load; move the stored
            // rotations the same way
            (None, KeyScheme::Legacy) => {
                migrate_with_transforms(existing.annotations.clone(), existing.transforms.clone())
                    .transforms
            }
            (None, KeyScheme::Path) => existing.transforms.clone(),
        };
        if existing.key_scheme == KeyScheme::Legacy {
            info!(workspace = %ws, version = %version_id, "storing migrated keys as path keys");
        }

        let now = Utc::now();
        let snapshot = VersionSnapshot {
            modified_at: now,
            key_scheme: KeyScheme::Path,
            annotations: annotations.clone(),
            transforms,
            ..existing
        };
        self.versions.write_snapshot(&guard, &snapshot)?;

        index.workspace.modified_at = now;
        self.versions.write_index(&guard, &index)?;

        debug!(workspace = %ws, version = %version_id, images = annotations.len(), "saved annotations");
        Ok(version_id)
    }

    // ------------------------------------------------------------------
    // Export ledger
    // ------------------------------------------------------------------

    /// Appends an export to the ledger.
    pub fn record_export(&self, ws: &WorkspaceId, record: ExportRecord) -> Result<()> {
        let guard = self.lock(ws);
        let index = self.versions.read_index(ws)?;
        if !index.lists(&record.version_id) {
            return Err(unknown_version(ws, &record.version_id));
        }

        let mut ledger = match self.read_ledger(ws) {
            Ok(ledger) => ledger,
            Err(AnnostoreError::DocumentNotFound { .. }) => {
                warn!(workspace = %ws, "export ledger missing; starting a new one");
                ExportLedger::empty(ws.clone())
            }
            Err(e) => return Err(e),
        };
        if ledger.exports.iter().any(|r| r.export_id == record.export_id) {
            return Err(AnnostoreError::DuplicateExportId {
                workspace_id: ws.clone(),
                export_id: record.export_id,
            });
        }

        info!(
            workspace = %ws,
            export = %record.export_id,
            format = %record.format,
            version = %record.version_id,
            "recorded export"
        );
        ledger.exports.push(record);
        self.storage
            .write_document(&guard, &self.ledger_path(ws), &ledger)
    }

    /// Every recorded export, oldest first.
    pub fn export_history(&self, ws: &WorkspaceId) -> Result<Vec<ExportRecord>> {
        self.versions.read_index(ws)?;
        match self.read_ledger(ws) {
            Ok(ledger) => Ok(ledger.exports),
            Err(AnnostoreError::DocumentNotFound { .. }) => {
                warn!(workspace = %ws, "export ledger missing");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    // ------------------------------------------------------------------
    // Versions
    // ------------------------------------------------------------------

    pub fn create_version(
        &self,
        ws: &WorkspaceId,
        new_id: &VersionId,
        source: Option<&VersionId>,
        description: Option<&str>,
    ) -> Result<VersionSnapshot> {
        let guard = self.lock(ws);
        self.versions
            .create_version_locked(&guard, ws, new_id, source, description)
    }

    pub fn switch_version(&self, ws: &WorkspaceId, version_id: &VersionId) -> Result<()> {
        let guard = self.lock(ws);
        self.versions.switch_version_locked(&guard, ws, version_id)
    }

    /// Deletes a non-current version that nobody has open.
    pub fn delete_version(&self, ws: &WorkspaceId, version_id: &VersionId) -> Result<()> {
        let guard = self.lock(ws);
        self.versions.delete_version_locked(&guard, ws, version_id)
    }

    pub fn list_versions(&self, ws: &WorkspaceId) -> Result<Vec<VersionSummary>> {
        self.versions.list_versions(ws)
    }

    pub fn load_version(&self, ws: &WorkspaceId, version_id: &VersionId) -> Result<VersionSnapshot> {
        self.versions.load_version(ws, version_id)
    }

    pub fn current_version_id(&self, ws: &WorkspaceId) -> Result<VersionId> {
        self.versions.current_version_id(ws)
    }

    // ------------------------------------------------------------------
    // Legacy import
    // ------------------------------------------------------------------

    /// Creates a new workspace from a legacy `cache.json`.
    ///
    /// The imported map and its rotations are stored as-is under the legacy
    /// key scheme, so the original keys stay on disk until a save replaces
    /// them. The cache file is only read.
    pub fn import_legacy_cache(&self, cache_path: &Path, options: WorkspaceOptions) -> Result<LegacyImport> {
        let cache = read_legacy_cache(cache_path)?;

        let migration =
            migrate_with_transforms(cache.annotations.clone(), cache.rotations.clone()).report;
        let key_scheme = if migration.is_clean() {
            KeyScheme::Path
        } else {
            KeyScheme::Legacy
        };
        let images = cache.annotations.len();
        let rotations = cache.rotations.len();

        let description = format!("Imported from {}", cache_path.display());
        let workspace = self.create_workspace_from(
            options,
            cache.annotations,
            cache.rotations,
            key_scheme,
            &description,
        )?;

        info!(
            workspace = %workspace.id,
            source = %cache_path.display(),
            images,
            rotations,
            "imported legacy cache"
        );
        Ok(LegacyImport {
            workspace,
            migration,
        })
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn lock(&self, ws: &WorkspaceId) -> WorkspaceGuard<'_> {
        self.storage.lock_workspace(&self.storage.workspace_dir(ws))
    }

    fn ledger_path(&self, ws: &WorkspaceId) -> PathBuf {
        self.storage.workspace_dir(ws).join(LEDGER_FILE)
    }

    fn read_ledger(&self, ws: &WorkspaceId) -> Result<ExportLedger> {
        self.storage
            .read_checked(&self.ledger_path(ws), |ledger: &ExportLedger| check_ledger_owner(ledger, ws))
    }

    fn read_ledger_or_cached(&self, ws: &WorkspaceId) -> Result<Recovered<ExportLedger>> {
        self.storage
            .read_checked_or_cached(&self.ledger_path(ws), |ledger: &ExportLedger| {
                check_ledger_owner(ledger, ws)
            })
    }
}

fn check_ledger_owner(ledger: &ExportLedger, ws: &WorkspaceId) -> std::result::Result<(), String> {
    if ledger.workspace_id != *ws {
        return Err(format!(
            "ledger belongs to workspace {}, not {}",
            ledger.workspace_id, ws
        ));
    }
    Ok(())
}

/// Unwraps a cache recovery into its document, noting the corruption.
fn recovered<D>(recovered: Recovered<D>, notices: &mut Vec<LoadNotice>) -> D {
    if let Some(AnnostoreError::StorageCorruption { path, message }) = recovered.corruption {
        notices.push(LoadNotice::RecoveredFromCache { path, message });
    }
    recovered.document
}
