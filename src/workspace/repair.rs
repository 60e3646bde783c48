//! Consistency checks between a workspace's index and its files.
//!
//! [`WorkspaceManager::repair_workspace`] only reports. Nothing is deleted or
//! rewritten until the caller picks a resolution such as
//! [`WorkspaceManager::adopt_orphaned_version`] or
//! [`WorkspaceManager::forget_dangling_version`].

use std::fmt;
use std::path::PathBuf;

use chrono::Utc;
use tracing::{info, warn};

use super::WorkspaceManager;
use crate::error::{AnnostoreError, Result};
use crate::model::{VersionId, WorkspaceId};
use crate::version::unknown_version;

/// Everything found wrong with one workspace.
#[derive(Debug, Default)]
pub struct RepairReport {
    pub workspace_id: Option<WorkspaceId>,
    pub issues: Vec<RepairIssue>,
}

impl RepairReport {
    /// Returns true if nothing needs attention.
    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty()
    }

    /// Returns true if any issue points at lost or unreadable data, as
    /// opposed to leftovers that are safe to ignore.
    pub fn has_data_issues(&self) -> bool {
        self.issues.iter().any(RepairIssue::affects_data)
    }

    /// Versions listed in the index without a snapshot file.
    pub fn dangling_versions(&self) -> Vec<&VersionId> {
        self.issues
            .iter()
            .filter_map(|issue| match issue {
                RepairIssue::DanglingVersion { version_id, .. } => Some(version_id),
                _ => None,
            })
            .collect()
    }

    /// Snapshot files the index does not list.
    pub fn orphaned_versions(&self) -> Vec<&VersionId> {
        self.issues
            .iter()
            .filter_map(|issue| match issue {
                RepairIssue::OrphanedVersion { version_id, .. } => Some(version_id),
                _ => None,
            })
            .collect()
    }
}

impl fmt::Display for RepairReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self
            .workspace_id
            .as_ref()
            .map(WorkspaceId::as_str)
            .unwrap_or("workspace");

        if self.issues.is_empty() {
            return writeln!(f, "Repair check of {}: no issues found", name);
        }

        writeln!(f, "Repair check of {} found {} issue(s):", name, self.issues.len())?;
        writeln!(f)?;
        for issue in &self.issues {
            writeln!(f, "  {}", issue)?;
        }
        Ok(())
    }
}

/// One inconsistency between the index and the files on disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RepairIssue {
    /// Listed in the index, but the snapshot file is missing.
    DanglingVersion { version_id: VersionId, is_current: bool },
    /// Listed in the index, but the snapshot file is unreadable.
    CorruptVersion { version_id: VersionId, message: String },
    /// A snapshot file the index does not list.
    OrphanedVersion { version_id: VersionId, loadable: bool },
    /// `exports.json` does not exist.
    LedgerMissing,
    /// `exports.json` is unreadable.
    LedgerCorrupt { message: String },
    /// A temp file left by an interrupted write. Safe to delete.
    StaleTempFile { path: PathBuf },
    /// A byte-exact copy of a document that was found corrupt.
    QuarantineCopy { path: PathBuf },
}

impl RepairIssue {
    fn affects_data(&self) -> bool {
        !matches!(
            self,
            RepairIssue::StaleTempFile { .. } | RepairIssue::QuarantineCopy { .. }
        )
    }
}

impl fmt::Display for RepairIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepairIssue::DanglingVersion {
                version_id,
                is_current: true,
            } => write!(f, "current version {} has no snapshot file", version_id),
            RepairIssue::DanglingVersion { version_id, .. } => {
                write!(f, "version {} has no snapshot file", version_id)
            }
            RepairIssue::CorruptVersion { version_id, message } => {
                write!(f, "version {} is corrupt: {}", version_id, message)
            }
            RepairIssue::OrphanedVersion {
                version_id,
                loadable,
            } => write!(
                f,
                "snapshot file for version {} is not listed ({})",
                version_id,
                if *loadable { "loadable" } else { "unreadable" }
            ),
            RepairIssue::LedgerMissing => write!(f, "export ledger is missing"),
            RepairIssue::LedgerCorrupt { message } => {
                write!(f, "export ledger is corrupt: {}", message)
            }
            RepairIssue::StaleTempFile { path } => {
                write!(f, "stale temp file {}", path.display())
            }
            RepairIssue::QuarantineCopy { path } => {
                write!(f, "quarantined copy {}", path.display())
            }
        }
    }
}

impl WorkspaceManager {
    /// Compares the index against the files on disk and reports every
    /// inconsistency. Never modifies anything.
    ///
    /// Fails only if the index itself cannot be read.
    pub fn repair_workspace(&self, ws: &WorkspaceId) -> Result<RepairReport> {
        let dir = self.storage.workspace_dir(ws);
        let _guard = self.storage.lock_workspace(&dir);

        let index = self.versions.read_index(ws)?;
        let mut report = RepairReport {
            workspace_id: Some(ws.clone()),
            issues: Vec::new(),
        };

        for version_id in &index.version_list {
            match self.versions.read_snapshot(ws, version_id) {
                Ok(_) => {}
                Err(AnnostoreError::DocumentNotFound { .. }) => {
                    report.issues.push(RepairIssue::DanglingVersion {
                        version_id: version_id.clone(),
                        is_current: *version_id == index.current_version_id,
                    })
                }
                Err(AnnostoreError::StorageCorruption { message, .. }) => {
                    report.issues.push(RepairIssue::CorruptVersion {
                        version_id: version_id.clone(),
                        message,
                    })
                }
                Err(e) => return Err(e),
            }
        }

        for version_id in self.storage.list_version_files(&dir)? {
            if index.lists(&version_id) {
                continue;
            }
            let loadable = self.versions.read_snapshot(ws, &version_id).is_ok();
            report.issues.push(RepairIssue::OrphanedVersion {
                version_id,
                loadable,
            });
        }

        match self.read_ledger(ws) {
            Ok(_) => {}
            Err(AnnostoreError::DocumentNotFound { .. }) => {
                report.issues.push(RepairIssue::LedgerMissing)
            }
            Err(AnnostoreError::StorageCorruption { message, .. }) => {
                report.issues.push(RepairIssue::LedgerCorrupt { message })
            }
            Err(e) => return Err(e),
        }

        // Listed last: the reads above may have just quarantined something
        for path in self.storage.list_stale_temp_files(&dir)? {
            report.issues.push(RepairIssue::StaleTempFile { path });
        }
        for path in self.storage.list_quarantine_files(&dir)? {
            report.issues.push(RepairIssue::QuarantineCopy { path });
        }

        if report.is_healthy() {
            info!(workspace = %ws, "repair check found no issues");
        } else {
            warn!(workspace = %ws, issues = report.issues.len(), "repair check found issues");
        }
        Ok(report)
    }

    /// Adds a loadable orphaned snapshot file back to the version list.
    pub fn adopt_orphaned_version(&self, ws: &WorkspaceId, version_id: &VersionId) -> Result<()> {
        let dir = self.storage.workspace_dir(ws);
        let guard = self.storage.lock_workspace(&dir);

        let mut index = self.versions.read_index(ws)?;
        if index.lists(version_id) {
            return Err(AnnostoreError::DuplicateVersionId {
                workspace_id: ws.clone(),
                version_id: version_id.clone(),
            });
        }
        self.versions
            .read_snapshot(ws, version_id)
            .map_err(|e| match e {
                AnnostoreError::DocumentNotFound { .. } => unknown_version(ws, version_id),
                other => other,
            })?;

        index.version_list.push(version_id.clone());
        index.workspace.modified_at = Utc::now();
        self.versions.write_index(&guard, &index)?;

        info!(workspace = %ws, version = %version_id, "adopted orphaned version");
        Ok(())
    }

    /// Removes a non-current version whose snapshot file is missing from the
    /// version list.
    pub fn forget_dangling_version(&self, ws: &WorkspaceId, version_id: &VersionId) -> Result<()> {
        let dir = self.storage.workspace_dir(ws);
        let guard = self.storage.lock_workspace(&dir);

        let mut index = self.versions.read_index(ws)?;
        if !index.lists(version_id) {
            return Err(unknown_version(ws, version_id));
        }
        if index.current_version_id == *version_id {
            return Err(AnnostoreError::CannotDeleteCurrentVersion {
                version_id: version_id.clone(),
            });
        }
        if self.versions.snapshot_path(ws, version_id).exists() {
            return Err(AnnostoreError::VersionNotDangling {
                version_id: version_id.clone(),
            });
        }

        index.version_list.retain(|v| v != version_id);
        index.workspace.modified_at = Utc::now();
        self.versions.write_index(&guard, &index)?;

        info!(workspace = %ws, version = %version_id, "forgot dangling version");
        Ok(())
    }
}
