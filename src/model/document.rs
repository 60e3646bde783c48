//! The three persisted document kinds and their in-memory views.
//!
//! Every document has an explicit schema: unknown fields and missing
//! required fields are rejected at parse time, and [`Document::check`]
//! enforces the cross-field rules serde cannot express. Nothing is
//! silently defaulted.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

use super::ids::{ExportId, VersionId, WorkspaceId};
use super::record::{AnnotationMap, TransformMap};

/// On-disk format number written into every document.
pub const FORMAT_VERSION: u32 = 1;

/// File name of the workspace index.
pub const INDEX_FILE: &str = "workspace.json";

/// File name of the export ledger.
pub const LEDGER_FILE: &str = "exports.json";

/// A persisted document with schema checks beyond what serde enforces.
pub trait Document: Serialize + DeserializeOwned {
    /// Human-readable document kind, used in log and error messages.
    const KIND: &'static str;

    /// Semantic validation run after a successful parse.
    fn check(&self) -> Result<(), String>;
}

fn check_format(format: u32) -> Result<(), String> {
    if format != FORMAT_VERSION {
        return Err(format!(
            "unsupported format {} (expected {})",
            format, FORMAT_VERSION
        ));
    }
    Ok(())
}

/// Identity and immutable settings of a workspace.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub display_name: String,
    pub description: String,
    /// Image root every annotation key is relative to. Never changes.
    pub root_image_dir: PathBuf,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// Whether a snapshot may still hold index-prefixed legacy keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyScheme {
    /// Keys may carry a `NNNN_` enumeration prefix; migrate on every load
    /// until the first save.
    Legacy,
    /// Keys are relative paths; load as stored.
    Path,
}

/// `workspace.json`: workspace metadata plus the version pointer and list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct IndexDocument {
    pub format: u32,
    pub workspace: Workspace,
    pub current_version_id: VersionId,
    pub version_list: Vec<VersionId>,
}

impl IndexDocument {
    /// Returns true if `version_id` is listed.
    pub fn lists(&self, version_id: &VersionId) -> bool {
        self.version_list.contains(version_id)
    }
}

impl Document for IndexDocument {
    const KIND: &'static str = "workspace index";

    fn check(&self) -> Result<(), String> {
        check_format(self.format)?;
        let mut seen = HashSet::new();
        for version in &self.version_list {
            if !seen.insert(version) {
                return Err(format!("version {} is listed twice", version));
            }
        }
        if !self.lists(&self.current_version_id) {
            return Err(format!(
                "current version {} is not in the version list",
                self.current_version_id
            ));
        }
        Ok(())
    }
}

/// `v{id}.json`: one complete, self-contained annotation snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VersionSnapshot {
    pub format: u32,
    pub workspace_id: WorkspaceId,
    pub version_id: VersionId,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    /// Provenance only; the source may since have been deleted.
    pub source_version_id: Option<VersionId>,
    pub description: String,
    pub key_scheme: KeyScheme,
    pub annotations: AnnotationMap,
    /// Image rotations, keyed under the same scheme as `annotations`.
    pub transforms: TransformMap,
}

impl VersionSnapshot {
    /// Creates an empty snapshot using path keys.
    pub fn empty(
        workspace_id: WorkspaceId,
        version_id: VersionId,
        description: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            format: FORMAT_VERSION,
            workspace_id,
            version_id,
            created_at: now,
            modified_at: now,
            source_version_id: None,
            description: description.into(),
            key_scheme: KeyScheme::Path,
            annotations: AnnotationMap::new(),
            transforms: TransformMap::new(),
        }
    }
}

impl Document for VersionSnapshot {
    const KIND: &'static str = "version snapshot";

    fn check(&self) -> Result<(), String> {
        check_format(self.format)
    }
}

/// One dataset export written by the export subsystem.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExportRecord {
    pub export_id: ExportId,
    pub timestamp: DateTime<Utc>,
    /// Free-form dataset format name, e.g. `"ppocr-det"`.
    pub format: String,
    pub output_path: PathBuf,
    pub version_id: VersionId,
}

impl ExportRecord {
    /// Creates a record stamped with a fresh id and the current time.
    pub fn new(
        format: impl Into<String>,
        output_path: impl Into<PathBuf>,
        version_id: VersionId,
    ) -> Self {
        Self {
            export_id: ExportId::generate(),
            timestamp: Utc::now(),
            format: format.into(),
            output_path: output_path.into(),
            version_id,
        }
    }
}

/// `exports.json`: the append-only export ledger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExportLedger {
    pub format: u32,
    pub workspace_id: WorkspaceId,
    pub exports: Vec<ExportRecord>,
}

impl ExportLedger {
    /// Creates an empty ledger.
    pub fn empty(workspace_id: WorkspaceId) -> Self {
        Self {
            format: FORMAT_VERSION,
            workspace_id,
            exports: Vec::new(),
        }
    }
}

impl Document for ExportLedger {
    const KIND: &'static str = "export ledger";

    fn check(&self) -> Result<(), String> {
        check_format(self.format)?;
        let mut seen = HashSet::new();
        for record in &self.exports {
            if !seen.insert(record.export_id) {
                return Err(format!("export {} is recorded twice", record.export_id));
            }
        }
        Ok(())
    }
}

/// In-memory view of a workspace index, including its export history.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkspaceIndex {
    pub workspace: Workspace,
    pub current_version_id: VersionId,
    pub version_list: Vec<VersionId>,
    pub export_history: Vec<ExportRecord>,
}

impl WorkspaceIndex {
    pub(crate) fn from_parts(index: IndexDocument, ledger: ExportLedger) -> Self {
        Self {
            workspace: index.workspace,
            current_version_id: index.current_version_id,
            version_list: index.version_list,
            export_history: ledger.exports,
        }
    }
}
