use std::path::PathBuf;
use thiserror::Error;

use crate::model::{ExportId, VersionId, WorkspaceId};
use crate::validation::ValidationReport;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AnnostoreError>;

/// The main error type for annostore operations.
#[derive(Debug, Error)]
pub enum AnnostoreError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Key derivation or key parsing escaped the workspace root or produced
    /// a non-canonical key.
    #[error("Invalid annotation path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Invalid {kind} '{value}': {reason}")]
    InvalidIdentifier {
        kind: &'static str,
        value: String,
        reason: String,
    },

    /// The document exists but is unparsable or fails schema checks. The
    /// file on disk is left untouched.
    #[error("Corrupt document {path}: {message}")]
    StorageCorruption { path: PathBuf, message: String },

    /// A corrupt document could not be copied aside, so nothing may
    /// replace or remove it.
    #[error("Corrupt document {path} could not be copied aside; refusing to overwrite it")]
    CorruptDocumentNotPreserved { path: PathBuf },

    #[error("Document not found: {path}")]
    DocumentNotFound { path: PathBuf },

    #[error("Failed to serialize document for {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The index lists a version whose snapshot file is missing.
    #[error("Workspace {workspace_id} references version {version_id} but its snapshot is missing")]
    DanglingVersionReference {
        workspace_id: WorkspaceId,
        version_id: VersionId,
    },

    #[error("Version {version_id} already exists in workspace {workspace_id}")]
    DuplicateVersionId {
        workspace_id: WorkspaceId,
        version_id: VersionId,
    },

    #[error("Unknown version {version_id} in workspace {workspace_id}")]
    UnknownVersion {
        workspace_id: WorkspaceId,
        version_id: VersionId,
    },

    #[error("Cannot delete version {version_id}: it is the current version (switch first)")]
    CannotDeleteCurrentVersion { version_id: VersionId },

    #[error("Cannot delete version {version_id}: it is the only version in the workspace")]
    CannotDeleteLastVersion { version_id: VersionId },

    /// A repair was asked to forget a version whose snapshot still exists.
    #[error("Version {version_id} still has a snapshot file; delete it instead of forgetting it")]
    VersionNotDangling { version_id: VersionId },

    #[error("Unknown workspace: {0}")]
    UnknownWorkspace(WorkspaceId),

    #[error("Workspace already exists: {0}")]
    WorkspaceExists(WorkspaceId),

    #[error("Workspace {workspace_id} has {open} open version lease(s)")]
    WorkspaceInUse {
        workspace_id: WorkspaceId,
        open: usize,
    },

    #[error("Version {version_id} has {open} open lease(s)")]
    VersionInUse { version_id: VersionId, open: usize },

    #[error("Export {export_id} is already recorded in workspace {workspace_id}")]
    DuplicateExportId {
        workspace_id: WorkspaceId,
        export_id: ExportId,
    },

    #[error("Validation failed with {error_count} error(s) and {warning_count} warning(s)")]
    ValidationFailed {
        error_count: usize,
        warning_count: usize,
        report: ValidationReport,
    },

    #[error("Failed to parse legacy annotation cache {path}: {message}")]
    LegacyCacheParse { path: PathBuf, message: String },

    #[error("Failed to load config from {path}: {message}")]
    Config { path: PathBuf, message: String },
}

impl AnnostoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AnnostoreError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corruption(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        AnnostoreError::StorageCorruption {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Returns true for errors that indicate a damaged document on disk.
    pub fn is_corruption(&self) -> bool {
        matches!(self, AnnostoreError::StorageCorruption { .. })
    }
}
