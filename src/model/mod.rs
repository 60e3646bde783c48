//! Data model for annotation workspaces.
//!
//! This module defines the identifiers, annotation records and persisted
//! documents that the rest of the crate moves around.
//!
//! # Design Principles
//!
//! 1. **Stable identity**: an image is identified by its path relative to
//!    the workspace root ([`AnnotationKey`]), never by its position in a
//!    directory listing.
//!
//! 2. **Full snapshots**: a [`VersionSnapshot`] holds every record of the
//!    workspace, so any non-current version can be deleted on its own.
//!
//! 3. **Strict schemas**: documents reject unknown or missing fields, so a
//!    damaged file surfaces as corruption rather than as an empty default.
//!
//! # Example
//!
//! ```
//! use std::path::Path;
//! use annostore::model::{derive_key, AnnotationMap, AnnotationRecord};
//!
//! let key = derive_key(Path::new("/data/receipts"), Path::new("/data/receipts/2024/r1.jpg"))
//!     .unwrap();
//! assert_eq!(key.as_str(), "2024/r1.jpg");
//!
//! let mut annotations = AnnotationMap::new();
//! annotations.insert(key, vec![AnnotationRecord::rect(10.0, 20.0, 110.0, 60.0, "TOTAL")]);
//! ```

mod document;
mod ids;
mod key;
mod record;

pub use document::{
    Document, ExportLedger, ExportRecord, IndexDocument, KeyScheme, VersionSnapshot, Workspace,
    WorkspaceIndex, FORMAT_VERSION, INDEX_FILE, LEDGER_FILE,
};
pub use ids::{ExportId, VersionId, WorkspaceId};
pub use key::{derive_key, AnnotationKey, KEY_SEPARATOR};
pub use record::{
    AnnotationMap, AnnotationRecord, AnnotationStats, Point, ShapeType, TransformMap,
};
