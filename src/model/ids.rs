//! Newtype IDs for workspaces, versions and export events.
//!
//! Workspace and version ids become file and directory names, so their
//! character set is restricted. Using newtypes also prevents passing a
//! version id where a workspace id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::AnnostoreError;

const MAX_ID_LEN: usize = 64;

fn check_identifier(kind: &'static str, value: &str) -> Result<(), AnnostoreError> {
    let reject = |reason: &str| AnnostoreError::InvalidIdentifier {
        kind,
        value: value.to_string(),
        reason: reason.to_string(),
    };

    if value.is_empty() {
        return Err(reject("must not be empty"));
    }
    if value.len() > MAX_ID_LEN {
        return Err(reject("must be at most 64 characters"));
    }
    if value.starts_with('.') {
        return Err(reject("must not start with '.'"));
    }
    if let Some(bad) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(reject(&format!("contains disallowed character {:?}", bad)));
    }
    Ok(())
}

/// Identifier of a workspace; also the name of its directory.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkspaceId(String);

impl WorkspaceId {
    /// Validates and wraps a workspace id.
    pub fn new(id: impl Into<String>) -> Result<Self, AnnostoreError> {
        let id = id.into();
        check_identifier("workspace id", &id)?;
        Ok(Self(id))
    }

    /// Generates a fresh random workspace id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Returns the underlying string.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for WorkspaceId {
    type Error = AnnostoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<WorkspaceId> for String {
    fn from(id: WorkspaceId) -> Self {
        id.0
    }
}

impl fmt::Debug for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WorkspaceId({})", self.0)
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a version snapshot within one workspace.
///
/// The snapshot for version `X` lives in `vX.json`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionId(String);

impl VersionId {
    /// Validates and wraps a version id.
    pub fn new(id: impl Into<String>) -> Result<Self, AnnostoreError> {
        let id = id.into();
        check_identifier("version id", &id)?;
        Ok(Self(id))
    }

    /// The id given to the first version of every new workspace.
    pub fn initial() -> Self {
        Self("1".to_string())
    }

    /// Returns the underlying string.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of this version's snapshot document.
    pub fn file_name(&self) -> String {
        format!("v{}.json", self.0)
    }

    /// Recovers a version id from a snapshot file name such as `v3.json`.
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let id = file_name.strip_prefix('v')?.strip_suffix(".json")?;
        Self::new(id).ok()
    }
}

impl TryFrom<String> for VersionId {
    type Error = AnnostoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<VersionId> for String {
    fn from(id: VersionId) -> Self {
        id.0
    }
}

impl fmt::Debug for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VersionId({})", self.0)
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one export event in the ledger.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExportId(pub Uuid);

impl ExportId {
    /// Generates a fresh random export id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[inline]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Debug for ExportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExportId({})", self.0)
    }
}

impl fmt::Display for ExportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
