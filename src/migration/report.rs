//! Migration report types.
//!
//! A migration never fails: every legacy key is either renamed or kept and
//! flagged. The report tells the caller which happened to each key so the
//! flagged ones can be shown to the user.

use std::fmt;

use crate::model::AnnotationKey;

/// What migration did with the annotation map.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MigrationReport {
    /// Legacy keys rewritten to their stable form.
    pub renamed: Vec<KeyRename>,
    /// Legacy keys kept unchanged because the rename was unsafe.
    pub warnings: Vec<KeyWarning>,
}

impl MigrationReport {
    /// Returns true if migration neither renamed nor flagged anything.
    pub fn is_clean(&self) -> bool {
        self.renamed.is_empty() && self.warnings.is_empty()
    }

    /// Returns true if any key needs the user's attention.
    pub fn needs_attention(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Number of warnings with the given code.
    pub fn count(&self, code: KeyWarningCode) -> usize {
        self.warnings.iter().filter(|w| w.code == code).count()
    }
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            return writeln!(f, "Migration: no legacy keys found");
        }

        writeln!(
            f,
            "Migration renamed {} key(s) and kept {} key(s) for review:",
            self.renamed.len(),
            self.warnings.len()
        )?;
        for rename in &self.renamed {
            writeln!(f, "  {} -> {}", rename.from, rename.to)?;
        }
        for warning in &self.warnings {
            writeln!(f, "  {}", warning)?;
        }
        Ok(())
    }
}

/// A legacy key rewritten to its stable form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyRename {
    pub from: AnnotationKey,
    pub to: AnnotationKey,
}

/// A legacy key that was kept unchanged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyWarning {
    pub code: KeyWarningCode,
    /// The legacy key, still present in the migrated map.
    pub key: AnnotationKey,
    /// The stable key the rename would have produced.
    pub target: AnnotationKey,
    pub message: String,
}

impl fmt::Display for KeyWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[WARN ] {:?} for {} (target {}): {}",
            self.code, self.key, self.target, self.message
        )
    }
}

/// Why a legacy key was not renamed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyWarningCode {
    /// The target key already exists, or several legacy keys share it.
    KeyCollision,
    /// The target itself looks like a legacy key, so stripping is ambiguous.
    NestedLegacyPrefix,
}
