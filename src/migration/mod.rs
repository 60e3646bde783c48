//! Migration of legacy index-prefixed annotation keys.
//!
//! Older releases keyed each image by its position in a sorted directory
//! walk: `0001_photo.jpg`, `0002_scan.png`, and so on. Inserting a single
//! file shifted every later index, so annotations silently attached to the
//! wrong image or disappeared. This module rewrites such keys to their
//! stable, path-derived form (`photo.jpg`).
//!
//! Migration never drops a record. When a rename would be ambiguous the
//! legacy key is kept unchanged and reported in a [`KeyWarning`]:
//! - [`KeyWarningCode::KeyCollision`]: the stable key already exists, or
//!   several legacy keys strip to the same stable key (none of them wins).
//! - [`KeyWarningCode::NestedLegacyPrefix`]: the stripped key still looks
//!   legacy, so a second pass would strip it again.
//!
//! Running [`migrate`] on its own output renames nothing and reports
//! exactly the same warnings.
//!
//! Image rotations are keyed the same way as annotations and must move with
//! them. [`migrate_with_transforms`] plans over the keys of both maps and
//! applies one set of renames to each.

pub mod legacy_cache;
mod report;

pub use report::{KeyRename, KeyWarning, KeyWarningCode, MigrationReport};

use std::collections::{BTreeSet, HashMap};

use tracing::warn;

use crate::model::{AnnotationKey, AnnotationMap, TransformMap};

/// Number of digits in a legacy enumeration prefix.
const LEGACY_PREFIX_DIGITS: usize = 4;

/// Separator between the legacy prefix and the file name.
const LEGACY_PREFIX_SEPARATOR: u8 = b'_';

/// The migrated maps together with the report of what changed.
#[derive(Clone, Debug, PartialEq)]
pub struct MigrationOutcome {
    pub annotations: AnnotationMap,
    pub transforms: TransformMap,
    pub report: MigrationReport,
}

/// Returns the stable key a legacy key strips to, or `None` if `key` is not
/// legacy.
///
/// Legacy keys were always flat (a single file name), so keys with a folder
/// never match.
pub fn legacy_target(key: &AnnotationKey) -> Option<AnnotationKey> {
    if !key.is_flat() {
        return None;
    }
    let bytes = key.as_str().as_bytes();
    if bytes.len() <= LEGACY_PREFIX_DIGITS + 1 {
        return None;
    }
    if !bytes[..LEGACY_PREFIX_DIGITS].iter().all(u8::is_ascii_digit)
        || bytes[LEGACY_PREFIX_DIGITS] != LEGACY_PREFIX_SEPARATOR
    {
        return None;
    }
    AnnotationKey::parse(&key.as_str()[LEGACY_PREFIX_DIGITS + 1..]).ok()
}

/// Returns true if any key in the map is in the legacy form.
///
/// Equivalent to "migrating this map would rename or flag something".
pub fn has_legacy_keys(annotations: &AnnotationMap) -> bool {
    annotations.keys().any(|key| legacy_target(key).is_some())
}

/// Rewrites legacy keys to stable keys without losing any record.
pub fn migrate(annotations: AnnotationMap) -> MigrationOutcome {
    migrate_with_transforms(annotations, TransformMap::new())
}

/// Rewrites legacy keys in both maps with a single rename plan.
///
/// A key that appears only in `transforms` is planned like any other, so a
/// rotation never stays behind on a key its annotations moved away from.
pub fn migrate_with_transforms(
    annotations: AnnotationMap,
    transforms: TransformMap,
) -> MigrationOutcome {
    let keys: BTreeSet<&AnnotationKey> = annotations.keys().chain(transforms.keys()).collect();
    let candidates: Vec<(AnnotationKey, AnnotationKey)> = keys
        .iter()
        .filter_map(|key| legacy_target(key).map(|target| ((*key).clone(), target)))
        .collect();

    if candidates.is_empty() {
        return MigrationOutcome {
            annotations,
            transforms,
            report: MigrationReport::default(),
        };
    }

    let mut claims: HashMap<&AnnotationKey, usize> = HashMap::new();
    for (_, target) in &candidates {
        *claims.entry(target).or_default() += 1;
    }

    let mut report = MigrationReport::default();
    let mut renames = Vec::new();

    for (key, target) in &candidates {
        let warning = if legacy_target(target).is_some() {
            Some((
                KeyWarningCode::NestedLegacyPrefix,
                "stripped key still carries a numeric prefix".to_string(),
            ))
        } else if keys.contains(target) {
            Some((
                KeyWarningCode::KeyCollision,
                "stable key already exists; both entries kept".to_string(),
            ))
        } else if claims[target] > 1 {
            Some((
                KeyWarningCode::KeyCollision,
                format!("{} legacy keys strip to the same stable key", claims[target]),
            ))
        } else {
            None
        };

        match warning {
            Some((code, message)) => {
                warn!(key = %key, target = %target, ?code, "legacy key kept unchanged");
                report.warnings.push(KeyWarning {
                    code,
                    key: key.clone(),
                    target: target.clone(),
                    message,
                });
            }
            None => renames.push((key.clone(), target.clone())),
        }
    }

    let mut migrated = annotations;
    let mut rotations = transforms;
    for (from, to) in renames {
        let records = migrated.remove(&from);
        let angle = rotations.remove(&from);
        if records.is_none() && angle.is_none() {
            continue;
        }
        if let Some(records) = records {
            migrated.insert(to.clone(), records);
        }
        if let Some(angle) = angle {
            rotations.insert(to.clone(), angle);
        }
        report.renamed.push(KeyRename { from, to });
    }

    MigrationOutcome {
        annotations: migrated,
        transforms: rotations,
        report,
    }
}
