//! Shape validation for annotation records.
//!
//! Annotation records are opaque to the storage engine except for their
//! geometry. Before a snapshot is persisted this module checks:
//! - Point sanity (at least one point, all coordinates finite)
//! - Point counts per shape type (boxes, polygons, masks)
//! - Data quality (degenerate shapes, empty labels, duplicated records)
//! - Image rotations (finite angles only)

mod report;

pub use report::{IssueCode, IssueContext, Severity, ValidationIssue, ValidationReport};

use crate::model::{AnnotationKey, AnnotationMap, AnnotationRecord, ShapeType, TransformMap};

/// Options for validation behavior.
#[derive(Clone, Debug, Default)]
pub struct ValidateOptions {
    /// If true, treat warnings as errors.
    pub strict: bool,
}

impl ValidateOptions {
    /// Returns true if `report` should block a save under these options.
    pub fn rejects(&self, report: &ValidationReport) -> bool {
        !report.is_ok() || (self.strict && report.warning_count() > 0)
    }
}

/// Validates every record in an annotation map.
///
/// Keys are not re-checked here: an [`AnnotationKey`] is well-formed by
/// construction.
pub fn validate_annotations(annotations: &AnnotationMap, _opts: &ValidateOptions) -> ValidationReport {
    let mut report = ValidationReport::new();

    for (key, records) in annotations {
        for (index, record) in records.iter().enumerate() {
            validate_record(key, index, record, &mut report);

            // Check for exact duplicates earlier in the same list
            if records[..index].contains(record) {
                report.add(ValidationIssue::warning(
                    IssueCode::DuplicateRecord,
                    "Identical record appears earlier for this image",
                    context(key, index),
                ));
            }
        }
    }

    report
}

/// Validates the records and rotations that make up one version.
pub fn validate_version(
    annotations: &AnnotationMap,
    transforms: &TransformMap,
    opts: &ValidateOptions,
) -> ValidationReport {
    let mut report = validate_annotations(annotations, opts);
    for issue in validate_transforms(transforms).issues {
        report.add(issue);
    }
    report
}

/// Validates per-image rotation angles.
///
/// A non-finite angle has no JSON form, so it could never be read back.
pub fn validate_transforms(transforms: &TransformMap) -> ValidationReport {
    let mut report = ValidationReport::new();
    for (key, angle) in transforms {
        if !angle.is_finite() {
            report.add(ValidationIssue::error(
                IssueCode::RotationNotFinite,
                format!("Rotation {} is not a finite angle", angle),
                IssueContext::Transform {
                    key: key.to_string(),
                },
            ));
        }
    }
    report
}

fn context(key: &AnnotationKey, index: usize) -> IssueContext {
    IssueContext::Record {
        key: key.to_string(),
        index,
    }
}

/// Validates a single record.
fn validate_record(
    key: &AnnotationKey,
    index: usize,
    record: &AnnotationRecord,
    report: &mut ValidationReport,
) {
    let count = record.points.len();

    if count == 0 {
        report.add(ValidationIssue::error(
            IssueCode::EmptyPoints,
            format!("{} has no points", record.shape_type.as_str()),
            context(key, index),
        ));
        return;
    }

    if let Some(pos) = record.points.iter().position(|p| !p.is_finite()) {
        report.add(ValidationIssue::error(
            IssueCode::PointNotFinite,
            format!("Point {} has a non-finite coordinate", pos),
            context(key, index),
        ));
        return;
    }

    let count_issue = match record.shape_type {
        ShapeType::Box if count != 2 && count != 4 => Some((
            IssueCode::BoxPointCount,
            format!("Box has {} points (expected 2 or 4)", count),
        )),
        ShapeType::Polygon if count < 3 => Some((
            IssueCode::PolygonTooFewPoints,
            format!("Polygon has {} points (need at least 3)", count),
        )),
        ShapeType::Mask if count < 2 => Some((
            IssueCode::MaskTooFewPoints,
            format!("Mask has {} point (need at least 2)", count),
        )),
        _ => None,
    };
    if let Some((code, message)) = count_issue {
        report.add(ValidationIssue::error(code, message, context(key, index)));
        return;
    }

    if let Some((xmin, ymin, xmax, ymax)) = record.extent() {
        if xmax - xmin <= 0.0 || ymax - ymin <= 0.0 {
            report.add(ValidationIssue::warning(
                IssueCode::DegenerateShape,
                format!(
                    "{} spans zero area ({}x{})",
                    record.shape_type.as_str(),
                    xmax - xmin,
                    ymax - ymin
                ),
                context(key, index),
            ));
        }
    }

    if record.label.is_empty() && record.shape_type != ShapeType::Mask {
        report.add(ValidationIssue::warning(
            IssueCode::EmptyLabel,
            "Empty label",
            context(key, index),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AnnotationRecord, Point};

    fn map_with(records: Vec<AnnotationRecord>) -> AnnotationMap {
        let mut map = AnnotationMap::new();
        map.insert(AnnotationKey::parse("img.jpg").unwrap(), records);
        map
    }

    #[test]
    fn test_valid_map_is_clean() {
        let map = map_with(vec![
            AnnotationRecord::rect(0.0, 0.0, 10.0, 10.0, "a"),
            AnnotationRecord::polygon([(0.0, 0.0).into(), (5.0, 0.0).into(), (5.0, 5.0).into()], "b"),
            AnnotationRecord::new(ShapeType::Mask, [(1.0, 1.0).into(), (4.0, 4.0).into()], ""),
        ]);
        let report = validate_annotations(&map, &ValidateOptions::default());
        assert!(report.is_clean(), "{}", report);
    }

    #[test]
    fn test_empty_points_is_error() {
        let map = map_with(vec![AnnotationRecord::new(ShapeType::Box, [], "x")]);
        let report = validate_annotations(&map, &ValidateOptions::default());
        assert!(report.has(IssueCode::EmptyPoints));
        assert!(!report.is_ok());
    }

    #[test]
    fn test_non_finite_point_is_error() {
        let map = map_with(vec![AnnotationRecord::new(
            ShapeType::Box,
            [Point::new(0.0, 0.0), Point::new(f64::NAN, 3.0)],
            "x",
        )]);
        let report = validate_annotations(&map, &ValidateOptions::default());
        assert!(report.has(IssueCode::PointNotFinite));
    }

    #[test]
    fn test_point_counts_per_shape() {
        let map = map_with(vec![
            AnnotationRecord::new(ShapeType::Box, [(0.0, 0.0).into(); 3], "x"),
            AnnotationRecord::polygon([(0.0, 0.0).into(), (1.0, 1.0).into()], "y"),
            AnnotationRecord::new(ShapeType::Mask, [(0.0, 0.0).into()], ""),
        ]);
        let report = validate_annotations(&map, &ValidateOptions::default());
        assert!(report.has(IssueCode::BoxPointCount));
        assert!(report.has(IssueCode::PolygonTooFewPoints));
        assert!(report.has(IssueCode::MaskTooFewPoints));
        assert_eq!(report.error_count(), 3);
    }

    #[test]
    fn test_warnings_do_not_block_unless_strict() {
        let record = AnnotationRecord::rect(5.0, 5.0, 5.0, 9.0, "");
        let map = map_with(vec![record.clone(), record]);
        let report = validate_annotations(&map, &ValidateOptions::default());
        assert!(report.has(IssueCode::DegenerateShape));
        assert!(report.has(IssueCode::EmptyLabel));
        assert!(report.has(IssueCode::DuplicateRecord));
        assert!(report.is_ok());

        assert!(!ValidateOptions::default().rejects(&report));
        assert!(ValidateOptions { strict: true }.rejects(&report));
    }

    #[test]
    fn test_non_finite_rotation_is_error() {
        let mut transforms = TransformMap::new();
        transforms.insert(AnnotationKey::parse("a.jpg").unwrap(), 90.0);
        transforms.insert(AnnotationKey::parse("b.jpg").unwrap(), f64::INFINITY);

        let report = validate_version(&AnnotationMap::new(), &transforms, &ValidateOptions::default());
        assert_eq!(report.error_count(), 1);
        assert!(report.has(IssueCode::RotationNotFinite));
        assert!(report.to_string().contains("b.jpg rotation"));
    }

    #[test]
    fn test_report_display_mentions_key() {
        let map = map_with(vec![AnnotationRecord::new(ShapeType::Box, [], "x")]);
        let report = validate_annotations(&map, &ValidateOptions::default());
        let text = report.to_string();
        assert!(text.contains("img.jpg record #0"));
        assert!(text.contains("EmptyPoints"));
    }
}
