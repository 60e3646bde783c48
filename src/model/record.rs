//! Annotation records as drawn by a human annotator.
//!
//! Records are opaque to this crate beyond their shape: the engine stores
//! them, copies them between versions and checks that their geometry is
//! plausible, but never interprets labels or metadata.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::key::AnnotationKey;

/// Every image's records, keyed by stable annotation key.
pub type AnnotationMap = BTreeMap<AnnotationKey, Vec<AnnotationRecord>>;

/// Per-image display rotation in degrees, keyed like [`AnnotationMap`].
pub type TransformMap = BTreeMap<AnnotationKey, f64>;

/// The geometric kind of an annotation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeType {
    /// Axis-aligned or four-corner box.
    Box,
    /// Free-form closed polygon.
    Polygon,
    /// Region to be masked out of exported datasets.
    Mask,
}

impl ShapeType {
    /// Returns a short lowercase name, matching the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ShapeType::Box => "box",
            ShapeType::Polygon => "polygon",
            ShapeType::Mask => "mask",
        }
    }
}

/// A point in image pixel space. Serialized as `[x, y]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    /// Creates a new point.
    #[inline]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Returns true if both coordinates are finite.
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<[f64; 2]> for Point {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Point> for [f64; 2] {
    fn from(point: Point) -> Self {
        [point.x, point.y]
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// One annotation drawn on an image.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AnnotationRecord {
    pub shape_type: ShapeType,

    pub points: Vec<Point>,

    /// Transcription or class label. May be empty for unlabeled shapes.
    pub label: String,

    /// Free-form metadata owned by the collaborator that created the record.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl AnnotationRecord {
    /// Creates a record of any shape.
    pub fn new(
        shape_type: ShapeType,
        points: impl IntoIterator<Item = Point>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            shape_type,
            points: points.into_iter().collect(),
            label: label.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Creates a four-corner box from two opposite corners.
    pub fn rect(xmin: f64, ymin: f64, xmax: f64, ymax: f64, label: impl Into<String>) -> Self {
        Self::new(
            ShapeType::Box,
            [
                Point::new(xmin, ymin),
                Point::new(xmax, ymin),
                Point::new(xmax, ymax),
                Point::new(xmin, ymax),
            ],
            label,
        )
    }

    /// Creates a polygon from its vertices.
    pub fn polygon(points: impl IntoIterator<Item = Point>, label: impl Into<String>) -> Self {
        Self::new(ShapeType::Polygon, points, label)
    }

    /// Adds one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Signed-area-free bounding extent of the points, as (xmin, ymin, xmax, ymax).
    pub fn extent(&self) -> Option<(f64, f64, f64, f64)> {
        let first = self.points.first()?;
        Some(self.points.iter().fold(
            (first.x, first.y, first.x, first.y),
            |(x0, y0, x1, y1), p| (x0.min(p.x), y0.min(p.y), x1.max(p.x), y1.max(p.y)),
        ))
    }
}

/// Counts used in version listings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AnnotationStats {
    /// Keys with at least one record.
    pub annotated_images: usize,
    /// Total number of records across all keys.
    pub total_records: usize,
}

impl AnnotationStats {
    /// Computes statistics for a map.
    pub fn of(map: &AnnotationMap) -> Self {
        Self {
            annotated_images: map.values().filter(|records| !records.is_empty()).count(),
            total_records: map.values().map(Vec::len).sum(),
        }
    }
}
