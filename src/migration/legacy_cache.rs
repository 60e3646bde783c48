//! Reader for the legacy single-file annotation cache (`cache.json`).
//!
//! Two layouts exist in the wild:
//! - `{ "annotations": { key: [record, ...] }, "rotations": { key: angle } }`
//! - a bare `{ key: [record, ...] }` map written by the oldest releases.
//!
//! Legacy records look like:
//!
//! ```json
//! { "points": [[0, 0], [10, 0], [10, 5], [0, 5]],
//!   "transcription": "TOTAL", "difficult": false, "shape": "Quad" }
//! ```
//!
//! `Quad` maps to [`ShapeType::Box`], `Polygon` to [`ShapeType::Polygon`] and
//! any `Mask*` shape to [`ShapeType::Mask`]. A record without a shape is a box
//! when it has four points and a polygon otherwise. Every field besides
//! `points`, `transcription` and `shape` is kept in the record metadata, and
//! a mask's original shape name is kept under `legacyShape`.
//!
//! Keys are imported verbatim. They usually carry the legacy enumeration
//! prefix and are normalized later by [`migrate`](super::migrate).

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{AnnostoreError, Result};
use crate::model::{AnnotationKey, AnnotationMap, AnnotationRecord, Point, ShapeType, TransformMap};

/// Metadata key under which a mask's original shape name is kept.
pub const LEGACY_SHAPE_METADATA: &str = "legacyShape";

/// A parsed legacy cache.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LegacyCache {
    pub annotations: AnnotationMap,
    /// Per-image rotation angles in degrees. Imported as the first
    /// version's transforms.
    pub rotations: TransformMap,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCache {
    Wrapped {
        annotations: BTreeMap<String, Vec<RawRecord>>,
        #[serde(default)]
        rotations: BTreeMap<String, f64>,
    },
    Bare(BTreeMap<String, Vec<RawRecord>>),
}

#[derive(Deserialize)]
struct RawRecord {
    points: Vec<[f64; 2]>,
    #[serde(default)]
    transcription: Option<String>,
    #[serde(default)]
    shape: Option<String>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

/// Reads and converts a legacy cache file. The file is only read.
pub fn read_legacy_cache(path: &Path) -> Result<LegacyCache> {
    let bytes = fs::read(path).map_err(|source| AnnostoreError::io(path, source))?;
    from_legacy_slice(&bytes).map_err(|message| AnnostoreError::LegacyCacheParse {
        path: path.to_path_buf(),
        message,
    })
}

/// Parses a legacy cache from memory.
///
/// Useful for fuzzing and for tests without file I/O.
pub fn from_legacy_slice(bytes: &[u8]) -> std::result::Result<LegacyCache, String> {
    let raw: RawCache = serde_json::from_slice(bytes)
        .map_err(|e| format!("not a legacy annotation cache: {}", e))?;

    let (raw_annotations, raw_rotations) = match raw {
        RawCache::Wrapped {
            annotations,
            rotations,
        } => (annotations, rotations),
        RawCache::Bare(annotations) => (annotations, BTreeMap::new()),
    };

    let mut annotations = AnnotationMap::new();
    for (raw_key, raw_records) in raw_annotations {
        let key = parse_key(&raw_key)?;
        let records = raw_records
            .into_iter()
            .enumerate()
            .map(|(index, record)| {
                convert_record(record).map_err(|e| format!("{} record #{}: {}", raw_key, index, e))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        annotations.insert(key, records);
    }

    let mut rotations = TransformMap::new();
    for (raw_key, angle) in raw_rotations {
        rotations.insert(parse_key(&raw_key)?, angle);
    }

    Ok(LegacyCache {
        annotations,
        rotations,
    })
}

fn parse_key(raw: &str) -> std::result::Result<AnnotationKey, String> {
    AnnotationKey::parse(raw).map_err(|e| e.to_string())
}

fn convert_record(raw: RawRecord) -> std::result::Result<AnnotationRecord, String> {
    let shape_name = raw.shape.unwrap_or_else(|| {
        if raw.points.len() == 4 {
            "Quad".to_string()
        } else {
            "Polygon".to_string()
        }
    });

    let shape_type = match shape_name.as_str() {
        "Quad" => ShapeType::Box,
        "Polygon" => ShapeType::Polygon,
        name if name.starts_with("Mask") => ShapeType::Mask,
        other => return Err(format!("unknown shape '{}'", other)),
    };

    let mut record = AnnotationRecord::new(
        shape_type,
        raw.points.into_iter().map(Point::from),
        raw.transcription.unwrap_or_default(),
    );
    record.metadata = raw.extra;
    if shape_type == ShapeType::Mask {
        record
            .metadata
            .insert(LEGACY_SHAPE_METADATA.to_string(), Value::String(shape_name));
    }
    Ok(record)
}
