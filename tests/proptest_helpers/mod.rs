#![allow(dead_code)]

use std::collections::BTreeMap;

use annostore::model::{
    AnnotationKey, AnnotationMap, AnnotationRecord, Point, ShapeType, TransformMap,
};
use proptest::prelude::*;
use proptest::strategy::BoxedStrategy;
use proptest::test_runner::{Config as ProptestConfig, FileFailurePersistence};

pub fn proptest_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(64);

    let mut config = ProptestConfig::with_failure_persistence(FileFailurePersistence::WithSource(
        "proptest-regressions",
    ));
    config.cases = cases;
    config.max_shrink_iters = 1024;
    config
}

/// One path segment: plain names, names with spaces or dots, and names that
/// look like legacy prefixed files.
pub fn segment_strategy() -> BoxedStrategy<String> {
    prop_oneof![
        4 => "[a-z0-9][a-z0-9_-]{0,7}",
        2 => "[a-z0-9]{1,6}\\.(jpg|png)",
        1 => "[A-Za-z][A-Za-z0-9 ]{0,6}[A-Za-z0-9]\\.jpg",
        1 => "[0-9]{4}_[a-z0-9]{1,4}\\.jpg",
    ]
    .boxed()
}

/// A relative key of one to three segments.
pub fn arb_key() -> BoxedStrategy<AnnotationKey> {
    proptest::collection::vec(segment_strategy(), 1..=3)
        .prop_map(|segments| AnnotationKey::parse(segments.join("/")).expect("generated key is valid"))
        .boxed()
}

/// Integer or half-integer coordinates, exact in JSON.
pub fn arb_coord() -> BoxedStrategy<f64> {
    (-4000i32..4000, any::<bool>())
        .prop_map(|(whole, half)| whole as f64 + if half { 0.5 } else { 0.0 })
        .boxed()
}

pub fn arb_point() -> BoxedStrategy<Point> {
    (arb_coord(), arb_coord())
        .prop_map(|(x, y)| Point::new(x, y))
        .boxed()
}

/// A record that always passes non-strict validation.
pub fn arb_record() -> BoxedStrategy<AnnotationRecord> {
    let shape = prop_oneof![
        Just((ShapeType::Box, 4usize, 4usize)),
        Just((ShapeType::Polygon, 3, 8)),
        Just((ShapeType::Mask, 2, 6)),
    ];

    (
        shape,
        "[A-Za-z0-9 #]{0,12}",
        proptest::option::of(any::<bool>()),
    )
        .prop_flat_map(|((shape_type, min, max), label, difficult)| {
            proptest::collection::vec(arb_point(), min..=max).prop_map(move |points| {
                let record = AnnotationRecord::new(shape_type, points, label.clone());
                match difficult {
                    Some(flag) => record.with_metadata("difficult", serde_json::Value::Bool(flag)),
                    None => record,
                }
            })
        })
        .boxed()
}

pub fn arb_annotation_map(max_images: usize, max_records: usize) -> BoxedStrategy<AnnotationMap> {
    proptest::collection::btree_map(
        arb_key(),
        proptest::collection::vec(arb_record(), 0..=max_records),
        0..=max_images,
    )
    .boxed()
}

/// Flat keys drawn from a tiny alphabet so that legacy prefixes, stable
/// names and nested prefixes collide often.
pub fn arb_legacy_key() -> BoxedStrategy<AnnotationKey> {
    let name = prop_oneof!["[ab]{1,2}\\.jpg", "000[0-2]_[ab]\\.jpg"];
    (proptest::option::of(0u16..4), name)
        .prop_map(|(prefix, name)| {
            let raw = match prefix {
                Some(n) => format!("{:04}_{}", n, name),
                None => name,
            };
            AnnotationKey::parse(raw).expect("generated key is valid")
        })
        .boxed()
}

pub fn arb_legacy_map(max_images: usize) -> BoxedStrategy<AnnotationMap> {
    proptest::collection::btree_map(
        arb_legacy_key(),
        proptest::collection::vec(arb_record(), 1..=2),
        0..=max_images,
    )
    .boxed()
}

/// Quarter-turn rotations over the same colliding key alphabet.
pub fn arb_legacy_transforms(max_images: usize) -> BoxedStrategy<TransformMap> {
    proptest::collection::btree_map(
        arb_legacy_key(),
        (0u8..4).prop_map(|turns| f64::from(turns) * 90.0),
        0..=max_images,
    )
    .boxed()
}

pub fn record_count(map: &AnnotationMap) -> usize {
    map.values().map(Vec::len).sum()
}

/// Keys grouped by their record lists, for loss checks that ignore keys.
pub fn records_by_json(map: &AnnotationMap) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for records in map.values() {
        let json = serde_json::to_string(records).expect("serialize records");
        *counts.entry(json).or_insert(0) += 1;
    }
    counts
}
