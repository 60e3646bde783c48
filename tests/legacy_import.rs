use std::fs;
use std::path::Path;

use annostore::migration::KeyWarningCode;
use annostore::model::{AnnotationKey, ShapeType};
use annostore::workspace::WorkspaceOptions;
use annostore::AnnostoreError;
use serde_json::json;

mod common;

use common::{key, labeled_box, manager, read_json, write_json};

fn quad(label: &str) -> serde_json::Value {
    json!({
        "points": [[0, 0], [10, 0], [10, 5], [0, 5]],
        "transcription": label,
        "difficult": false,
        "shape": "Quad"
    })
}

fn snapshot_keys(path: &Path) -> Vec<String> {
    read_json(path)["annotations"]
        .as_object()
        .expect("annotations object")
        .keys()
        .cloned()
        .collect()
}

#[test]
fn prefixed_keys_are_migrated_on_load_and_rewritten_on_save() {
    let root = tempfile::tempdir().expect("tempdir");
    let cache_path = root.path().join("cache.json");
    write_json(
        &cache_path,
        &json!({
            "annotations": {
                "0001_7.jpg": [quad("TOTAL")],
                "0002_8422.jpg": [quad("DATE")],
                "0003_8423.jpg": []
            },
            "rotations": { "0002_8422.jpg": 90.0 }
        }),
    );
    let cache_before = fs::read(&cache_path).expect("read cache");

    let m = manager(root.path());
    let import = m
        .import_legacy_cache(&cache_path, WorkspaceOptions::new("Old", root.path().join("images")))
        .expect("import");
    assert_eq!(import.migration.renamed.len(), 3);
    assert!(import.migration.warnings.is_empty());
    assert_eq!(fs::read(&cache_path).expect("read cache"), cache_before);

    let ws = import.workspace.id;
    let snapshot_path = m.workspace_dir(&ws).join("v1.json");

    // Loading migrates in memory only
    let loaded = m.load_workspace(&ws).expect("load");
    let keys: Vec<&str> = loaded.annotations.keys().map(AnnotationKey::as_str).collect();
    assert_eq!(keys, vec!["7.jpg", "8422.jpg", "8423.jpg"]);
    assert_eq!(loaded.annotations[&key("7.jpg")][0].label, "TOTAL");
    assert_eq!(loaded.annotations[&key("7.jpg")][0].shape_type, ShapeType::Box);
    assert_eq!(loaded.migration.renamed.len(), 3);
    assert_eq!(loaded.transforms.get(&key("8422.jpg")), Some(&90.0));
    assert_eq!(
        snapshot_keys(&snapshot_path),
        vec!["0001_7.jpg", "0002_8422.jpg", "0003_8423.jpg"]
    );
    assert_eq!(read_json(&snapshot_path)["keyScheme"], "legacy");
    assert_eq!(read_json(&snapshot_path)["transforms"]["0002_8422.jpg"], 90.0);

    // The first save persists the new keys and stops further migration
    m.save_current_version(&ws, &loaded.annotations).expect("save");
    drop(loaded);
    assert_eq!(snapshot_keys(&snapshot_path), vec!["7.jpg", "8422.jpg", "8423.jpg"]);
    assert_eq!(read_json(&snapshot_path)["keyScheme"], "path");
    assert_eq!(read_json(&snapshot_path)["transforms"], json!({ "8422.jpg": 90.0 }));

    let reloaded = m.load_workspace(&ws).expect("reload");
    assert!(reloaded.migration.is_clean());
    assert_eq!(reloaded.annotations.len(), 3);
    assert_eq!(reloaded.transforms.get(&key("8422.jpg")), Some(&90.0));
}

#[test]
fn colliding_legacy_key_is_kept_and_flagged() {
    let root = tempfile::tempdir().expect("tempdir");
    let cache_path = root.path().join("cache.json");
    write_json(
        &cache_path,
        &json!({
            "0001_a.jpg": [quad("legacy")],
            "a.jpg": [quad("current")]
        }),
    );

    let m = manager(root.path());
    let import = m
        .import_legacy_cache(&cache_path, WorkspaceOptions::new("Clash", "/images"))
        .expect("import");
    assert_eq!(import.migration.count(KeyWarningCode::KeyCollision), 1);

    let loaded = m.load_workspace(&import.workspace.id).expect("load");
    assert_eq!(loaded.annotations.len(), 2);
    assert_eq!(loaded.annotations[&key("0001_a.jpg")][0].label, "legacy");
    assert_eq!(loaded.annotations[&key("a.jpg")][0].label, "current");
    assert!(loaded.migration.needs_attention());
    assert_eq!(loaded.migration.warnings[0].key, key("0001_a.jpg"));

    // Saving accepts the kept key as it is
    m.save_current_version(&import.workspace.id, &loaded.annotations)
        .expect("save");
    drop(loaded);
    let snapshot_path = m.workspace_dir(&import.workspace.id).join("v1.json");
    assert_eq!(read_json(&snapshot_path)["keyScheme"], "path");

    let reloaded = m.load_workspace(&import.workspace.id).expect("reload");
    assert_eq!(snapshot_keys(&snapshot_path), vec!["0001_a.jpg", "a.jpg"]);
    assert_eq!(reloaded.annotations[&key("0001_a.jpg")][0].label, "legacy");
    assert!(reloaded.migration.is_clean());
}

#[test]
fn images_added_after_import_keep_their_names() {
    let root = tempfile::tempdir().expect("tempdir");
    let cache_path = root.path().join("cache.json");
    write_json(
        &cache_path,
        &json!({
            "0001_a.jpg": [quad("legacy")],
            "a.jpg": [quad("current")]
        }),
    );

    let m = manager(root.path());
    let import = m
        .import_legacy_cache(&cache_path, WorkspaceOptions::new("Scans", "/images"))
        .expect("import");
    let ws = import.workspace.id;

    // Real file names that happen to look like enumeration prefixes
    let mut annotations = m.load_workspace(&ws).expect("load").annotations;
    annotations.insert(key("2024_scan.jpg"), vec![labeled_box("scan")]);
    annotations.insert(key("0005_b.jpg"), vec![labeled_box("b")]);
    m.save_current_version(&ws, &annotations).expect("save");

    let reloaded = manager(root.path()).load_workspace(&ws).expect("reload");
    assert_eq!(reloaded.annotations, annotations);
    let keys: Vec<&str> = reloaded.annotations.keys().map(AnnotationKey::as_str).collect();
    assert_eq!(keys, vec!["0001_a.jpg", "0005_b.jpg", "2024_scan.jpg", "a.jpg"]);
}

#[test]
fn rotations_on_colliding_keys_stay_with_their_images() {
    let root = tempfile::tempdir().expect("tempdir");
    let cache_path = root.path().join("cache.json");
    write_json(
        &cache_path,
        &json!({
            "annotations": { "0001_a.jpg": [quad("x")], "0002_b.jpg": [] },
            "rotations": { "0001_a.jpg": 180.0, "a.jpg": 90.0, "0002_b.jpg": 270.0 }
        }),
    );

    let m = manager(root.path());
    let import = m
        .import_legacy_cache(&cache_path, WorkspaceOptions::new("Turned", "/images"))
        .expect("import");
    assert_eq!(import.migration.count(KeyWarningCode::KeyCollision), 1);

    let loaded = m.load_workspace(&import.workspace.id).expect("load");
    assert_eq!(loaded.transforms.get(&key("0001_a.jpg")), Some(&180.0));
    assert_eq!(loaded.transforms.get(&key("a.jpg")), Some(&90.0));
    assert_eq!(loaded.transforms.get(&key("b.jpg")), Some(&270.0));
    assert!(loaded.annotations.contains_key(&key("b.jpg")));
}

#[test]
fn cache_without_prefixes_imports_as_path_keys() {
    let root = tempfile::tempdir().expect("tempdir");
    let cache_path = root.path().join("cache.json");
    write_json(&cache_path, &json!({ "annotations": { "scan.png": [quad("x")] } }));

    let m = manager(root.path());
    let import = m
        .import_legacy_cache(&cache_path, WorkspaceOptions::new("Plain", "/images"))
        .expect("import");
    assert!(import.migration.is_clean());

    let snapshot_path = m.workspace_dir(&import.workspace.id).join("v1.json");
    assert_eq!(read_json(&snapshot_path)["keyScheme"], "path");
}

#[test]
fn invalid_cache_creates_nothing() {
    let root = tempfile::tempdir().expect("tempdir");
    let cache_path = root.path().join("cache.json");
    write_json(
        &cache_path,
        &json!({ "0001_a.jpg": [{ "points": [[0, 0]], "shape": "Ellipse" }] }),
    );

    let m = manager(root.path());
    let err = m
        .import_legacy_cache(&cache_path, WorkspaceOptions::new("Bad", "/images"))
        .expect_err("unknown shape");
    assert!(matches!(err, AnnostoreError::LegacyCacheParse { .. }), "{}", err);
    assert!(err.to_string().contains("Ellipse"));
    assert!(m.list_workspaces().expect("list").is_empty());
}

#[test]
fn missing_cache_is_an_io_error() {
    let root = tempfile::tempdir().expect("tempdir");
    let m = manager(root.path());
    let err = m
        .import_legacy_cache(&root.path().join("nope.json"), WorkspaceOptions::new("None", "/images"))
        .expect_err("missing");
    assert!(matches!(err, AnnostoreError::Io { .. }), "{}", err);
}
