#![allow(dead_code)]

use std::fs;
use std::path::Path;

use annostore::model::{AnnotationKey, AnnotationMap, AnnotationRecord};
use annostore::{StoreConfig, WorkspaceManager};

/// A manager rooted in `root/workspaces`. Fsync is off to keep tests fast.
pub fn manager(root: &Path) -> WorkspaceManager {
    WorkspaceManager::new(StoreConfig::new(root.join("workspaces")).with_fsync(false))
}

pub fn key(s: &str) -> AnnotationKey {
    AnnotationKey::parse(s).expect("valid key")
}

pub fn labeled_box(label: &str) -> AnnotationRecord {
    AnnotationRecord::rect(10.0, 20.0, 110.0, 60.0, label)
}

/// A map with one labeled box per entry.
pub fn map_of(entries: &[(&str, &str)]) -> AnnotationMap {
    entries
        .iter()
        .map(|(k, label)| (key(k), vec![labeled_box(label)]))
        .collect()
}

pub fn write_json(path: &Path, value: &serde_json::Value) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dir");
    }
    fs::write(path, serde_json::to_vec_pretty(value).expect("serialize json")).expect("write json");
}

pub fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_slice(&fs::read(path).expect("read json")).expect("parse json")
}
