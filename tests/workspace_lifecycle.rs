use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use annostore::model::{derive_key, ExportRecord, VersionId};
use annostore::version::VersionHealth;
use annostore::workspace::WorkspaceOptions;
use annostore::AnnostoreError;

mod common;

use common::{key, labeled_box, manager, map_of};

fn vid(s: &str) -> VersionId {
    VersionId::new(s).expect("version id")
}

#[test]
fn full_lifecycle() {
    let root = tempfile::tempdir().expect("tempdir");
    let images = root.path().join("images");
    let m = manager(root.path());

    let ws = m
        .create_workspace_with(
            WorkspaceOptions::new("Receipts", &images).with_description("Thai receipts, batch 3"),
        )
        .expect("create workspace");

    // Annotate two images, one in a subfolder
    let mut loaded = m.load_workspace(&ws.id).expect("load");
    assert_eq!(loaded.version_id, VersionId::initial());
    assert!(loaded.annotations.is_empty());

    let k1 = derive_key(&images, &images.join("r1.jpg")).expect("key");
    let k2 = derive_key(&images, &images.join("2024").join("r2.jpg")).expect("key");
    loaded.annotations.insert(k1.clone(), vec![labeled_box("TOTAL")]);
    loaded.annotations.insert(k2.clone(), vec![labeled_box("DATE")]);
    m.save_current_version(&ws.id, &loaded.annotations).expect("save v1");
    let v1_map = loaded.annotations.clone();
    drop(loaded);

    // Branch a copy and edit it
    m.create_version(&ws.id, &vid("2"), Some(&VersionId::initial()), Some("review pass"))
        .expect("create v2");
    m.switch_version(&ws.id, &vid("2")).expect("switch to v2");

    let mut loaded = m.load_workspace(&ws.id).expect("load v2");
    assert_eq!(loaded.version_id, vid("2"));
    assert_eq!(loaded.annotations, v1_map);
    loaded.annotations.remove(&k2);
    m.save_current_version(&ws.id, &loaded.annotations).expect("save v2");
    drop(loaded);

    // The original version is untouched
    assert_eq!(
        m.load_version(&ws.id, &VersionId::initial()).expect("load v1").annotations,
        v1_map
    );

    let versions = m.list_versions(&ws.id).expect("list versions");
    assert_eq!(versions.len(), 2);
    assert!(versions.iter().all(|v| v.health == VersionHealth::Ok));
    assert!(versions[1].is_current);
    assert_eq!(versions[1].description.as_deref(), Some("review pass"));
    assert_eq!(versions[1].source_version_id, Some(VersionId::initial()));
    assert_eq!(versions[0].stats.annotated_images, 2);
    assert_eq!(versions[1].stats.annotated_images, 1);

    // Exports reference versions
    let export = ExportRecord::new("ppocr-det", root.path().join("out"), vid("2"));
    m.record_export(&ws.id, export.clone()).expect("record export");
    assert_eq!(m.export_history(&ws.id).expect("history"), vec![export]);

    // Drop the first version
    m.delete_version(&ws.id, &VersionId::initial()).expect("delete v1");
    let versions = m.list_versions(&ws.id).expect("list versions");
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].version_id, vid("2"));

    let renamed = m.rename_workspace(&ws.id, "Receipts (final)").expect("rename");
    assert_eq!(renamed.display_name, "Receipts (final)");
    assert_eq!(renamed.created_at, ws.created_at);

    m.delete_workspace(&ws.id).expect("delete workspace");
    assert!(m.list_workspaces().expect("list").is_empty());
}

#[test]
fn adding_images_never_moves_annotations() {
    let root = tempfile::tempdir().expect("tempdir");
    let images = root.path().join("images");
    let m = manager(root.path());
    let ws = m.create_workspace("Stable", &images).expect("create");

    let mut loaded = m.load_workspace(&ws.id).expect("load");
    for name in ["7.jpg", "8422.jpg", "8423.jpg"] {
        let k = derive_key(&images, &images.join(name)).expect("key");
        loaded.annotations.insert(k, vec![labeled_box(name)]);
    }
    m.save_current_version(&ws.id, &loaded.annotations).expect("save");
    drop(loaded);

    // A new file sorts before every existing one
    let mut loaded = m.load_workspace(&ws.id).expect("reload");
    let newcomer = derive_key(&images, &images.join("0.jpg")).expect("key");
    loaded.annotations.insert(newcomer, vec![labeled_box("new")]);
    m.save_current_version(&ws.id, &loaded.annotations).expect("save");

    let reloaded = m.load_workspace(&ws.id).expect("reload");
    assert_eq!(reloaded.annotations[&key("7.jpg")][0].label, "7.jpg");
    assert_eq!(reloaded.annotations[&key("8422.jpg")][0].label, "8422.jpg");
    assert_eq!(reloaded.annotations[&key("8423.jpg")][0].label, "8423.jpg");
    assert_eq!(reloaded.annotations[&key("0.jpg")][0].label, "new");
}

#[test]
fn version_deletion_rules() {
    let root = tempfile::tempdir().expect("tempdir");
    let m = manager(root.path());
    let ws = m.create_workspace("Rules", root.path().join("images")).expect("create");

    assert!(matches!(
        m.delete_version(&ws.id, &VersionId::initial()),
        Err(AnnostoreError::CannotDeleteLastVersion { .. })
    ));

    m.create_version(&ws.id, &vid("2"), None, None).expect("create v2");
    assert!(matches!(
        m.delete_version(&ws.id, &VersionId::initial()),
        Err(AnnostoreError::CannotDeleteCurrentVersion { .. })
    ));
    assert!(matches!(
        m.create_version(&ws.id, &vid("2"), None, None),
        Err(AnnostoreError::DuplicateVersionId { .. })
    ));
    assert!(matches!(
        m.switch_version(&ws.id, &vid("nope")),
        Err(AnnostoreError::UnknownVersion { .. })
    ));

    m.delete_version(&ws.id, &vid("2")).expect("delete v2");
    assert_eq!(
        m.current_version_id(&ws.id).expect("current"),
        VersionId::initial()
    );
}

#[test]
fn workspaces_list_newest_first() {
    let root = tempfile::tempdir().expect("tempdir");
    let m = manager(root.path());

    let first = m.create_workspace("First", "/a").expect("create");
    std::thread::sleep(std::time::Duration::from_millis(5));
    let second = m.create_workspace("Second", "/b").expect("create");

    let list = m.list_workspaces().expect("list");
    let ids: Vec<_> = list.iter().map(|s| s.workspace.id.clone()).collect();
    assert_eq!(ids, vec![second.id, first.id]);
}

#[test]
fn edits_in_one_workspace_do_not_leak() {
    let root = tempfile::tempdir().expect("tempdir");
    let m = manager(root.path());
    let a = m.create_workspace("A", "/a").expect("create");
    let b = m.create_workspace("B", "/b").expect("create");

    m.save_current_version(&a.id, &map_of(&[("x.jpg", "in a")])).expect("save a");

    assert!(m.load_workspace(&b.id).expect("load b").annotations.is_empty());
    assert_eq!(m.load_workspace(&a.id).expect("load a").annotations.len(), 1);
}

#[test]
fn concurrent_saves_and_exports_lose_nothing() {
    const WORKERS: usize = 4;
    const ROUNDS: usize = 10;

    let root = tempfile::tempdir().expect("tempdir");
    let m = Arc::new(manager(root.path()));
    let ws = m.create_workspace("Shared", "/images").expect("create").id;

    let handles: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let m = Arc::clone(&m);
            let ws = ws.clone();
            thread::spawn(move || {
                for round in 0..ROUNDS {
                    let label = format!("w{}-r{}", worker, round);
                    let map = map_of(&[("shared.jpg", label.as_str())]);
                    m.save_current_version(&ws, &map).expect("save");
                    m.record_export(
                        &ws,
                        ExportRecord::new("ppocr-det", format!("/out/{}", label), VersionId::initial()),
                    )
                    .expect("record export");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker panicked");
    }

    let history = m.export_history(&ws).expect("history");
    assert_eq!(history.len(), WORKERS * ROUNDS);
    let paths: HashSet<_> = history.iter().map(|r| r.output_path.clone()).collect();
    assert_eq!(paths.len(), WORKERS * ROUNDS);

    let fresh = manager(root.path());
    let loaded = fresh.load_workspace(&ws).expect("load after races");
    assert!(loaded.notices.is_empty());
    assert_eq!(loaded.index.export_history.len(), WORKERS * ROUNDS);
    let label = &loaded.annotations[&key("shared.jpg")][0].label;
    assert!(label.starts_with('w'), "{}", label);
}

#[test]
fn open_version_survives_every_delete_path() {
    let root = tempfile::tempdir().expect("tempdir");
    let m = manager(root.path());
    let ws = m.create_workspace("Open", "/images").expect("create");
    m.create_version(&ws.id, &vid("2"), None, None).expect("create v2");
    m.switch_version(&ws.id, &vid("2")).expect("switch to v2");

    let loaded = m.load_workspace(&ws.id).expect("load v2");
    m.switch_version(&ws.id, &VersionId::initial()).expect("switch back");
    assert_eq!(m.versions().open_leases(&ws.id, &vid("2")), 1);

    assert!(matches!(
        m.versions().delete_version(&ws.id, &vid("2")),
        Err(AnnostoreError::VersionInUse { .. })
    ));
    assert!(m.workspace_dir(&ws.id).join("v2.json").is_file());

    drop(loaded);
    m.versions().delete_version(&ws.id, &vid("2")).expect("delete once closed");
}
