use std::fs;
use std::path::Path;

use catalog_core::{bucket_id, build_tree, Record, ShardParams, DETAIL_DIR, META_FILE};
use catalog_engine::{load_snapshot, publish_tree, AtomicFileWriter};
use pretty_assertions::assert_eq;

fn records(ids: &[&str]) -> Vec<Record> {
    ids.iter()
        .map(|id| Record::new(*id, format!("Clip {id}")))
        .collect()
}

fn tree_for(ids: &[&str]) -> catalog_core::OutputTree {
    build_tree(&records(ids), &ShardParams::default(), "2024-06-01 00:00:00")
        .unwrap()
        .tree
}

fn files_on_disk(root: &Path) -> Vec<String> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                let relative = path.strip_prefix(root).unwrap();
                found.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    found.sort();
    found
}

#[test]
fn atomic_writer_replaces_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let writer = AtomicFileWriter::new(dir.path().to_path_buf());

    writer.write("status.json", b"first").unwrap();
    let path = writer.write("status.json", b"second").unwrap();

    assert_eq!(fs::read(&path).unwrap(), b"second");
    assert_eq!(files_on_disk(dir.path()), vec!["status.json".to_string()]);
}

#[test]
fn publish_writes_exactly_the_tree() {
    let root = tempfile::tempdir().unwrap();
    let output = root.path().join("data");
    let tree = tree_for(&["a1", "b2", "c3"]);

    let summary = publish_tree(&output, &tree).unwrap();

    let expected: Vec<String> = tree.files().map(|(path, _)| path.to_string()).collect();
    assert_eq!(files_on_disk(&output), expected);
    assert_eq!(summary.files_written, tree.len());
    for (path, bytes) in tree.files() {
        assert_eq!(fs::read(output.join(path)).unwrap(), bytes, "{path}");
    }
}

#[test]
fn republish_removes_stale_files() {
    let root = tempfile::tempdir().unwrap();
    let output = root.path().join("data");
    publish_tree(&output, &tree_for(&["a1", "b2", "c3", "d4"])).unwrap();
    fs::write(output.join("stray.txt"), b"left over").unwrap();

    let smaller = tree_for(&["a1"]);
    publish_tree(&output, &smaller).unwrap();

    let expected: Vec<String> = smaller.files().map(|(path, _)| path.to_string()).collect();
    assert_eq!(files_on_disk(&output), expected);
    // Staging and previous trees are cleaned up beside the output.
    let siblings: Vec<_> = fs::read_dir(root.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(siblings, vec![std::ffi::OsString::from("data")]);
}

#[test]
fn published_tree_reads_back_as_snapshot() {
    let root = tempfile::tempdir().unwrap();
    let output = root.path().join("data");
    publish_tree(&output, &tree_for(&["a1", "b2", "c3"])).unwrap();

    let snapshot = load_snapshot(&output);

    let mut ids: Vec<String> = snapshot.records.iter().map(|r| r.id.clone()).collect();
    ids.sort();
    assert_eq!(ids, vec!["a1", "b2", "c3"]);
    assert_eq!(snapshot.skipped, 0);
    let a1 = snapshot.records.iter().find(|r| r.id == "a1").unwrap();
    assert_eq!(a1.title, "Clip a1");
}

#[test]
fn missing_output_is_an_empty_snapshot() {
    let root = tempfile::tempdir().unwrap();
    let snapshot = load_snapshot(&root.path().join("never-written"));
    assert!(snapshot.records.is_empty());
    assert_eq!(snapshot.skipped, 0);
}

#[test]
fn corrupt_snapshot_files_and_entries_are_skipped() {
    let root = tempfile::tempdir().unwrap();
    let output = root.path().join("data");
    publish_tree(&output, &tree_for(&["a1"])).unwrap();

    let detail = output.join(DETAIL_DIR);
    let good_bucket = format!("{}.json", bucket_id("a1"));
    let other_bucket = if good_bucket == "00.json" { "01.json" } else { "00.json" };
    fs::write(
        detail.join(other_bucket),
        br#"[{"id": "z9", "title": "Kept"}, {"id": "   "}, "not a record"]"#,
    )
    .unwrap();
    fs::write(detail.join("ff-broken.json"), b"{ truncated").unwrap();
    fs::write(output.join(META_FILE), b"ignored by the loader").unwrap();

    let snapshot = load_snapshot(&output);

    let mut ids: Vec<String> = snapshot.records.iter().map(|r| r.id.clone()).collect();
    ids.sort();
    assert_eq!(ids, vec!["a1", "z9"]);
    assert_eq!(snapshot.skipped, 3);
}
