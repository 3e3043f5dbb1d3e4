use std::fs;
use std::io;
use std::path::Path;

use engine_logging::{engine_info, engine_warn};
use serde_json::Value;

use catalog_core::{Record, DETAIL_DIR};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    pub records: Vec<Record>,
    /// Unreadable bucket files plus undecodable entries.
    pub skipped: usize,
}

/// Read the previous run's hash-bucket files as the prior canonical set.
///
/// A missing output tree is an empty snapshot. Unreadable files and entries
/// are skipped with a warning. Files are read in name order and entries in
/// file order, so the result is deterministic.
pub fn load_snapshot(output_dir: &Path) -> Snapshot {
    let detail_dir = output_dir.join(DETAIL_DIR);
    let mut snapshot = Snapshot::default();

    let entries = match fs::read_dir(&detail_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return snapshot,
        Err(err) => {
            engine_warn!("Failed to list snapshot dir {:?}: {}", detail_dir, err);
            return snapshot;
        }
    };

    let mut files: Vec<_> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|ft| ft.is_file()).unwrap_or(false))
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("json"))
        .collect();
    files.sort_by_key(|e| e.file_name());

    for entry in files {
        let path = entry.path();
        let items: Vec<Value> = match fs::read(&path)
            .map_err(|err| err.to_string())
            .and_then(|bytes| serde_json::from_slice(&bytes).map_err(|err| err.to_string()))
        {
            Ok(items) => items,
            Err(err) => {
                engine_warn!("Skipping unreadable snapshot file {:?}: {}", path, err);
                snapshot.skipped += 1;
                continue;
            }
        };

        for item in items {
            match serde_json::from_value::<Record>(item) {
                Ok(record) if record.has_identity() => snapshot.records.push(record),
                Ok(_) => {
                    engine_warn!("Skipping keyless snapshot entry in {:?}", path);
                    snapshot.skipped += 1;
                }
                Err(err) => {
                    engine_warn!("Skipping corrupt snapshot entry in {:?}: {}", path, err);
                    snapshot.skipped += 1;
                }
            }
        }
    }

    engine_info!(
        "Loaded {} snapshot records from {:?} ({} skipped)",
        snapshot.records.len(),
        detail_dir,
        snapshot.skipped
    );
    snapshot
}
