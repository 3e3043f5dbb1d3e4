use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use engine_logging::{engine_info, engine_warn};
use tempfile::NamedTempFile;
use thiserror::Error;

use catalog_core::OutputTree;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("output directory missing or not writable: {0}")]
    OutputDir(String),
    #[error("invalid relative path in output tree: {0}")]
    InvalidPath(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Ensure output directory exists; create if missing.
pub fn ensure_output_dir(dir: &Path) -> Result<(), PersistError> {
    if dir.exists() {
        let meta = fs::metadata(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
        if !meta.is_dir() {
            return Err(PersistError::OutputDir("path is not a directory".into()));
        }
    } else {
        fs::create_dir_all(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
    }
    Ok(())
}

/// Atomically write content to `{dir}/{filename}` by writing a temp file then renaming.
pub struct AtomicFileWriter {
    dir: PathBuf,
}

impl AtomicFileWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn write(&self, filename: &str, content: &[u8]) -> Result<PathBuf, PersistError> {
        ensure_output_dir(&self.dir)?;

        let target = self.dir.join(filename);
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content)?;
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;

        tmp.persist(&target).map_err(|e| PersistError::Io(e.error))?;
        Ok(target)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PublishSummary {
    pub files_written: usize,
    pub bytes_written: u64,
}

/// Replace `output_dir` with exactly the files of `tree`.
///
/// The tree is written into a staging directory beside `output_dir` and
/// swapped in with renames, so files absent from `tree` never survive and
/// readers never see a half-written tree. On failure the previous tree is
/// left in place.
pub fn publish_tree(output_dir: &Path, tree: &OutputTree) -> Result<PublishSummary, PersistError> {
    let parent = match output_dir.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name = output_dir
        .file_name()
        .ok_or_else(|| PersistError::OutputDir(format!("{:?} has no final component", output_dir)))?
        .to_os_string();
    ensure_output_dir(&parent)?;

    let staging = tempfile::Builder::new()
        .prefix(&sibling_name(&name, "staging-"))
        .tempdir_in(&parent)?;

    let mut summary = PublishSummary::default();
    for (relative, bytes) in tree.files() {
        let target = staged_path(staging.path(), relative)?;
        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&target, bytes)?;
        summary.files_written += 1;
        summary.bytes_written += bytes.len() as u64;
    }

    let previous = parent.join(format!(
        "{}{}",
        sibling_name(&name, "previous-").to_string_lossy(),
        std::process::id()
    ));
    let had_previous = output_dir.exists();
    if had_previous {
        if previous.exists() {
            fs::remove_dir_all(&previous)?;
        }
        fs::rename(output_dir, &previous)?;
    }

    let staged = staging.keep();
    if let Err(err) = fs::rename(&staged, output_dir) {
        engine_warn!("Failed to move staged tree into {:?}: {}", output_dir, err);
        if had_previous {
            fs::rename(&previous, output_dir)?;
        }
        let _ = fs::remove_dir_all(&staged);
        return Err(err.into());
    }

    if had_previous {
        if let Err(err) = fs::remove_dir_all(&previous) {
            engine_warn!("Failed to remove previous tree {:?}: {}", previous, err);
        }
    }

    engine_info!(
        "Published {} files ({} bytes) to {:?}",
        summary.files_written,
        summary.bytes_written,
        output_dir
    );
    Ok(summary)
}

fn sibling_name(name: &OsString, tag: &str) -> OsString {
    let mut sibling = OsString::from(".");
    sibling.push(name);
    sibling.push(".");
    sibling.push(tag);
    sibling
}

fn staged_path(root: &Path, relative: &str) -> Result<PathBuf, PersistError> {
    let mut path = root.to_path_buf();
    for part in relative.split('/') {
        if part.is_empty() || part == "." || part == ".." || part.contains('\\') {
            return Err(PersistError::InvalidPath(relative.to_string()));
        }
        path.push(part);
    }
    Ok(path)
}
