use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use engine_logging::{engine_debug, engine_warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error(
        "another run holds the lock at {path:?} (owner: {owner}); \
         if that process is no longer running the lock is stale and the file can be removed"
    )]
    AlreadyHeld { path: PathBuf, owner: String },
    #[error("failed to create lock at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOwner {
    pub owner: String,
    pub pid: u32,
    pub acquired_at: String,
}

/// Advisory run-exclusivity guard backed by an exclusively created file.
///
/// The file is removed when the guard drops, including on early returns
/// and panics that unwind.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    owner: LockOwner,
}

impl RunLock {
    pub fn acquire(path: &Path, owner: &str, acquired_at: &str) -> Result<Self, LockError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|source| LockError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(LockError::AlreadyHeld {
                    path: path.to_path_buf(),
                    owner: describe_holder(path),
                });
            }
            Err(source) => {
                return Err(LockError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let owner = LockOwner {
            owner: owner.to_string(),
            pid: std::process::id(),
            acquired_at: acquired_at.to_string(),
        };
        // Build the guard first so a failed write still releases the file.
        let lock = Self {
            path: path.to_path_buf(),
            owner,
        };
        let body = serde_json::to_vec(&lock.owner).unwrap_or_default();
        file.write_all(&body).map_err(|source| LockError::Io {
            path: lock.path.clone(),
            source,
        })?;
        engine_debug!("Acquired run lock {:?} for {}", lock.path, lock.owner.owner);
        Ok(lock)
    }

    pub fn owner(&self) -> &LockOwner {
        &self.owner
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            engine_warn!("Failed to release run lock {:?}: {}", self.path, err);
        }
    }
}

fn describe_holder(path: &Path) -> String {
    fs::read(path)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<LockOwner>(&bytes).ok())
        .map(|holder| format!("{} (pid {}) since {}", holder.owner, holder.pid, holder.acquired_at))
        .unwrap_or_else(|| "unknown".to_string())
}
