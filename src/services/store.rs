//! Snapshot store with a durable JSON mirror
//!
//! Holds at most one committed snapshot. Readers get an `Arc` to a whole
//! snapshot, so a concurrent `replace` can never produce a torn read. Every
//! successful `replace` is mirrored to disk; at startup the mirror is used to
//! hydrate the store before the first refresh completes.

use crate::types::{Result, Snapshot, StampedSnapshot, StatePopError};
use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Bumped whenever the on-disk layout changes
pub const SNAPSHOT_FILE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    updated_at: DateTime<Utc>,
    states: Snapshot,
}

/// What startup hydration found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hydration {
    /// Durable copy loaded into the store
    Restored {
        states: usize,
        updated_at: DateTime<Utc>,
    },
    /// No durable copy (or the store is memory-only)
    Missing,
    /// A refresh already committed; the older durable copy was not loaded
    Superseded,
}

pub struct SnapshotStore {
    current: ArcSwapOption<StampedSnapshot>,
    path: Option<PathBuf>,
}

impl SnapshotStore {
    /// Store mirrored to `path`
    pub fn new(path: PathBuf) -> Self {
        Self {
            current: ArcSwapOption::empty(),
            path: Some(path),
        }
    }

    /// Store without a durable mirror
    pub fn in_memory() -> Self {
        Self {
            current: ArcSwapOption::empty(),
            path: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Latest committed snapshot, or `None` if nothing was ever committed
    pub fn current(&self) -> Option<Arc<StampedSnapshot>> {
        self.current.load_full()
    }

    /// Swap in a new snapshot, then mirror it to disk.
    ///
    /// The in-memory swap is a single pointer store and happens first; the
    /// file write runs on the blocking pool. A `Persist` error means the
    /// snapshot is live but the durable copy still holds the previous one.
    pub async fn replace(&self, snapshot: Snapshot) -> Result<DateTime<Utc>> {
        let stamped = StampedSnapshot {
            snapshot,
            updated_at: Utc::now(),
        };
        let updated_at = stamped.updated_at;
        let stamped = Arc::new(stamped);
        self.current.store(Some(Arc::clone(&stamped)));

        if let Some(path) = self.path.clone() {
            tokio::task::spawn_blocking(move || Self::save_file(&path, &stamped))
                .await
                .map_err(|e| StatePopError::Persist(format!("Write task failed: {}", e)))??;
        }
        Ok(updated_at)
    }

    /// Load the durable copy into an empty store.
    ///
    /// A copy that cannot be trusted is deleted and reported as
    /// `StoreHydration`; the caller falls back to an immediate refresh.
    pub fn hydrate(&self) -> Result<Hydration> {
        let path = match &self.path {
            Some(p) => p,
            None => return Ok(Hydration::Missing),
        };
        if !path.exists() {
            return Ok(Hydration::Missing);
        }

        match Self::load_file(path) {
            Ok(stamped) => {
                let hydration = Hydration::Restored {
                    states: stamped.snapshot.len(),
                    updated_at: stamped.updated_at,
                };
                let previous = self
                    .current
                    .compare_and_swap(&None::<Arc<StampedSnapshot>>, Some(Arc::new(stamped)));
                if previous.is_some() {
                    return Ok(Hydration::Superseded);
                }
                info!(path = %path.display(), "hydrated snapshot from disk");
                Ok(hydration)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "discarding corrupt snapshot file");
                if let Err(rm) = fs::remove_file(path) {
                    warn!(error = %rm, "failed to remove corrupt snapshot file");
                }
                Err(e)
            }
        }
    }

    /// Read and validate a snapshot file under a shared lock.
    pub fn load_file(path: &Path) -> Result<StampedSnapshot> {
        let file = File::open(path)
            .map_err(|e| StatePopError::StoreHydration(format!("Failed to open: {}", e)))?;
        file.lock_shared().map_err(|e| {
            StatePopError::StoreHydration(format!("Failed to acquire read lock: {}", e))
        })?;

        let mut content = String::new();
        let read = std::io::BufReader::new(&file).read_to_string(&mut content);
        let _ = file.unlock();
        read.map_err(|e| StatePopError::StoreHydration(format!("Failed to read: {}", e)))?;

        let parsed: SnapshotFile = serde_json::from_str(&content)
            .map_err(|e| StatePopError::StoreHydration(format!("Corrupted file: {}", e)))?;

        if parsed.version != SNAPSHOT_FILE_VERSION {
            return Err(StatePopError::StoreHydration(format!(
                "Version mismatch: found {}, expected {}",
                parsed.version, SNAPSHOT_FILE_VERSION
            )));
        }
        if parsed.states.is_empty() {
            return Err(StatePopError::StoreHydration("Empty snapshot".into()));
        }

        Ok(StampedSnapshot {
            snapshot: parsed.states,
            updated_at: parsed.updated_at,
        })
    }

    /// Save using atomic write (temp file + rename) with exclusive lock.
    fn save_file(path: &Path, stamped: &StampedSnapshot) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = SnapshotFile {
            version: SNAPSHOT_FILE_VERSION,
            updated_at: stamped.updated_at,
            states: stamped.snapshot.clone(),
        };
        let content = serde_json::to_string_pretty(&file)
            .map_err(|e| StatePopError::Persist(format!("Serialization failed: {}", e)))?;

        let temp_path = path.with_extension("json.tmp");
        {
            let mut temp = File::create(&temp_path)
                .map_err(|e| StatePopError::Persist(format!("Failed to create temp file: {}", e)))?;
            temp.write_all(content.as_bytes())
                .map_err(|e| StatePopError::Persist(format!("Failed to write temp file: {}", e)))?;
            temp.sync_all()
                .map_err(|e| StatePopError::Persist(format!("Failed to sync temp file: {}", e)))?;
        }

        let target = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| StatePopError::Persist(format!("Failed to open target: {}", e)))?;

        target
            .lock_exclusive()
            .map_err(|e| StatePopError::Persist(format!("Failed to acquire write lock: {}", e)))?;

        let renamed = fs::rename(&temp_path, path)
            .map_err(|e| StatePopError::Persist(format!("Failed to rename temp file: {}", e)));

        let _ = target.unlock();
        renamed
    }
}
