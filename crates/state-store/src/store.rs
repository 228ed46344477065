//! The store itself: versioned document, atomic persistence, CAS mutations.

use crate::model::ExamState;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Current on-disk format version. Bump when `ExamState` changes shape in a
/// way `#[serde(default)]` cannot absorb, and add a branch to `migrate`.
pub const CURRENT_FORMAT_VERSION: u32 = 1;

/// How many times a mutation retries after losing a CAS race to another
/// process before giving up.
const MAX_CAS_RETRIES: u32 = 8;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unsupported state format version {0} (current: {CURRENT_FORMAT_VERSION})")]
    UnsupportedVersion(u32),

    #[error("version conflict persisted after {0} retries")]
    Contention(u32),
}

/// On-disk envelope: format version, write counter, then the document.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct VersionedDoc {
    format: u32,
    /// Monotonic write counter. A writer that loaded revision `r` may only
    /// commit `r + 1`.
    revision: u64,
    state: ExamState,
}

/// Durable, lost-update-safe state store.
///
/// The in-memory copy is authoritative for reads; every mutation re-checks
/// the on-disk revision before committing, so a second process (or a manual
/// edit) sharing the file cannot be silently overwritten.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    inner: RwLock<VersionedDoc>,
}

impl StateStore {
    /// Open the store, creating an empty document if the file is missing.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let doc = match fs::read(&path) {
            Ok(bytes) => Self::decode(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "state file missing, initializing");
                let doc = VersionedDoc {
                    format: CURRENT_FORMAT_VERSION,
                    revision: 0,
                    state: ExamState::default(),
                };
                Self::persist(&path, &doc)?;
                doc
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            inner: RwLock::new(doc),
        })
    }

    fn decode(bytes: &[u8]) -> StoreResult<VersionedDoc> {
        let doc: VersionedDoc = serde_json::from_slice(bytes)?;
        if doc.format > CURRENT_FORMAT_VERSION {
            return Err(StoreError::UnsupportedVersion(doc.format));
        }
        // Single format so far; older formats would migrate here.
        Ok(doc)
    }

    /// Atomic write: serialize to a sibling temp file, then rename over the
    /// target. Readers either see the old complete document or the new one.
    fn persist(path: &Path, doc: &VersionedDoc) -> StoreResult<()> {
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(doc)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn disk_revision(&self) -> StoreResult<Option<u64>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(Self::decode(&bytes)?.revision)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Read-only snapshot of the current document.
    pub fn read(&self) -> ExamState {
        self.inner.read().state.clone()
    }

    /// Current revision (mostly for tests and diagnostics).
    pub fn revision(&self) -> u64 {
        self.inner.read().revision
    }

    /// Apply `mutate` to the document and commit it as the next revision.
    ///
    /// The closure may run more than once if another writer commits first;
    /// it must therefore be free of side effects beyond the document. The
    /// closure's return value is handed back from the winning attempt.
    pub fn mutate<R>(&self, mut mutate: impl FnMut(&mut ExamState) -> R) -> StoreResult<R> {
        for attempt in 0..MAX_CAS_RETRIES {
            let mut guard = self.inner.write();

            // Another process may have advanced the file; adopt its view
            // before mutating so we never resurrect stale data.
            match self.disk_revision()? {
                Some(disk) if disk > guard.revision => {
                    warn!(
                        memory = guard.revision,
                        disk, "state advanced on disk, reloading before mutation"
                    );
                    *guard = Self::decode(&fs::read(&self.path)?)?;
                }
                _ => {}
            }

            let mut candidate = guard.clone();
            let out = mutate(&mut candidate.state);
            candidate.revision = guard.revision + 1;

            // Commit point: the revision we loaded must still be on disk.
            match self.disk_revision()? {
                Some(disk) if disk != guard.revision => {
                    debug!(attempt, disk, loaded = guard.revision, "lost CAS race, retrying");
                    drop(guard);
                    continue;
                }
                _ => {}
            }

            Self::persist(&self.path, &candidate)?;
            *guard = candidate;
            return Ok(out);
        }
        Err(StoreError::Contention(MAX_CAS_RETRIES))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use examlab_core::Candidate;

    fn temp_store() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path().join("state.json")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_open_initializes_missing_file() {
        let (dir, store) = temp_store();
        assert_eq!(store.revision(), 0);
        assert!(dir.path().join("state.json").exists());
        assert!(store.read().candidates.is_empty());
    }

    #[test]
    fn test_mutate_bumps_revision_and_persists() {
        let (dir, store) = temp_store();
        store
            .mutate(|s| s.candidates.push(Candidate::new("a@b.c", "A", 0)))
            .unwrap();
        assert_eq!(store.revision(), 1);

        // A fresh handle sees the committed write.
        let reopened = StateStore::open(dir.path().join("state.json")).unwrap();
        assert_eq!(reopened.revision(), 1);
        assert_eq!(reopened.read().candidates.len(), 1);
    }

    #[test]
    fn test_concurrent_handles_do_not_lose_updates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let a = StateStore::open(&path).unwrap();
        let b = StateStore::open(&path).unwrap();

        a.mutate(|s| s.candidates.push(Candidate::new("a@b.c", "A", 0)))
            .unwrap();
        // b still holds revision 0 in memory; its mutation must adopt a's
        // write instead of clobbering it.
        b.mutate(|s| s.candidates.push(Candidate::new("b@b.c", "B", 0)))
            .unwrap();

        let reopened = StateStore::open(&path).unwrap();
        assert_eq!(reopened.read().candidates.len(), 2);
        assert_eq!(reopened.revision(), 2);
    }

    #[test]
    fn test_mutate_returns_closure_value() {
        let (_dir, store) = temp_store();
        let count = store
            .mutate(|s| {
                s.candidates.push(Candidate::new("a@b.c", "A", 0));
                s.candidates.len()
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_future_format_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(
            &path,
            r#"{"format": 99, "revision": 0, "state": {}}"#,
        )
        .unwrap();
        match StateStore::open(&path) {
            Err(StoreError::UnsupportedVersion(99)) => {}
            other => panic!("expected UnsupportedVersion, got {other:?}"),
        }
    }

    #[test]
    fn test_corrupt_file_is_an_error_not_a_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(
            StateStore::open(&path),
            Err(StoreError::Serialization(_))
        ));
    }
}
