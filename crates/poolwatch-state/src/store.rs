//! StateStore — file-backed persistence for the monitor record.
//!
//! The snapshot and the notification metadata live in two JSON files so
//! an operator can inspect or hand-edit either one. Each file is written
//! to a temporary file in the target directory, fsynced, and renamed over
//! the previous version.
//!
//! A save writes the snapshot file first and the metadata document last.
//! The metadata document embeds the baseline, so its rename commits the
//! whole record: a save that fails or crashes before that rename leaves
//! the previous record, never a mix of old and new halves.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::types::*;

/// Default file name of the snapshot document.
pub const SNAPSHOT_FILE: &str = "pool_status.json";

/// Default file name of the metadata document.
pub const META_FILE: &str = "pool_meta.json";

/// Convert any `Display` error into a `StateError` variant, prefixed with a path.
macro_rules! map_err {
    ($variant:ident, $path:expr) => {
        |e| StateError::$variant(format!("{}: {e}", $path.display()))
    };
}

/// Durable storage for a [`MonitorRecord`].
pub trait RecordStore: Send + Sync {
    /// Read the stored record. A store that was never written yields
    /// [`MonitorRecord::empty`]; unreadable or malformed content is an error.
    fn load(&self) -> StateResult<MonitorRecord>;

    /// Persist the record atomically.
    fn save(&self, record: &MonitorRecord) -> StateResult<()>;
}

/// Record store backed by two JSON files.
#[derive(Debug, Clone)]
pub struct StateStore {
    snapshot_path: PathBuf,
    meta_path: PathBuf,
}

impl StateStore {
    /// Use explicit file locations for the snapshot and metadata documents.
    pub fn new(snapshot_path: impl Into<PathBuf>, meta_path: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_path: snapshot_path.into(),
            meta_path: meta_path.into(),
        }
    }

    /// Store both documents under `dir` with their default names.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(SNAPSHOT_FILE), dir.join(META_FILE))
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    pub fn meta_path(&self) -> &Path {
        &self.meta_path
    }

    fn load_snapshot(&self) -> StateResult<Option<HealthSnapshot>> {
        let Some(bytes) = read_if_exists(&self.snapshot_path)? else {
            return Ok(None);
        };
        let snapshot: HealthSnapshot =
            serde_json::from_slice(&bytes).map_err(map_err!(Deserialize, self.snapshot_path))?;
        Ok(Some(snapshot))
    }

    fn load_meta(&self) -> StateResult<MonitorMeta> {
        let Some(bytes) = read_if_exists(&self.meta_path)? else {
            return Ok(MonitorMeta::default());
        };
        serde_json::from_slice(&bytes).map_err(map_err!(Deserialize, self.meta_path))
    }

    /// Warn when the snapshot file no longer matches the committed baseline.
    fn check_mirror(&self, committed: Option<&HealthSnapshot>) {
        match self.load_snapshot() {
            Ok(mirror) if mirror.as_ref() == committed => {}
            Ok(_) => warn!(
                path = ?self.snapshot_path,
                "snapshot file differs from the committed baseline in the metadata document; using the metadata copy"
            ),
            Err(e) => warn!(error = %e, "snapshot file unreadable; using the metadata copy"),
        }
    }
}

impl RecordStore for StateStore {
    fn load(&self) -> StateResult<MonitorRecord> {
        let meta = self.load_meta()?;
        let last_notified_at = meta.last_notified_at()?;
        let last_snapshot = match meta.snapshot {
            Some(committed) => {
                self.check_mirror(committed.as_ref());
                committed
            }
            None => self.load_snapshot()?,
        };
        debug!(
            path = ?self.snapshot_path,
            has_snapshot = last_snapshot.is_some(),
            has_notified = last_notified_at.is_some(),
            "monitor record loaded"
        );
        Ok(MonitorRecord {
            last_snapshot,
            last_notified_at,
        })
    }

    fn save(&self, record: &MonitorRecord) -> StateResult<()> {
        let meta = MonitorMeta::from_record(record);
        let meta_bytes = to_pretty_json(&meta, &self.meta_path)?;

        match &record.last_snapshot {
            Some(snapshot) => {
                let bytes = to_pretty_json(snapshot, &self.snapshot_path)?;
                write_atomic(&self.snapshot_path, &bytes)?;
            }
            None => remove_if_exists(&self.snapshot_path)?,
        }

        // Commit point.
        write_atomic(&self.meta_path, &meta_bytes)?;

        debug!(
            path = ?self.snapshot_path,
            last_notified = ?meta.last_notified,
            "monitor record saved"
        );
        Ok(())
    }
}

fn to_pretty_json<T: serde::Serialize>(value: &T, path: &Path) -> StateResult<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(value).map_err(map_err!(Serialize, path))?;
    bytes.push(b'\n');
    Ok(bytes)
}

fn read_if_exists(path: &Path) -> StateResult<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StateError::Read(format!("{}: {e}", path.display()))),
    }
}

fn remove_if_exists(path: &Path) -> StateResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StateError::Write(format!("{}: {e}", path.display()))),
    }
}

/// Write `bytes` to `path` via a synced temporary file and an atomic rename.
///
/// The temporary file is removed on any failure before the rename, so the
/// previous document stays intact.
fn write_atomic(path: &Path, bytes: &[u8]) -> StateResult<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(map_err!(Write, dir))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".poolwatch-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(map_err!(Write, dir))?;
    tmp.write_all(bytes).map_err(map_err!(Write, path))?;
    tmp.as_file().sync_all().map_err(map_err!(Write, path))?;
    tmp.persist(path)
        .map_err(|e| StateError::Write(format!("{}: {}", path.display(), e.error)))?;
    Ok(())
}
