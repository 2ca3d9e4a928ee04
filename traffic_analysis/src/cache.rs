//! Result cache: per-engine figure directories and CSV result files
//!
//! A cached unit is only trusted when its figure is still on disk; the CSV
//! rows are the data, the figure is the liveness signal.

use crate::error::{AnalysisError, Result};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Directory holding one engine's rendered figures
#[derive(Debug, Clone)]
pub struct FigureStore {
    dir: PathBuf,
}

impl FigureStore {
    /// Create a new store rooted at `dir`
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the directory if needed; failures are logged and returned
    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            error!(dir = %self.dir.display(), "Cannot create figure directory: {}", e);
            AnalysisError::persistence(&self.dir, e)
        })
    }

    /// Full path of a figure file
    pub fn path(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    /// Whether a figure file exists
    pub fn contains(&self, filename: &str) -> bool {
        self.path(filename).is_file()
    }

    /// Check that a cached unit's figure is still on disk
    pub fn require(&self, filename: &str) -> Result<()> {
        if self.contains(filename) {
            Ok(())
        } else {
            Err(AnalysisError::CacheInconsistency(format!(
                "{} is missing from {}",
                filename,
                self.dir.display()
            )))
        }
    }

    /// Whether the directory is missing or has no entries
    pub fn is_empty(&self) -> bool {
        match fs::read_dir(&self.dir) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => true,
        }
    }

    /// File names currently in the directory
    pub fn list(&self) -> Result<BTreeSet<String>> {
        if !self.dir.exists() {
            return Ok(BTreeSet::new());
        }
        let mut names = BTreeSet::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.insert(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(names)
    }

    /// Delete everything in the directory, keeping the directory itself
    ///
    /// Entries that cannot be removed are logged and skipped.
    pub fn clear(&self) -> Result<()> {
        if !self.dir.exists() {
            return Ok(());
        }
        info!(dir = %self.dir.display(), "Resetting figure directory");
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let removed = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            if let Err(e) = removed {
                error!(path = %path.display(), "Failed to delete: {}", e);
            }
        }
        Ok(())
    }
}

/// Write serde records to a CSV file, retrying once on failure
pub fn write_records<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    match try_write_records(path, records) {
        Ok(()) => Ok(()),
        Err(first) => {
            warn!(path = %path.display(), "CSV write failed, retrying: {}", first);
            try_write_records(path, records).map_err(|e| {
                error!(path = %path.display(), "CSV write failed twice: {}", e);
                AnalysisError::persistence(path, e)
            })
        }
    }
}

fn try_write_records<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    debug!(path = %path.display(), rows = records.len(), "CSV written");
    Ok(())
}

/// Read serde records from a CSV file, `None` when the file does not exist
pub fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Option<Vec<T>>> {
    if !path.is_file() {
        return Ok(None);
    }
    let mut reader = csv::Reader::from_path(path)?;
    let records = reader
        .deserialize()
        .collect::<std::result::Result<Vec<T>, csv::Error>>()?;
    Ok(Some(records))
}

/// Delete a results file; a missing file is only logged
pub fn remove_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            info!(path = %path.display(), "Removed results file");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "Results file already absent");
            Ok(())
        }
        Err(e) => Err(AnalysisError::persistence(path, e)),
    }
}

/// One mutex per result key, so same-column writers sharing this engine never overlap
///
/// The locks live in the engine instance. Separate engines or processes
/// writing the same figure directory are not serialised.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    slots: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `key`
    pub fn with_lock<R>(&self, key: &str, f: impl FnOnce() -> R) -> R {
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(slots.entry(key.to_string()).or_default())
        };
        let _guard = slot.lock();
        f()
    }
}

/// Optional wall-clock budget for one request
#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// A deadline that never expires
    pub fn none() -> Self {
        Self::default()
    }

    /// A deadline `budget` from now
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Some(Instant::now() + budget),
        }
    }

    pub fn from_secs(secs: Option<u64>) -> Self {
        secs.map_or_else(Self::none, |s| Self::after(Duration::from_secs(s)))
    }

    pub fn expired(&self) -> bool {
        self.at.map_or(false, |at| Instant::now() >= at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        #[serde(rename = "Page 1")]
        page: String,
        value: f64,
    }

    #[test]
    fn test_figure_store_lifecycle() {
        let dir = tempdir().unwrap();
        let store = FigureStore::new(dir.path().join("peaks_figures"));
        assert!(store.is_empty());

        store.ensure().unwrap();
        assert!(store.is_empty());
        fs::write(store.path("peaks_en_Quake.svg"), "<svg/>").unwrap();
        assert!(store.contains("peaks_en_Quake.svg"));
        assert!(!store.is_empty());
        assert_eq!(store.list().unwrap().len(), 1);

        store.clear().unwrap();
        assert!(store.is_empty());
        assert!(store.dir().exists());
    }

    #[test]
    fn test_missing_figure_is_a_cache_inconsistency() {
        let dir = tempdir().unwrap();
        let store = FigureStore::new(dir.path());
        fs::write(store.path("auto_corr_en_Quake.svg"), "<svg/>").unwrap();

        assert!(store.require("auto_corr_en_Quake.svg").is_ok());
        let err = store.require("auto_corr_fr_Quake.svg").unwrap_err();
        assert!(matches!(err, AnalysisError::CacheInconsistency(ref m) if m.contains("auto_corr_fr_Quake.svg")));
    }

    #[test]
    fn test_records_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("files").join("rows.csv");
        assert!(read_records::<Row>(&path).unwrap().is_none());

        let rows = vec![Row { page: "en_Quake".to_string(), value: 0.75 }];
        write_records(&path, &rows).unwrap();
        let header = fs::read_to_string(&path).unwrap();
        assert!(header.starts_with("Page 1,value"));
        assert_eq!(read_records::<Row>(&path).unwrap().unwrap(), rows);

        remove_file(&path).unwrap();
        remove_file(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_keyed_locks_run_closure() {
        let locks = KeyedLocks::new();
        let value = locks.with_lock("en_Quake", || 41 + 1);
        assert_eq!(value, 42);
        // Re-entering a different key while holding one is fine
        let nested = locks.with_lock("a", || locks.with_lock("b", || 1));
        assert_eq!(nested, 1);
    }

    #[test]
    fn test_keyed_locks_serialise_threads_sharing_one_instance() {
        use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

        let locks = KeyedLocks::new();
        let inside = AtomicUsize::new(0);
        let overlapped = AtomicBool::new(false);
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        locks.with_lock("en_Quake", || {
                            if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                                overlapped.store(true, Ordering::SeqCst);
                            }
                            std::thread::yield_now();
                            inside.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                });
            }
        });
        assert!(!overlapped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_deadline() {
        assert!(!Deadline::none().expired());
        assert!(Deadline::after(Duration::from_secs(0)).expired());
        assert!(!Deadline::from_secs(Some(3600)).expired());
    }
}
