//! Once-a-day update marker

use crate::error::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize)]
struct UpdateRecord {
    last_update: NaiveDate,
}

/// JSON file holding the date of the last successful traffic refresh
#[derive(Debug, Clone)]
pub struct UpdateLog {
    path: PathBuf,
}

impl UpdateLog {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Date of the last recorded update, `None` when missing or unreadable
    pub fn last_update(&self) -> Option<NaiveDate> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                debug!(path = %self.path.display(), "No update log: {}", e);
                return None;
            }
        };
        match serde_json::from_str::<UpdateRecord>(&content) {
            Ok(record) => Some(record.last_update),
            Err(e) => {
                warn!(path = %self.path.display(), "Ignoring malformed update log: {}", e);
                None
            }
        }
    }

    pub fn has_updated_today(&self, today: NaiveDate) -> bool {
        self.last_update() == Some(today)
    }

    /// Record `today` as the last update
    pub fn record(&self, today: NaiveDate) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(&UpdateRecord { last_update: today })?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_update_log_lifecycle() {
        let dir = tempdir().unwrap();
        let log = UpdateLog::new(dir.path().join("update_log.json"));
        let today = NaiveDate::from_ymd_opt(2024, 6, 2).unwrap();

        assert!(!log.has_updated_today(today));
        log.record(today.pred_opt().unwrap()).unwrap();
        assert!(!log.has_updated_today(today));

        log.record(today).unwrap();
        assert!(log.has_updated_today(today));
        let raw = fs::read_to_string(log.path()).unwrap();
        assert_eq!(raw, r#"{"last_update":"2024-06-02"}"#);
    }

    #[test]
    fn test_malformed_log_counts_as_stale() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("update_log.json");
        fs::write(&path, "not json").unwrap();
        let log = UpdateLog::new(path);
        assert_eq!(log.last_update(), None);
    }
}
