//! Training report history
//!
//! Sled database of evaluation reports, one per trained unit.
//! Key format: `{folder}/{window_size}/{trained_at_millis:020}`

use std::path::Path;

use sled::Db;
use tracing::{debug, warn};

use crate::ml_engine::TrainingReport;

#[derive(Debug, thiserror::Error)]
pub enum ReportStoreError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Clone)]
pub struct TrainingReportStore {
    db: Db,
}

impl TrainingReportStore {
    /// Open or create the report database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ReportStoreError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Open a throwaway database
    pub fn open_temp() -> Result<Self, ReportStoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    fn build_key(report: &TrainingReport) -> String {
        format!(
            "{}/{}/{:020}",
            report.key.model_folder,
            report.key.window_size,
            report.trained_at.timestamp_millis().max(0)
        )
    }

    pub fn store(&self, report: &TrainingReport) -> Result<(), ReportStoreError> {
        let key = Self::build_key(report);
        let value = serde_json::to_vec(report)?;
        self.db.insert(key.as_bytes(), value)?;
        self.db.flush()?;
        debug!(key = %key, roc_auc = report.roc_auc, "Stored training report");
        Ok(())
    }

    /// Newest first, optionally restricted to one model folder.
    pub fn list(&self, folder: Option<&str>, limit: usize) -> Result<Vec<TrainingReport>, ReportStoreError> {
        let iter = match folder {
            Some(folder) => self.db.scan_prefix(format!("{folder}/")),
            None => self.db.iter(),
        };

        let mut reports = Vec::new();
        for item in iter {
            let (key, value) = item?;
            match serde_json::from_slice::<TrainingReport>(&value) {
                Ok(report) => reports.push(report),
                Err(e) => {
                    warn!(key = %String::from_utf8_lossy(&key), error = %e, "Skipping unreadable training report");
                }
            }
        }
        reports.sort_by(|a, b| b.trained_at.cmp(&a.trained_at));
        reports.truncate(limit);
        Ok(reports)
    }

    pub fn count(&self) -> usize {
        self.db.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml_engine::{ClassCounts, ClassificationReport};
    use crate::types::{Label, RegistryKey};
    use chrono::{Duration, TimeZone, Utc};

    fn report(folder: &str, ws: usize, minutes: i64) -> TrainingReport {
        let truth = [Label::Ok, Label::NotOk];
        TrainingReport {
            key: RegistryKey::ensemble(folder, ws),
            roc_auc: 0.75,
            classification: ClassificationReport::compute(&truth, &truth).unwrap(),
            counts_before: ClassCounts { ok: 10, not_ok: 6 },
            counts_after: ClassCounts { ok: 10, not_ok: 10 },
            test_rows: 4,
            trained_at: Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap() + Duration::minutes(minutes),
        }
    }

    #[test]
    fn test_store_and_list_newest_first() {
        let store = TrainingReportStore::open_temp().unwrap();
        store.store(&report("line-a", 50, 0)).unwrap();
        store.store(&report("line-a", 100, 5)).unwrap();
        store.store(&report("line-b", 50, 2)).unwrap();
        assert_eq!(store.count(), 3);

        let all = store.list(None, 10).unwrap();
        let order: Vec<(String, usize)> = all
            .iter()
            .map(|r| (r.key.model_folder.clone(), r.key.window_size))
            .collect();
        assert_eq!(
            order,
            vec![("line-a".into(), 100), ("line-b".into(), 50), ("line-a".into(), 50)]
        );

        let only_a = store.list(Some("line-a"), 1).unwrap();
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].key.window_size, 100);
    }

    #[test]
    fn test_folder_prefix_does_not_leak() {
        let store = TrainingReportStore::open_temp().unwrap();
        store.store(&report("line", 50, 0)).unwrap();
        store.store(&report("line-2", 50, 1)).unwrap();
        assert_eq!(store.list(Some("line"), 10).unwrap().len(), 1);
    }
}
