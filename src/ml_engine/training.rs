//! Offline training sweep
//!
//! For every model folder of the data dir and every configured window size:
//! load → window → split → scale → balance → fit → evaluate → persist.
//! A failing unit is logged and skipped; the metrics table is written once
//! the sweep is over.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use super::balancer::{BalanceError, ClassBalancer, ClassCounts};
use super::dataset::{self, DatasetError, Relabel};
use super::ensemble::{EnsembleError, EnsembleTrainer, SoftVotingEnsemble};
use super::evaluation::{roc_auc, ClassificationReport, EvaluationError};
use super::features::{FeatureError, Scaler};
use crate::config::ServiceConfig;
use crate::storage::{ModelRegistry, RegistryError, TrainingReportStore};
use crate::types::RegistryKey;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error("no windows of size {window_size} in {folder}")]
    NoWindows { folder: String, window_size: usize },
    #[error(transparent)]
    Feature(#[from] FeatureError),
    #[error(transparent)]
    Balance(#[from] BalanceError),
    #[error(transparent)]
    Ensemble(#[from] EnsembleError),
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("failed to write metrics table {}: {source}", path.display())]
    Metrics {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Held-out evaluation of one trained unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub key: RegistryKey,
    pub roc_auc: f64,
    pub classification: ClassificationReport,
    /// Training split before oversampling
    pub counts_before: ClassCounts,
    pub counts_after: ClassCounts,
    pub test_rows: usize,
    pub trained_at: DateTime<Utc>,
}

/// One row of the metrics table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRow {
    /// `<folder>/ensemble_<window_size>`
    pub model: String,
    pub roc_auc: f64,
}

/// A unit that was skipped, with the reason.
#[derive(Debug, Clone, Serialize)]
pub struct FailedUnit {
    pub folder: String,
    pub window_size: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepSummary {
    pub metrics: Vec<MetricsRow>,
    pub failed: Vec<FailedUnit>,
}

/// Everything a unit produces before it is persisted.
pub struct TrainedUnit {
    pub ensemble: SoftVotingEnsemble,
    pub scaler: Scaler,
    pub report: TrainingReport,
}

pub struct TrainingPipeline {
    data_dir: PathBuf,
    window_sizes: Vec<usize>,
    test_fraction: f64,
    split_seed: u64,
    relabel: Relabel,
    balancer: ClassBalancer,
    trainer: EnsembleTrainer,
}

impl TrainingPipeline {
    pub fn from_config(config: &ServiceConfig) -> Self {
        let t = &config.training;
        Self {
            data_dir: t.data_dir.clone(),
            window_sizes: t.window_sizes.clone(),
            test_fraction: t.test_fraction,
            split_seed: t.split_seed,
            relabel: Relabel::new(&t.relabel),
            balancer: ClassBalancer::new(config.balancer.neighbours, config.balancer.seed),
            trainer: EnsembleTrainer::dual(
                config.boosting.depth_wise.params(),
                config.boosting.leaf_wise.params(),
                config.ensemble.weights,
                config.ensemble.threshold,
            ),
        }
    }

    pub fn window_sizes(&self) -> &[usize] {
        &self.window_sizes
    }

    /// Train one `(folder, window_size)` unit without persisting it.
    pub fn train_unit(&self, folder: &Path, window_size: usize) -> Result<TrainedUnit, TrainingError> {
        let folder_name = folder_name(folder);
        let data = dataset::load_folder(folder, window_size, &self.relabel)?;
        if data.is_empty() {
            return Err(TrainingError::NoWindows {
                folder: folder_name,
                window_size,
            });
        }

        let (train, test) = dataset::train_test_split(data, self.test_fraction, self.split_seed);
        let scaler = Scaler::fit(&train.rows, window_size)?;
        let train_scaled = scaler.transform_rows(&train.rows)?;
        let test_scaled = scaler.transform_rows(&test.rows)?;
        drop(train.rows);

        let counts_before = ClassCounts::of(&train.labels);
        let (balanced_rows, balanced_labels) = self.balancer.resample(&train_scaled, &train.labels)?;
        drop(train_scaled);
        let counts_after = ClassCounts::of(&balanced_labels);

        let ensemble = self.trainer.fit(&balanced_rows, &balanced_labels)?;

        let predictions = test_scaled
            .iter()
            .map(|row| ensemble.predict(row))
            .collect::<Result<Vec<_>, _>>()?;
        let scores: Vec<f64> = predictions.iter().map(|p| p.probability).collect();
        let predicted: Vec<_> = predictions.iter().map(|p| p.label).collect();
        let auc = roc_auc(&test.labels, &scores)?;
        let classification = ClassificationReport::compute(&test.labels, &predicted)?;

        info!(
            folder = %folder_name,
            window_size,
            train_rows = counts_before.total(),
            balanced_rows = counts_after.total(),
            test_rows = test.labels.len(),
            roc_auc = auc,
            accuracy = classification.accuracy,
            "Trained ensemble"
        );

        Ok(TrainedUnit {
            report: TrainingReport {
                key: RegistryKey::ensemble(&folder_name, window_size),
                roc_auc: auc,
                classification,
                counts_before,
                counts_after,
                test_rows: test.labels.len(),
                trained_at: Utc::now(),
            },
            ensemble,
            scaler,
        })
    }

    /// Run the full sweep, persisting every successful unit.
    pub fn run(
        &self,
        registry: &ModelRegistry,
        reports: Option<&TrainingReportStore>,
        metrics_path: &Path,
    ) -> Result<SweepSummary, TrainingError> {
        let folders = dataset::model_folders(&self.data_dir)?;
        if folders.is_empty() {
            warn!(data_dir = %self.data_dir.display(), "No model folders found");
        }

        let mut summary = SweepSummary::default();
        for folder in &folders {
            for &window_size in &self.window_sizes {
                let name = folder_name(folder);
                info!(folder = %name, window_size, "Training unit");
                let outcome = self
                    .train_unit(folder, window_size)
                    .and_then(|unit| self.persist(registry, reports, unit));
                match outcome {
                    Ok(row) => summary.metrics.push(row),
                    Err(e) => {
                        error!(folder = %name, window_size, error = %e, "Training unit failed, skipping");
                        summary.failed.push(FailedUnit {
                            folder: name,
                            window_size,
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }

        write_metrics(metrics_path, &summary.metrics)?;
        info!(
            trained = summary.metrics.len(),
            failed = summary.failed.len(),
            metrics = %metrics_path.display(),
            "Training sweep finished"
        );
        Ok(summary)
    }

    fn persist(
        &self,
        registry: &ModelRegistry,
        reports: Option<&TrainingReportStore>,
        unit: TrainedUnit,
    ) -> Result<MetricsRow, TrainingError> {
        let key = &unit.report.key;
        registry.put(key, &unit.ensemble, &unit.scaler)?;
        if let Some(store) = reports {
            // History is informational; a failed write does not undo the model
            if let Err(e) = store.store(&unit.report) {
                warn!(key = %key, error = %e, "Failed to store training report");
            }
        }
        Ok(MetricsRow {
            model: format!("{}/{}", key.model_folder, key.model_name),
            roc_auc: unit.report.roc_auc,
        })
    }
}

fn folder_name(folder: &Path) -> String {
    folder
        .file_name()
        .map_or_else(|| folder.display().to_string(), |n| n.to_string_lossy().into_owned())
}

/// Write the metrics table (`model,roc_auc`).
pub fn write_metrics(path: &Path, rows: &[MetricsRow]) -> Result<(), TrainingError> {
    let metrics_err = |source| TrainingError::Metrics {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| metrics_err(csv::Error::from(e)))?;
    }
    let mut writer = csv::Writer::from_path(path).map_err(metrics_err)?;
    if rows.is_empty() {
        writer.write_record(["model", "roc_auc"]).map_err(metrics_err)?;
    }
    for row in rows {
        writer.serialize(row).map_err(metrics_err)?;
    }
    writer.flush().map_err(|e| metrics_err(csv::Error::from(e)))?;
    Ok(())
}

/// Read a metrics table written by [`write_metrics`].
pub fn read_metrics(path: &Path) -> Result<Vec<MetricsRow>, TrainingError> {
    let metrics_err = |source| TrainingError::Metrics {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::Reader::from_path(path).map_err(metrics_err)?;
    reader
        .deserialize()
        .collect::<Result<Vec<MetricsRow>, _>>()
        .map_err(metrics_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_table_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models").join("roc_auc_metrics.csv");
        let rows = vec![
            MetricsRow {
                model: "line-a/ensemble_50".into(),
                roc_auc: 0.91,
            },
            MetricsRow {
                model: "line-a/ensemble_100".into(),
                roc_auc: 0.88,
            },
        ];
        write_metrics(&path, &rows).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("model,roc_auc\n"));
        assert_eq!(read_metrics(&path).unwrap(), rows);
    }

    #[test]
    fn test_empty_metrics_table_keeps_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roc_auc_metrics.csv");
        write_metrics(&path, &[]).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "model,roc_auc\n");
    }

    #[test]
    fn test_missing_folder_yields_no_windows_error() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("line-a");
        std::fs::create_dir(&folder).unwrap();
        let pipeline = TrainingPipeline::from_config(&ServiceConfig::default());
        assert!(matches!(
            pipeline.train_unit(&folder, 50),
            Err(TrainingError::NoWindows { window_size: 50, .. })
        ));
    }
}
