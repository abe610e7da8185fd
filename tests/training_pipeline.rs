//! End-to-end training sweep over cycle files on disk.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use boltwatch::config::ServiceConfig;
use boltwatch::ml_engine::training::read_metrics;
use boltwatch::ml_engine::TrainingPipeline;
use boltwatch::pipeline::{LocalPredictor, Predictor};
use boltwatch::storage::{FileArtifactStore, ModelRegistry, TrainingReportStore};
use boltwatch::types::{Label, RegistryKey};

const SAMPLES: usize = 12;

/// One angle/torque record pair per cycle. Defective cycles carry raw label 2.
fn write_cycle_file(path: &Path, ok_cycles: usize, defective_cycles: usize) {
    let mut text = String::new();
    let cycles = (0..ok_cycles)
        .map(|i| (i, 0, 10.0))
        .chain((0..defective_cycles).map(|i| (ok_cycles + i, 2, 80.0)));
    for (i, label, torque_base) in cycles {
        let jitter = (i % 7) as f64;
        let angle: Vec<String> = (0..SAMPLES).map(|s| format!("{}", s as f64 * 3.0 + jitter)).collect();
        let torque: Vec<String> = (0..SAMPLES)
            .map(|s| format!("{}", torque_base + s as f64 + jitter))
            .collect();
        writeln!(text, "car{i},{label},angle,{}", angle.join(",")).unwrap();
        writeln!(text, "car{i},{label},torque,{}", torque.join(",")).unwrap();
    }
    std::fs::write(path, text).unwrap();
}

fn small_config(data_dir: &Path, models_dir: &Path) -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.training.data_dir = data_dir.to_path_buf();
    config.training.window_sizes = vec![3];
    config.models.dir = models_dir.to_path_buf();
    config.boosting.depth_wise.n_estimators = 15;
    config.boosting.leaf_wise.n_estimators = 15;
    config.boosting.leaf_wise.min_samples_leaf = 5;
    config
}

#[tokio::test]
async fn test_sweep_trains_persists_and_serves() {
    let data = tempfile::tempdir().unwrap();
    let models = tempfile::tempdir().unwrap();

    let line_a = data.path().join("line-a");
    std::fs::create_dir(&line_a).unwrap();
    write_cycle_file(&line_a.join("cycles.csv"), 30, 20);

    // One class only: the unit fails, the sweep continues
    let line_b = data.path().join("line-b");
    std::fs::create_dir(&line_b).unwrap();
    write_cycle_file(&line_b.join("cycles.csv"), 10, 0);

    let config = small_config(data.path(), models.path());
    let registry = ModelRegistry::new(Arc::new(FileArtifactStore::new(models.path())));
    let reports = TrainingReportStore::open_temp().unwrap();
    let metrics_path = models.path().join("roc_auc_metrics.csv");

    let summary = TrainingPipeline::from_config(&config)
        .run(&registry, Some(&reports), &metrics_path)
        .unwrap();

    assert_eq!(summary.metrics.len(), 1);
    assert_eq!(summary.metrics[0].model, "line-a/ensemble_3");
    assert!(summary.metrics[0].roc_auc > 0.9, "roc_auc = {}", summary.metrics[0].roc_auc);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].folder, "line-b");

    // Artifacts and metrics table
    assert!(models.path().join("line-a").join("ensemble_3.json").exists());
    assert!(models.path().join("line-a").join("scaler_3.json").exists());
    assert_eq!(read_metrics(&metrics_path).unwrap(), summary.metrics);

    // Report history
    let history = reports.list(Some("line-a"), 10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].key, RegistryKey::ensemble("line-a", 3));
    assert!(history[0].counts_after.total() >= history[0].counts_before.total());

    // The trained pair serves predictions
    let predictor = LocalPredictor::new(Arc::new(registry));
    let key = RegistryKey::ensemble("line-a", 3);
    let ok = predictor.predict(&key, &[0.0, 3.0, 6.0], &[10.0, 11.0, 12.0]).await.unwrap();
    assert_eq!(ok.label, Label::Ok);
    let defect = predictor.predict(&key, &[0.0, 3.0, 6.0], &[80.0, 81.0, 82.0]).await.unwrap();
    assert_eq!(defect.label, Label::NotOk);
}

#[test]
fn test_sweep_over_empty_data_dir_writes_header_only() {
    let data = tempfile::tempdir().unwrap();
    let models = tempfile::tempdir().unwrap();
    let config = small_config(data.path(), models.path());
    let registry = ModelRegistry::new(Arc::new(FileArtifactStore::new(models.path())));
    let metrics_path = models.path().join("roc_auc_metrics.csv");

    let summary = TrainingPipeline::from_config(&config)
        .run(&registry, None, &metrics_path)
        .unwrap();

    assert!(summary.metrics.is_empty());
    assert!(summary.failed.is_empty());
    assert_eq!(std::fs::read_to_string(&metrics_path).unwrap(), "model,roc_auc\n");
}
