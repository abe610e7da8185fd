//! In-process regression tests of the prediction and data services.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use boltwatch::api::{data_app, prediction_app, DataState, PredictionState};
use boltwatch::ml_engine::{BoosterParams, EnsembleTrainer, Scaler};
use boltwatch::pipeline::{CycleAccumulator, LocalPredictor};
use boltwatch::storage::{DefectArchive, FileArtifactStore, ModelRegistry};
use boltwatch::types::{Label, RegistryKey};

const WS: usize = 3;

/// Registry holding `line-a/ensemble_3`: low torque is OK, high torque NOT OK.
fn trained_registry(dir: &std::path::Path) -> Arc<ModelRegistry> {
    let mut rows = Vec::new();
    let mut labels = Vec::new();
    for i in 0..40 {
        let a = f64::from(i % 10);
        let angle = [a, a + 1.0, a + 2.0];
        let jitter = f64::from(i % 5);
        for (base, label) in [(10.0, Label::Ok), (90.0, Label::NotOk)] {
            let mut row = angle.to_vec();
            row.extend([base + jitter, base + jitter + 1.0, base + jitter + 2.0]);
            rows.push(row);
            labels.push(label);
        }
    }
    let scaler = Scaler::fit(&rows, WS).unwrap();
    let scaled = scaler.transform_rows(&rows).unwrap();
    let mut depth = BoosterParams::depth_wise();
    depth.n_estimators = 20;
    let mut leaf = BoosterParams::leaf_wise();
    leaf.n_estimators = 20;
    leaf.min_samples_leaf = 2;
    let ensemble = EnsembleTrainer::dual(depth, leaf, [1.0, 1.0], 0.5)
        .fit(&scaled, &labels)
        .unwrap();

    let registry = ModelRegistry::new(Arc::new(FileArtifactStore::new(dir)));
    registry
        .put(&RegistryKey::ensemble("line-a", WS), &ensemble, &scaler)
        .unwrap();
    Arc::new(registry)
}

fn prediction_service(registry: Arc<ModelRegistry>) -> Router {
    prediction_app(PredictionState::new(registry), &[])
}

fn data_service(registry: Arc<ModelRegistry>, archive: Option<&std::path::Path>) -> Router {
    let predictor = Arc::new(LocalPredictor::new(registry));
    let mut accumulator = CycleAccumulator::new(predictor, Duration::from_secs(10));
    if let Some(dir) = archive {
        accumulator = accumulator.with_archive(DefectArchive::new(dir));
    }
    data_app(DataState::new(Arc::new(accumulator)), &[])
}

async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn configure_body(folder: &str) -> Value {
    json!({"model_folder": folder, "model_name": "ensemble_3", "window_size": WS})
}

#[tokio::test]
async fn test_predict_separates_classes() {
    let dir = tempfile::tempdir().unwrap();
    let app = prediction_service(trained_registry(dir.path()));

    let request = |torque: [f64; 3]| {
        json!({
            "model_folder": "line-a", "model_name": "ensemble_3", "window_size": WS,
            "angle": [1.0, 2.0, 3.0], "par": torque,
        })
    };

    let (status, body) = post(&app, "/predict", request([11.0, 12.0, 13.0])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["prediction"], "OK");
    let p = body["probability"].as_f64().unwrap();
    assert!((0.0..0.5).contains(&p));

    let (status, body) = post(&app, "/predict", request([91.0, 92.0, 93.0])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["prediction"], "NOT OK");
}

#[tokio::test]
async fn test_predict_wrong_length_is_validation_error_without_load() {
    let dir = tempfile::tempdir().unwrap();
    let registry = trained_registry(dir.path());
    let app = prediction_service(Arc::clone(&registry));

    let body = json!({
        "model_folder": "line-a", "model_name": "ensemble_3", "window_size": WS,
        "angle": [1.0, 2.0], "par": [1.0, 2.0, 3.0],
    });
    let (status, body) = post(&app, "/predict", body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
    assert!(body["error"]["message"].as_str().unwrap().contains("length 3"));
    assert_eq!(registry.cached_models(), 0);
}

#[tokio::test]
async fn test_predict_unregistered_key_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let app = prediction_service(trained_registry(dir.path()));

    let body = json!({
        "model_folder": "line-z", "model_name": "ensemble_3", "window_size": WS,
        "angle": [1.0, 2.0, 3.0], "torque": [1.0, 2.0, 3.0],
    });
    let (status, body) = post(&app, "/predict", body).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_unregistered_model_turns_verdict_into_error() {
    let dir = tempfile::tempdir().unwrap();
    let app = data_service(trained_registry(dir.path()), None);

    let (status, _) = post(&app, "/update_model", configure_body("line-z")).await;
    assert_eq!(status, StatusCode::OK);

    let batch = json!({"angle": [1.0, 2.0, 3.0, 4.0], "torque": [11.0, 12.0, 13.0, 14.0], "reset": true});
    let (status, body) = post(&app, "/data", batch).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Data received");

    let (_, state) = get(&app, "/get_data").await;
    assert_eq!(state["prediction"], "Error");
    assert_eq!(state["alert"], false);
}

#[tokio::test]
async fn test_reset_replaces_cycle_contents() {
    let dir = tempfile::tempdir().unwrap();
    let app = data_service(trained_registry(dir.path()), None);
    post(&app, "/update_model", configure_body("line-a")).await;

    let first = json!({"angulo": [1.0, 2.0], "par": [10.0, 11.0], "reset": true, "identificador": "car41"});
    post(&app, "/data", first).await;
    let more = json!({"angulo": [3.0], "par": [12.0], "identificador": "car41"});
    post(&app, "/data", more).await;

    let (_, state) = get(&app, "/get_data").await;
    assert_eq!(state["angle"], json!([1.0, 2.0, 3.0]));
    assert_eq!(state["cycle_count"], 1);

    let fresh = json!({
        "angle": [5.0, 6.0], "torque": [50.0, 60.0], "reset": true,
        "identifier": "car42", "timestamp": "2024-05-01 10:00:00",
    });
    post(&app, "/data", fresh).await;

    let (status, state) = get(&app, "/get_data").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state["angle"], json!([5.0, 6.0]));
    assert_eq!(state["torque"], json!([50.0, 60.0]));
    assert_eq!(state["identifier"], "car42");
    assert_eq!(state["timestamp"], "2024-05-01 10:00:00");
    assert_eq!(state["reset"], true);
    assert_eq!(state["cycle_count"], 2);
    // Not enough samples for a window yet
    assert_eq!(state["prediction"], "");
}

#[tokio::test]
async fn test_online_verdict_and_defect_archive() {
    let models = tempfile::tempdir().unwrap();
    let archive = tempfile::tempdir().unwrap();
    let app = data_service(trained_registry(models.path()), Some(archive.path()));
    post(&app, "/update_model", configure_body("line-a")).await;

    let defective = json!({
        "angle": [1.0, 2.0, 3.0, 4.0], "torque": [91.0, 92.0, 93.0, 94.0],
        "reset": true, "identifier": "car7", "timestamp": "2024-05-01 10:00:00",
    });
    post(&app, "/data", defective).await;
    let (_, state) = get(&app, "/get_data").await;
    assert_eq!(state["prediction"], "NOT OK");
    assert_eq!(state["alert"], true);

    // The next reset closes the NOT OK cycle into the archive
    let next = json!({
        "angle": [1.0, 2.0, 3.0, 4.0], "torque": [11.0, 12.0, 13.0, 14.0],
        "reset": true, "identifier": "car8",
    });
    post(&app, "/data", next).await;
    let (_, state) = get(&app, "/get_data").await;
    assert_eq!(state["prediction"], "OK");

    let archived: Vec<_> = std::fs::read_dir(archive.path().join("car7"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(archived.len(), 1);
    let name = archived[0].file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("2024-05-01 10-00-00_line-a_car7"));
    assert!(name.ends_with("NOT OK.csv"));
    let text = std::fs::read_to_string(&archived[0]).unwrap();
    assert!(text.starts_with("angle,torque\n"));
    assert_eq!(text.lines().count(), 5);
}

#[tokio::test]
async fn test_model_catalogue_lists_trained_models() {
    let dir = tempfile::tempdir().unwrap();
    let app = prediction_service(trained_registry(dir.path()));

    let (status, body) = get(&app, "/api/v1/models").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["data"],
        json!([{"folder": "line-a", "models": [{"name": "ensemble_3", "window_size": 3}]}])
    );
}
