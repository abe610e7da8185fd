//! Predictor seam between the cycle accumulator and the models.
//!
//! - `LocalPredictor`: in-process registry lookup and ensemble evaluation
//! - `RemotePredictor`: calls a prediction service's `POST /predict`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::config::defaults::PREDICTION_HTTP_TIMEOUT_SECS;
use crate::ml_engine::features::build;
use crate::ml_engine::{EnsemblePrediction, Window};
use crate::storage::{LoadedModel, ModelRegistry, RegistryError};
use crate::types::{Label, PredictRequest, PredictResponse, RegistryKey, Verdict};

#[derive(Debug, Error)]
pub enum PredictionError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),
    #[error("prediction service unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("inference failed: {0}")]
    Internal(String),
}

impl From<RegistryError> for PredictionError {
    fn from(err: RegistryError) -> Self {
        match err {
            e if e.is_not_found() => Self::ArtifactNotFound(e.to_string()),
            RegistryError::InvalidKey(msg) => Self::Validation(msg),
            e => Self::Internal(e.to_string()),
        }
    }
}

/// Verdict for one window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: Label,
    /// Absent when the upstream service does not report it
    pub probability: Option<f64>,
}

impl From<EnsemblePrediction> for Prediction {
    fn from(p: EnsemblePrediction) -> Self {
        Self {
            label: p.label,
            probability: Some(p.probability),
        }
    }
}

/// Classifies exactly one window of `key.window_size` samples per channel.
#[async_trait]
pub trait Predictor: Send + Sync {
    async fn predict(&self, key: &RegistryKey, angle: &[f64], torque: &[f64]) -> Result<Prediction, PredictionError>;

    /// Backend name for logging
    fn name(&self) -> &'static str;
}

/// Both channels must hold exactly `window_size` samples. Checked before
/// any model is touched.
pub fn validate_window(window_size: usize, angle: &[f64], torque: &[f64]) -> Result<(), PredictionError> {
    if window_size == 0 {
        return Err(PredictionError::Validation("window_size must be > 0".to_string()));
    }
    if angle.len() != window_size || torque.len() != window_size {
        return Err(PredictionError::Validation(format!(
            "angle and par must both have length {window_size} (got {} and {})",
            angle.len(),
            torque.len()
        )));
    }
    Ok(())
}

/// Scale one window and run the ensemble on it.
pub fn classify(model: &LoadedModel, window: &Window<'_>) -> Result<EnsemblePrediction, PredictionError> {
    let features = build(window, &model.scaler).map_err(|e| PredictionError::Internal(e.to_string()))?;
    model
        .ensemble
        .predict(&features)
        .map_err(|e| PredictionError::Internal(e.to_string()))
}

// ============================================================================
// Local
// ============================================================================

#[derive(Clone)]
pub struct LocalPredictor {
    registry: Arc<ModelRegistry>,
}

impl LocalPredictor {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }
}

#[async_trait]
impl Predictor for LocalPredictor {
    async fn predict(&self, key: &RegistryKey, angle: &[f64], torque: &[f64]) -> Result<Prediction, PredictionError> {
        validate_window(key.window_size, angle, torque)?;
        let model = match self.registry.cached(key) {
            Some(model) => model,
            None => {
                // Cache miss reads and parses artifacts off the async workers
                let registry = Arc::clone(&self.registry);
                let owned = key.clone();
                tokio::task::spawn_blocking(move || registry.get(&owned))
                    .await
                    .map_err(|e| PredictionError::Internal(format!("model load task failed: {e}")))??
            }
        };
        let prediction = classify(&model, &Window { angle, torque })?;
        debug!(key = %key, probability = prediction.probability, label = %prediction.label, "Window classified");
        Ok(prediction.into())
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

// ============================================================================
// Remote
// ============================================================================

#[derive(Clone)]
pub struct RemotePredictor {
    http: reqwest::Client,
    base_url: String,
}

impl RemotePredictor {
    pub fn new(base_url: &str) -> Result<Self, PredictionError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(PREDICTION_HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| PredictionError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Predictor for RemotePredictor {
    async fn predict(&self, key: &RegistryKey, angle: &[f64], torque: &[f64]) -> Result<Prediction, PredictionError> {
        validate_window(key.window_size, angle, torque)?;
        let request = PredictRequest {
            model_folder: key.model_folder.clone(),
            model_name: key.model_name.clone(),
            window_size: key.window_size,
            angle: angle.to_vec(),
            par: torque.to_vec(),
        };

        let resp = self
            .http
            .post(format!("{}/predict", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| PredictionError::UpstreamUnavailable(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(PredictionError::ArtifactNotFound(upstream_message(resp).await));
        }
        if status == reqwest::StatusCode::BAD_REQUEST {
            return Err(PredictionError::Validation(upstream_message(resp).await));
        }
        if !status.is_success() {
            return Err(PredictionError::UpstreamUnavailable(format!("status {status}")));
        }

        let body: PredictResponse = resp
            .json()
            .await
            .map_err(|e| PredictionError::UpstreamUnavailable(format!("unreadable response: {e}")))?;
        let label = match body.prediction {
            Verdict::Ok => Label::Ok,
            Verdict::NotOk => Label::NotOk,
            other => {
                return Err(PredictionError::UpstreamUnavailable(format!(
                    "unexpected prediction '{other}'"
                )))
            }
        };
        Ok(Prediction {
            label,
            probability: body.probability,
        })
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

/// Error message from an envelope body, or the raw status when unreadable.
async fn upstream_message(resp: reqwest::Response) -> String {
    let status = resp.status();
    match resp.json::<serde_json::Value>().await {
        Ok(v) => v["error"]["message"]
            .as_str()
            .map_or_else(|| format!("status {status}"), str::to_string),
        Err(_) => format!("status {status}"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::thread::ThreadId;

    use super::*;
    use crate::storage::{ArtifactError, ArtifactStore, InMemoryArtifactStore};

    /// Empty store that remembers which thread each read ran on.
    #[derive(Default)]
    struct ReadThreads(Mutex<Vec<ThreadId>>);

    impl ArtifactStore for ReadThreads {
        fn write(&self, _folder: &str, _stem: &str, _bytes: &[u8]) -> Result<(), ArtifactError> {
            Ok(())
        }

        fn read(&self, _folder: &str, _stem: &str) -> Result<Option<Vec<u8>>, ArtifactError> {
            self.0.lock().unwrap().push(std::thread::current().id());
            Ok(None)
        }

        fn folders(&self) -> Result<Vec<String>, ArtifactError> {
            Ok(Vec::new())
        }

        fn stems(&self, _folder: &str) -> Result<Vec<String>, ArtifactError> {
            Ok(Vec::new())
        }

        fn backend_name(&self) -> &'static str {
            "read-threads"
        }
    }

    #[test]
    fn test_validate_window_lengths() {
        assert!(validate_window(2, &[1.0, 2.0], &[3.0, 4.0]).is_ok());
        let err = validate_window(3, &[1.0, 2.0], &[3.0, 4.0, 5.0]).unwrap_err();
        assert!(matches!(err, PredictionError::Validation(ref m) if m.contains("length 3")));
        assert!(validate_window(0, &[], &[]).is_err());
    }

    #[tokio::test]
    async fn test_validation_precedes_lookup() {
        // Nothing is registered: a lookup would fail with not-found
        let registry = Arc::new(ModelRegistry::new(Arc::new(InMemoryArtifactStore::new())));
        let predictor = LocalPredictor::new(registry);
        let key = RegistryKey::ensemble("line-a", 3);

        let err = predictor.predict(&key, &[1.0], &[1.0, 2.0, 3.0]).await.unwrap_err();
        assert!(matches!(err, PredictionError::Validation(_)));

        let err = predictor
            .predict(&key, &[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0])
            .await
            .unwrap_err();
        assert!(matches!(err, PredictionError::ArtifactNotFound(_)));
    }

    #[tokio::test]
    async fn test_model_load_runs_off_the_runtime_thread() {
        let store = Arc::new(ReadThreads::default());
        let predictor = LocalPredictor::new(Arc::new(ModelRegistry::new(store.clone())));
        let key = RegistryKey::ensemble("line-a", 2);

        let err = predictor.predict(&key, &[1.0, 2.0], &[3.0, 4.0]).await.unwrap_err();
        assert!(matches!(err, PredictionError::ArtifactNotFound(_)));

        // The current-thread test runtime polls on this thread; blocking
        // work lands on the blocking pool
        let reads = store.0.lock().unwrap().clone();
        assert_eq!(reads.len(), 1);
        assert_ne!(reads[0], std::thread::current().id());
    }

    #[tokio::test]
    async fn test_remote_unreachable_is_upstream_error() {
        // Port 9 (discard) on localhost is closed in test environments
        let predictor = RemotePredictor::new("http://127.0.0.1:9/").unwrap();
        let key = RegistryKey::ensemble("line-a", 1);
        let err = predictor.predict(&key, &[1.0], &[2.0]).await.unwrap_err();
        assert!(matches!(err, PredictionError::UpstreamUnavailable(_)));
    }
}
