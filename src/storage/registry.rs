//! Model Registry
//!
//! Maps a [`RegistryKey`] to the `(ensemble, scaler)` pair trained for it.
//! Artifacts are loaded lazily from an [`ArtifactStore`] and cached as
//! immutable `Arc`s, so concurrent lookups never copy a model.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::artifacts::{ArtifactError, ArtifactStore};
use crate::config::defaults::SCALER_PREFIX;
use crate::ml_engine::boosting::TreeError;
use crate::ml_engine::{Scaler, SoftVotingEnsemble};
use crate::types::{window_size_from_model_name, RegistryKey};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("model not found: {0}")]
    ModelNotFound(RegistryKey),
    #[error("scaler not found for {0}")]
    ScalerNotFound(RegistryKey),
    #[error("invalid registry key: {0}")]
    InvalidKey(String),
    #[error("artifact '{artifact}' does not fit {key}: {reason}")]
    ShapeMismatch {
        key: RegistryKey,
        artifact: String,
        reason: String,
    },
    #[error("artifact '{artifact}' is corrupt: {source}")]
    Corrupt {
        artifact: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("artifact '{artifact}' member '{member}' is malformed: {source}")]
    Malformed {
        artifact: String,
        member: String,
        #[source]
        source: TreeError,
    },
    #[error(transparent)]
    Storage(#[from] ArtifactError),
}

impl RegistryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ModelNotFound(_) | Self::ScalerNotFound(_))
    }
}

/// A trained ensemble with the scaler of its window size.
#[derive(Debug)]
pub struct LoadedModel {
    pub ensemble: SoftVotingEnsemble,
    pub scaler: Scaler,
}

/// One folder of the model catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelFolder {
    pub folder: String,
    pub models: Vec<ModelEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub name: String,
    /// Parsed from the suffix after the last `_`
    pub window_size: Option<usize>,
}

pub struct ModelRegistry {
    store: Arc<dyn ArtifactStore>,
    cache: RwLock<HashMap<RegistryKey, Arc<LoadedModel>>>,
    /// Serving-time decision threshold overriding the trained one
    threshold: Option<f64>,
}

impl ModelRegistry {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            threshold: None,
        }
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn scaler_stem(window_size: usize) -> String {
        format!("{SCALER_PREFIX}_{window_size}")
    }

    /// Persist an ensemble and its scaler under `key`.
    ///
    /// The scaler is shared by every model of the folder with the same
    /// window size, so cached entries for that pair are dropped.
    pub fn put(&self, key: &RegistryKey, ensemble: &SoftVotingEnsemble, scaler: &Scaler) -> Result<(), RegistryError> {
        key.validate().map_err(RegistryError::InvalidKey)?;
        Self::check_shape(key, ensemble, scaler)?;

        let scaler_bytes = serde_json::to_vec(scaler).map_err(|source| RegistryError::Corrupt {
            artifact: Self::scaler_stem(key.window_size),
            source,
        })?;
        let ensemble_bytes = serde_json::to_vec(ensemble).map_err(|source| RegistryError::Corrupt {
            artifact: key.model_name.clone(),
            source,
        })?;
        self.store
            .write(&key.model_folder, &Self::scaler_stem(key.window_size), &scaler_bytes)?;
        self.store.write(&key.model_folder, &key.model_name, &ensemble_bytes)?;

        if let Ok(mut cache) = self.cache.write() {
            cache.retain(|k, _| !(k.model_folder == key.model_folder && k.window_size == key.window_size));
        }
        info!(
            key = %key,
            backend = self.store.backend_name(),
            "Stored ensemble and scaler"
        );
        Ok(())
    }

    /// Already-loaded model for `key`, without touching the store.
    pub fn cached(&self, key: &RegistryKey) -> Option<Arc<LoadedModel>> {
        self.cache.read().ok().and_then(|c| c.get(key).cloned())
    }

    /// Resolve `key` to its model, loading it on first use.
    ///
    /// A cache miss does blocking I/O; async callers go through
    /// `spawn_blocking`.
    pub fn get(&self, key: &RegistryKey) -> Result<Arc<LoadedModel>, RegistryError> {
        key.validate().map_err(RegistryError::InvalidKey)?;

        if let Some(hit) = self.cached(key) {
            return Ok(hit);
        }

        let ensemble_bytes = self
            .store
            .read(&key.model_folder, &key.model_name)?
            .ok_or_else(|| RegistryError::ModelNotFound(key.clone()))?;
        let scaler_stem = Self::scaler_stem(key.window_size);
        let scaler_bytes = self
            .store
            .read(&key.model_folder, &scaler_stem)?
            .ok_or_else(|| RegistryError::ScalerNotFound(key.clone()))?;

        let mut ensemble: SoftVotingEnsemble =
            serde_json::from_slice(&ensemble_bytes).map_err(|source| RegistryError::Corrupt {
                artifact: key.model_name.clone(),
                source,
            })?;
        let scaler: Scaler = serde_json::from_slice(&scaler_bytes).map_err(|source| RegistryError::Corrupt {
            artifact: scaler_stem,
            source,
        })?;
        Self::check_shape(key, &ensemble, &scaler)?;
        if let Some(threshold) = self.threshold {
            ensemble = ensemble.with_threshold(threshold);
        }

        let loaded = Arc::new(LoadedModel { ensemble, scaler });
        if let Ok(mut cache) = self.cache.write() {
            // A concurrent loader may have won; keep whichever landed first
            let entry = cache.entry(key.clone()).or_insert_with(|| Arc::clone(&loaded));
            debug!(key = %key, "Model loaded into registry cache");
            return Ok(Arc::clone(entry));
        }
        Ok(loaded)
    }

    fn check_shape(key: &RegistryKey, ensemble: &SoftVotingEnsemble, scaler: &Scaler) -> Result<(), RegistryError> {
        if scaler.window_size() != key.window_size {
            return Err(RegistryError::ShapeMismatch {
                key: key.clone(),
                artifact: Self::scaler_stem(key.window_size),
                reason: format!("scaler was fit for window size {}", scaler.window_size()),
            });
        }
        if let Some(n) = ensemble.n_features() {
            if n != scaler.n_features() {
                return Err(RegistryError::ShapeMismatch {
                    key: key.clone(),
                    artifact: key.model_name.clone(),
                    reason: format!("ensemble expects {n} features, scaler produces {}", scaler.n_features()),
                });
            }
        }
        for member in ensemble.members() {
            member.model.validate().map_err(|source| RegistryError::Malformed {
                artifact: key.model_name.clone(),
                member: member.name.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Model folders with the models each one holds. Scalers are not listed.
    pub fn catalogue(&self) -> Result<Vec<ModelFolder>, RegistryError> {
        let mut folders = Vec::new();
        for folder in self.store.folders()? {
            let models = self
                .store
                .stems(&folder)?
                .into_iter()
                .filter(|stem| !stem.starts_with(SCALER_PREFIX))
                .map(|name| ModelEntry {
                    window_size: window_size_from_model_name(&name),
                    name,
                })
                .collect();
            folders.push(ModelFolder { folder, models });
        }
        Ok(folders)
    }

    pub fn cached_models(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }
}
