//! Typed request/response records for the prediction and data services.
//!
//! Field names follow the wire contract the line-side relay and dashboard
//! already speak (`angulo`/`par` are accepted as aliases of `angle`/`torque`).

use serde::{Deserialize, Serialize};

use super::{RegistryKey, Verdict};

/// Configure-model: select the registry entry used for online inference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigureModelRequest {
    pub model_folder: String,
    pub model_name: String,
    pub window_size: usize,
}

impl ConfigureModelRequest {
    pub fn into_key(self) -> Result<RegistryKey, String> {
        let key = RegistryKey::new(self.model_folder, self.model_name, self.window_size);
        key.validate()?;
        Ok(key)
    }
}

/// Submit-samples: one batch of streamed samples for the current cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitSamplesRequest {
    #[serde(alias = "angulo")]
    pub angle: Vec<f64>,
    #[serde(alias = "par")]
    pub torque: Vec<f64>,
    #[serde(default)]
    pub reset: bool,
    #[serde(default, alias = "identificador")]
    pub identifier: String,
    #[serde(default, alias = "fecha")]
    pub timestamp: String,
}

/// Predict: stateless verdict for exactly one window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictRequest {
    pub model_folder: String,
    pub model_name: String,
    pub window_size: usize,
    #[serde(alias = "angulo")]
    pub angle: Vec<f64>,
    #[serde(alias = "torque")]
    pub par: Vec<f64>,
}

impl PredictRequest {
    pub fn key(&self) -> RegistryKey {
        RegistryKey::new(&self.model_folder, &self.model_name, self.window_size)
    }

    /// Shape validation, done before any model is loaded.
    pub fn validate(&self) -> Result<(), String> {
        self.key().validate()?;
        if self.angle.len() != self.window_size || self.par.len() != self.window_size {
            return Err(format!(
                "angle and par must both have length {} (got {} and {})",
                self.window_size,
                self.angle.len(),
                self.par.len()
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    pub prediction: Verdict,
    /// Ensemble probability of NOT OK
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probability: Option<f64>,
}

/// Fetch-current-state: snapshot of the cycle accumulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleStateResponse {
    pub angle: Vec<f64>,
    pub torque: Vec<f64>,
    pub prediction: Verdict,
    pub identifier: String,
    pub timestamp: String,
    /// Reset flag of the last accepted batch
    pub reset: bool,
    /// Number of cycles opened by a reset
    pub cycle_count: u64,
    /// No batch accepted within the quiescence timeout
    pub stale: bool,
    /// Operator alert: latest verdict is NOT OK
    pub alert: bool,
}

/// Plain acknowledgement body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    pub message: String,
}

impl Ack {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
