//! Feature Builder and fitted Scaler.
//!
//! A window becomes a flat vector: all angle samples, then all torque
//! samples. The scaler is a per-feature standardisation fit once on the
//! training rows of one window size and persisted next to the ensemble.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use thiserror::Error;

use super::segmenter::Window;

/// Minimum standard deviation treated as non-constant.
const MIN_SCALE: f64 = 1e-12;

#[derive(Debug, Error, PartialEq)]
pub enum FeatureError {
    #[error("scaler mismatch: vector has {actual} features, scaler expects {expected} (window size {window_size})")]
    ScalerMismatch {
        expected: usize,
        actual: usize,
        window_size: usize,
    },
    #[error("cannot fit a scaler on an empty feature matrix")]
    EmptyMatrix,
    #[error("ragged feature matrix: row {row} has {actual} features, expected {expected}")]
    RaggedMatrix {
        row: usize,
        expected: usize,
        actual: usize,
    },
}

/// Flatten a window to `angle ++ torque`.
pub fn flatten(window: &Window<'_>) -> Vec<f64> {
    let mut features = Vec::with_capacity(window.angle.len() + window.torque.len());
    features.extend_from_slice(window.angle);
    features.extend_from_slice(window.torque);
    features
}

/// Split a flat vector back into its angle and torque halves.
pub fn unflatten(features: &[f64]) -> (&[f64], &[f64]) {
    features.split_at(features.len() / 2)
}

/// Standardising scaler bound to one window size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    window_size: usize,
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl Scaler {
    /// Fit per-feature mean and population standard deviation.
    ///
    /// Constant features get a scale of 1.0 so they map to zero.
    pub fn fit(rows: &[Vec<f64>], window_size: usize) -> Result<Self, FeatureError> {
        let expected = 2 * window_size;
        if rows.is_empty() || expected == 0 {
            return Err(FeatureError::EmptyMatrix);
        }
        if let Some((row, r)) = rows.iter().enumerate().find(|(_, r)| r.len() != expected) {
            return Err(FeatureError::RaggedMatrix {
                row,
                expected,
                actual: r.len(),
            });
        }

        let mut mean = Vec::with_capacity(expected);
        let mut scale = Vec::with_capacity(expected);
        for j in 0..expected {
            let column = rows.iter().map(|r| r[j]);
            let m = column.clone().mean();
            let sd = column.population_std_dev();
            mean.push(m);
            scale.push(if sd.is_finite() && sd > MIN_SCALE { sd } else { 1.0 });
        }

        Ok(Self {
            window_size,
            mean,
            scale,
        })
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    /// Apply the stored affine transform to one vector.
    pub fn transform(&self, features: &[f64]) -> Result<Vec<f64>, FeatureError> {
        if features.len() != 2 * self.window_size || features.len() != self.mean.len() {
            return Err(FeatureError::ScalerMismatch {
                expected: 2 * self.window_size,
                actual: features.len(),
                window_size: self.window_size,
            });
        }
        Ok(features
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(x, (m, s))| (x - m) / s)
            .collect())
    }

    pub fn transform_rows(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, FeatureError> {
        rows.iter().map(|r| self.transform(r)).collect()
    }
}

/// Flatten and scale one window in a single step.
pub fn build(window: &Window<'_>, scaler: &Scaler) -> Result<Vec<f64>, FeatureError> {
    scaler.transform(&flatten(window))
}
