//! Dual-Model Ensemble (soft voting)
//!
//! An ordered list of weighted members, each producing a class-1
//! probability. The ensemble probability is the weighted mean of the member
//! probabilities and the verdict is NOT OK when it reaches the threshold.
//! Training fits a depth-wise and a leaf-wise booster on the same balanced
//! rows.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use super::boosting::{BoostedTrees, BoosterParams, FitError};
use crate::config::defaults::DEFAULT_DECISION_THRESHOLD;
use crate::types::Label;

#[derive(Debug, Error, PartialEq)]
pub enum EnsembleError {
    #[error("empty training set: no rows survived segmentation and balancing")]
    EmptyTrainingSet,
    #[error("member '{member}' failed to fit: {source}")]
    MemberFit {
        member: String,
        #[source]
        source: FitError,
    },
    #[error("ensemble has no members with positive weight")]
    NoMembers,
    #[error("feature vector has {actual} features, ensemble expects {expected}")]
    FeatureCount { expected: usize, actual: usize },
}

/// Anything that yields a probability of NOT OK for one feature vector.
pub trait Classifier {
    fn probability(&self, features: &[f64]) -> f64;

    /// Expected feature count, when the member knows it.
    fn n_features(&self) -> Option<usize> {
        None
    }
}

impl Classifier for BoostedTrees {
    fn probability(&self, features: &[f64]) -> f64 {
        Self::probability(self, features)
    }

    fn n_features(&self) -> Option<usize> {
        Some(Self::n_features(self))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VotingMember<C> {
    pub name: String,
    pub weight: f64,
    pub model: C,
}

/// Combined probability together with the verdict it maps to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnsemblePrediction {
    pub probability: f64,
    pub label: Label,
}

/// Weighted soft-voting combiner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftVotingEnsemble<C = BoostedTrees> {
    members: Vec<VotingMember<C>>,
    threshold: f64,
}

impl<C: Classifier> SoftVotingEnsemble<C> {
    /// Equal-weight ensemble with the default 0.5 threshold.
    pub fn new(members: Vec<(String, C)>) -> Result<Self, EnsembleError> {
        Self::weighted(
            members
                .into_iter()
                .map(|(name, model)| VotingMember {
                    name,
                    weight: 1.0,
                    model,
                })
                .collect(),
            DEFAULT_DECISION_THRESHOLD,
        )
    }

    pub fn weighted(members: Vec<VotingMember<C>>, threshold: f64) -> Result<Self, EnsembleError> {
        if !members.iter().any(|m| m.weight > 0.0) {
            return Err(EnsembleError::NoMembers);
        }
        Ok(Self {
            members,
            threshold: threshold.clamp(0.0, 1.0),
        })
    }

    pub fn members(&self) -> &[VotingMember<C>] {
        &self.members
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Same members, different decision threshold.
    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn n_features(&self) -> Option<usize> {
        self.members.iter().find_map(|m| m.model.n_features())
    }

    /// Weighted mean of member probabilities, always within `[0, 1]`.
    pub fn probability(&self, features: &[f64]) -> Result<f64, EnsembleError> {
        if let Some(expected) = self.n_features() {
            if expected != features.len() {
                return Err(EnsembleError::FeatureCount {
                    expected,
                    actual: features.len(),
                });
            }
        }
        let (weighted, total) = self
            .members
            .iter()
            .filter(|m| m.weight > 0.0)
            .fold((0.0, 0.0), |(acc, w), m| {
                (acc + m.weight * m.model.probability(features).clamp(0.0, 1.0), w + m.weight)
            });
        if total <= 0.0 {
            return Err(EnsembleError::NoMembers);
        }
        Ok((weighted / total).clamp(0.0, 1.0))
    }

    /// NOT OK iff probability >= threshold.
    pub fn label_for(&self, probability: f64) -> Label {
        if probability >= self.threshold {
            Label::NotOk
        } else {
            Label::Ok
        }
    }

    pub fn predict(&self, features: &[f64]) -> Result<EnsemblePrediction, EnsembleError> {
        let probability = self.probability(features)?;
        Ok(EnsemblePrediction {
            probability,
            label: self.label_for(probability),
        })
    }
}

/// Member configuration for [`EnsembleTrainer`].
#[derive(Debug, Clone)]
pub struct MemberSpec {
    pub name: String,
    pub weight: f64,
    pub params: BoosterParams,
}

/// Fits every member independently on the same balanced rows.
#[derive(Debug, Clone)]
pub struct EnsembleTrainer {
    members: Vec<MemberSpec>,
    threshold: f64,
}

impl Default for EnsembleTrainer {
    fn default() -> Self {
        Self::dual(BoosterParams::depth_wise(), BoosterParams::leaf_wise(), [1.0, 1.0], DEFAULT_DECISION_THRESHOLD)
    }
}

impl EnsembleTrainer {
    /// The depth-wise + leaf-wise pair.
    pub fn dual(depth_wise: BoosterParams, leaf_wise: BoosterParams, weights: [f64; 2], threshold: f64) -> Self {
        Self {
            members: vec![
                MemberSpec {
                    name: "depth_wise".to_string(),
                    weight: weights[0],
                    params: depth_wise,
                },
                MemberSpec {
                    name: "leaf_wise".to_string(),
                    weight: weights[1],
                    params: leaf_wise,
                },
            ],
            threshold,
        }
    }

    pub fn fit(&self, rows: &[Vec<f64>], labels: &[Label]) -> Result<SoftVotingEnsemble, EnsembleError> {
        if rows.is_empty() {
            return Err(EnsembleError::EmptyTrainingSet);
        }

        let mut members = Vec::with_capacity(self.members.len());
        for planned in &self.members {
            let started = std::time::Instant::now();
            let model = BoostedTrees::fit(rows, labels, &planned.params).map_err(|source| match source {
                FitError::EmptyTrainingSet => EnsembleError::EmptyTrainingSet,
                source => EnsembleError::MemberFit {
                    member: planned.name.clone(),
                    source,
                },
            })?;
            info!(
                member = %planned.name,
                trees = model.n_trees(),
                rows = rows.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Ensemble member trained"
            );
            members.push(VotingMember {
                name: planned.name.clone(),
                weight: planned.weight,
                model,
            });
        }

        SoftVotingEnsemble::weighted(members, self.threshold)
    }
}
