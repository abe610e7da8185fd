//! Gradient-boosted decision trees for binary classification.
//!
//! Logistic loss, second-order (gradient + hessian) leaf values, histogram
//! split search. The growth policy is what makes the two ensemble members
//! structurally different: a depth-wise booster with row subsampling and L2
//! regularisation, and a leaf-wise booster with a leaf budget and a minimum
//! leaf size.

mod histogram;
mod tree;

pub use histogram::{BinMapper, BinnedMatrix};
pub use tree::{Node, RegressionTree, TreeError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::defaults;
use crate::types::Label;
use tree::GrowContext;

/// Probability clamp for the base score.
const BASE_SCORE_EPS: f64 = 1e-6;

/// Hessian floor so confident rows keep a finite leaf value.
const MIN_HESSIAN: f64 = 1e-16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FitError {
    #[error("cannot fit on an empty training set")]
    EmptyTrainingSet,
    #[error("feature matrix has {rows} rows but {labels} labels")]
    LengthMismatch { rows: usize, labels: usize },
    #[error("ragged feature matrix: row {row} has {actual} features, expected {expected}")]
    RaggedMatrix {
        row: usize,
        expected: usize,
        actual: usize,
    },
}

/// Tree construction strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum GrowthPolicy {
    /// Split every node of a level before moving on, up to `max_depth`
    DepthWise { max_depth: usize },
    /// Always split the leaf with the largest gain, up to `num_leaves`
    LeafWise { num_leaves: usize, max_depth: usize },
}

/// Hyperparameters of one booster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoosterParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub growth: GrowthPolicy,
    /// Fraction of rows drawn (without replacement) for each tree
    pub subsample: f64,
    /// L2 regularisation on leaf values
    pub lambda: f64,
    /// Minimum hessian sum per child
    pub min_child_weight: f64,
    /// Minimum rows per child
    pub min_samples_leaf: usize,
    pub max_bins: usize,
    pub seed: u64,
}

impl BoosterParams {
    /// Level-wise trees, row subsampling, L2 = 1.
    pub fn depth_wise() -> Self {
        Self {
            n_estimators: defaults::DEFAULT_N_ESTIMATORS,
            learning_rate: defaults::DEFAULT_LEARNING_RATE,
            growth: GrowthPolicy::DepthWise { max_depth: 6 },
            subsample: 0.8,
            lambda: 1.0,
            min_child_weight: 1.0,
            min_samples_leaf: 1,
            max_bins: 256,
            seed: defaults::DEFAULT_SEED,
        }
    }

    /// Best-first trees with a 50-leaf budget and 20-row minimum leaves.
    pub fn leaf_wise() -> Self {
        Self {
            n_estimators: defaults::DEFAULT_N_ESTIMATORS,
            learning_rate: defaults::DEFAULT_LEARNING_RATE,
            growth: GrowthPolicy::LeafWise {
                num_leaves: 50,
                max_depth: 20,
            },
            subsample: 1.0,
            lambda: 0.0,
            min_child_weight: 1e-3,
            min_samples_leaf: 20,
            max_bins: 255,
            seed: defaults::DEFAULT_SEED,
        }
    }

    /// Reasons these parameters cannot train anything.
    pub fn problems(&self, section: &str) -> Vec<String> {
        let mut errors = Vec::new();
        if self.n_estimators == 0 {
            errors.push(format!("{section}.n_estimators must be > 0"));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            errors.push(format!("{section}.learning_rate must be in (0, 1]"));
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            errors.push(format!("{section}.subsample must be in (0, 1]"));
        }
        if self.lambda < 0.0 || self.min_child_weight < 0.0 {
            errors.push(format!("{section}.lambda and min_child_weight must be >= 0"));
        }
        if self.max_bins < 2 {
            errors.push(format!("{section}.max_bins must be >= 2"));
        }
        match self.growth {
            GrowthPolicy::DepthWise { max_depth } if max_depth == 0 => {
                errors.push(format!("{section}.max_depth must be > 0"));
            }
            GrowthPolicy::LeafWise { num_leaves, max_depth } if num_leaves < 2 || max_depth == 0 => {
                errors.push(format!("{section}.num_leaves must be >= 2 and max_depth > 0"));
            }
            _ => {}
        }
        errors
    }
}

/// A fitted boosted-tree classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedTrees {
    base_score: f64,
    n_features: usize,
    trees: Vec<RegressionTree>,
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

impl BoostedTrees {
    pub fn fit(rows: &[Vec<f64>], labels: &[Label], params: &BoosterParams) -> Result<Self, FitError> {
        if rows.is_empty() {
            return Err(FitError::EmptyTrainingSet);
        }
        if rows.len() != labels.len() {
            return Err(FitError::LengthMismatch {
                rows: rows.len(),
                labels: labels.len(),
            });
        }
        let n_features = rows[0].len();
        if let Some((row, r)) = rows.iter().enumerate().find(|(_, r)| r.len() != n_features) {
            return Err(FitError::RaggedMatrix {
                row,
                expected: n_features,
                actual: r.len(),
            });
        }

        let n = rows.len();
        let targets: Vec<f64> = labels.iter().map(|l| l.target()).collect();
        let positive_rate = targets.iter().sum::<f64>() / n as f64;
        let p0 = positive_rate.clamp(BASE_SCORE_EPS, 1.0 - BASE_SCORE_EPS);
        let base_score = (p0 / (1.0 - p0)).ln();

        let mapper = BinMapper::fit(rows, params.max_bins);
        let matrix = BinnedMatrix::new(rows, &mapper);
        let mut rng = StdRng::seed_from_u64(params.seed);

        let mut margins = vec![base_score; n];
        let mut grad = vec![0.0; n];
        let mut hess = vec![0.0; n];
        let mut trees = Vec::with_capacity(params.n_estimators);

        for _ in 0..params.n_estimators {
            for i in 0..n {
                let p = sigmoid(margins[i]);
                grad[i] = p - targets[i];
                hess[i] = (p * (1.0 - p)).max(MIN_HESSIAN);
            }

            let sample = subsample(n, params.subsample, &mut rng);
            let ctx = GrowContext {
                mapper: &mapper,
                matrix: &matrix,
                grad: &grad,
                hess: &hess,
                params,
            };
            let tree = ctx.grow(sample);
            for (margin, row) in margins.iter_mut().zip(rows) {
                *margin += tree.predict(row);
            }
            trees.push(tree);
        }

        debug!(
            rows = n,
            features = n_features,
            trees = trees.len(),
            growth = ?params.growth,
            "Boosted trees fitted"
        );

        Ok(Self {
            base_score,
            n_features,
            trees,
        })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }

    /// Structural check of every tree, for models read back from storage.
    pub fn validate(&self) -> Result<(), TreeError> {
        self.trees.iter().try_for_each(|t| t.validate(self.n_features))
    }

    /// Raw log-odds of class 1.
    pub fn margin(&self, features: &[f64]) -> f64 {
        self.base_score + self.trees.iter().map(|t| t.predict(features)).sum::<f64>()
    }

    /// Probability of class 1 (NOT OK).
    pub fn probability(&self, features: &[f64]) -> f64 {
        sigmoid(self.margin(features))
    }
}

/// Row indices kept for one tree. Never empty.
fn subsample(n: usize, fraction: f64, rng: &mut StdRng) -> Vec<usize> {
    if fraction >= 1.0 {
        return (0..n).collect();
    }
    let rows: Vec<usize> = (0..n).filter(|_| rng.gen::<f64>() < fraction).collect();
    if rows.is_empty() {
        vec![rng.gen_range(0..n)]
    } else {
        rows
    }
}
