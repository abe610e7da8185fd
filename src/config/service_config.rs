//! Service configuration
//!
//! Every section uses `#[serde(default)]`, so a partial TOML file only
//! overrides what it names.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use super::defaults;
use crate::ml_engine::boosting::{BoosterParams, GrowthPolicy};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "BOLTWATCH_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "boltwatch.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error ({}): {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),
    #[error("config parse error ({}): {}", .0.display(), .1)]
    Parse(PathBuf, #[source] toml::de::Error),
    #[error("config serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("config validation failed:\n  - {}", .0.join("\n  - "))]
    Validation(Vec<String>),
}

// ============================================================================
// Root
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub accumulator: AccumulatorConfig,
    #[serde(default)]
    pub ensemble: EnsembleConfig,
    #[serde(default)]
    pub boosting: BoostingConfig,
    #[serde(default)]
    pub balancer: BalancerConfig,
    #[serde(default)]
    pub training: TrainingConfig,
}

impl ServiceConfig {
    /// Load configuration.
    ///
    /// Search order: `$BOLTWATCH_CONFIG`, `./boltwatch.toml`, built-in
    /// defaults. A file that fails to parse or validate is skipped with a
    /// warning.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded config from {}", CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded config from ./{}", LOCAL_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self = toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every section, collecting all violations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        for (name, addr) in [
            ("server.prediction_addr", &self.server.prediction_addr),
            ("server.data_addr", &self.server.data_addr),
        ] {
            if addr.parse::<std::net::SocketAddr>().is_err() {
                errors.push(format!("{name}: '{addr}' is not a socket address"));
            }
        }

        if self.accumulator.stale_timeout_secs == 0 {
            errors.push("accumulator.stale_timeout_secs must be > 0".to_string());
        }
        if let Some(url) = &self.accumulator.prediction_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                errors.push(format!("accumulator.prediction_url: '{url}' must be an http(s) URL"));
            }
        }

        let t = self.ensemble.threshold;
        if !(t.is_finite() && (0.0..=1.0).contains(&t)) {
            errors.push(format!("ensemble.threshold must be within [0, 1] (got {t})"));
        }
        let [w0, w1] = self.ensemble.weights;
        if !(w0.is_finite() && w1.is_finite()) || w0 < 0.0 || w1 < 0.0 || w0 + w1 <= 0.0 {
            errors.push(format!(
                "ensemble.weights must be finite, non-negative and not both zero (got [{w0}, {w1}])"
            ));
        }

        errors.extend(self.boosting.depth_wise.params().problems("boosting.depth_wise"));
        errors.extend(self.boosting.leaf_wise.params().problems("boosting.leaf_wise"));

        if self.balancer.neighbours == 0 {
            errors.push("balancer.neighbours must be > 0".to_string());
        }

        if self.training.window_sizes.is_empty() {
            errors.push("training.window_sizes must not be empty".to_string());
        }
        if self.training.window_sizes.contains(&0) {
            errors.push("training.window_sizes must all be > 0".to_string());
        }
        let f = self.training.test_fraction;
        if !(f > 0.0 && f < 1.0) {
            errors.push(format!("training.test_fraction must be within (0, 1) (got {f})"));
        }
        for rule in &self.training.relabel {
            if rule.to > 1 {
                errors.push(format!("training.relabel: {} -> {} targets an unknown class", rule.from, rule.to));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Server
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address of the prediction service.
    pub prediction_addr: String,
    /// Bind address of the data service.
    pub data_addr: String,
    /// Allowed CORS origins; empty means same-origin only.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            prediction_addr: defaults::DEFAULT_PREDICTION_ADDR.to_string(),
            data_addr: defaults::DEFAULT_DATA_ADDR.to_string(),
            cors_origins: Vec::new(),
        }
    }
}

// ============================================================================
// Models
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub dir: PathBuf,
    pub reports_db: PathBuf,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(defaults::DEFAULT_MODELS_DIR),
            reports_db: PathBuf::from(defaults::DEFAULT_REPORTS_DB),
        }
    }
}

// ============================================================================
// Accumulator
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccumulatorConfig {
    pub stale_timeout_secs: u64,
    /// Remote prediction service; the in-process predictor is used when unset.
    pub prediction_url: Option<String>,
    pub archive_enabled: bool,
    pub archive_dir: PathBuf,
}

impl AccumulatorConfig {
    pub fn stale_timeout(&self) -> Duration {
        Duration::from_secs(self.stale_timeout_secs)
    }
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self {
            stale_timeout_secs: defaults::DEFAULT_STALE_TIMEOUT_SECS,
            prediction_url: None,
            archive_enabled: true,
            archive_dir: PathBuf::from(defaults::DEFAULT_ARCHIVE_DIR),
        }
    }
}

// ============================================================================
// Ensemble
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    pub threshold: f64,
    /// `[depth_wise, leaf_wise]`
    pub weights: [f64; 2],
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            threshold: defaults::DEFAULT_DECISION_THRESHOLD,
            weights: [1.0, 1.0],
        }
    }
}

// ============================================================================
// Boosting
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingConfig {
    pub depth_wise: DepthWiseConfig,
    pub leaf_wise: LeafWiseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthWiseConfig {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub subsample: f64,
    pub lambda: f64,
    pub min_child_weight: f64,
    pub max_bins: usize,
}

impl Default for DepthWiseConfig {
    fn default() -> Self {
        let p = BoosterParams::depth_wise();
        let max_depth = match p.growth {
            GrowthPolicy::DepthWise { max_depth } | GrowthPolicy::LeafWise { max_depth, .. } => max_depth,
        };
        Self {
            n_estimators: p.n_estimators,
            learning_rate: p.learning_rate,
            max_depth,
            subsample: p.subsample,
            lambda: p.lambda,
            min_child_weight: p.min_child_weight,
            max_bins: p.max_bins,
        }
    }
}

impl DepthWiseConfig {
    pub fn params(&self) -> BoosterParams {
        BoosterParams {
            n_estimators: self.n_estimators,
            learning_rate: self.learning_rate,
            growth: GrowthPolicy::DepthWise {
                max_depth: self.max_depth,
            },
            subsample: self.subsample,
            lambda: self.lambda,
            min_child_weight: self.min_child_weight,
            max_bins: self.max_bins,
            ..BoosterParams::depth_wise()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeafWiseConfig {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub num_leaves: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub lambda: f64,
    pub max_bins: usize,
}

impl Default for LeafWiseConfig {
    fn default() -> Self {
        let p = BoosterParams::leaf_wise();
        let (num_leaves, max_depth) = match p.growth {
            GrowthPolicy::LeafWise { num_leaves, max_depth } => (num_leaves, max_depth),
            GrowthPolicy::DepthWise { max_depth } => (2, max_depth),
        };
        Self {
            n_estimators: p.n_estimators,
            learning_rate: p.learning_rate,
            num_leaves,
            max_depth,
            min_samples_leaf: p.min_samples_leaf,
            lambda: p.lambda,
            max_bins: p.max_bins,
        }
    }
}

impl LeafWiseConfig {
    pub fn params(&self) -> BoosterParams {
        BoosterParams {
            n_estimators: self.n_estimators,
            learning_rate: self.learning_rate,
            growth: GrowthPolicy::LeafWise {
                num_leaves: self.num_leaves,
                max_depth: self.max_depth,
            },
            min_samples_leaf: self.min_samples_leaf,
            lambda: self.lambda,
            max_bins: self.max_bins,
            ..BoosterParams::leaf_wise()
        }
    }
}

// ============================================================================
// Balancer
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    pub neighbours: usize,
    pub seed: u64,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            neighbours: defaults::DEFAULT_BALANCER_NEIGHBOURS,
            seed: defaults::DEFAULT_SEED,
        }
    }
}

// ============================================================================
// Training
// ============================================================================

/// One raw-label rewrite applied before training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelabelRule {
    pub from: i64,
    pub to: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub data_dir: PathBuf,
    pub window_sizes: Vec<usize>,
    pub test_fraction: f64,
    pub split_seed: u64,
    pub relabel: Vec<RelabelRule>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(defaults::DEFAULT_DATA_DIR),
            window_sizes: defaults::DEFAULT_WINDOW_SIZES.to_vec(),
            test_fraction: defaults::DEFAULT_TEST_FRACTION,
            split_seed: defaults::DEFAULT_SEED,
            relabel: vec![RelabelRule {
                from: defaults::DEFAULT_RELABEL_FROM,
                to: 1,
            }],
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
