//! System-wide default constants.
//!
//! Grouped by subsystem for easy discovery.

// ============================================================================
// Training
// ============================================================================

/// Seed shared by the split shuffle, the balancer and row subsampling.
pub const DEFAULT_SEED: u64 = 42;

/// Window sizes swept per model folder.
pub const DEFAULT_WINDOW_SIZES: [usize; 3] = [50, 100, 500];

/// Fraction of windows held out for evaluation.
pub const DEFAULT_TEST_FRACTION: f64 = 0.2;

/// Neighbours used when interpolating synthetic minority rows.
pub const DEFAULT_BALANCER_NEIGHBOURS: usize = 5;

/// Boosting rounds per ensemble member.
pub const DEFAULT_N_ESTIMATORS: usize = 200;

/// Shrinkage applied to every tree's leaf values.
pub const DEFAULT_LEARNING_RATE: f64 = 0.1;

/// Raw label folded into NOT OK before training.
pub const DEFAULT_RELABEL_FROM: i64 = 2;

// ============================================================================
// Ensemble
// ============================================================================

/// NOT OK iff the soft-vote probability is at or above this value.
pub const DEFAULT_DECISION_THRESHOLD: f64 = 0.5;

// ============================================================================
// Accumulator
// ============================================================================

/// Seconds without a batch before the current cycle is considered stale.
pub const DEFAULT_STALE_TIMEOUT_SECS: u64 = 10;

/// Directory receiving archived NOT OK cycles.
pub const DEFAULT_ARCHIVE_DIR: &str = "graficas";

/// HTTP timeout for calls to a remote prediction service (seconds).
pub const PREDICTION_HTTP_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// Storage
// ============================================================================

pub const DEFAULT_MODELS_DIR: &str = "models";

pub const DEFAULT_DATA_DIR: &str = "data";

/// Sled database holding the training report history.
pub const DEFAULT_REPORTS_DB: &str = "data/training_reports.db";

/// Metrics table written next to the model folders after a sweep.
pub const METRICS_FILE_NAME: &str = "roc_auc_metrics.csv";

/// Artifact stems starting with this prefix are scalers, not models.
pub const SCALER_PREFIX: &str = "scaler";

// ============================================================================
// Server
// ============================================================================

pub const DEFAULT_PREDICTION_ADDR: &str = "0.0.0.0:8000";

pub const DEFAULT_DATA_ADDR: &str = "127.0.0.1:8001";

/// Default number of training reports returned by the history endpoint.
pub const DEFAULT_REPORT_LIMIT: usize = 50;
