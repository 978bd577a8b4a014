//! Stratified cross-validation, hyperparameter search and the nested
//! evaluation loop.

pub mod metrics;
mod nested;
pub mod search;
pub mod split;

pub use metrics::{accuracy, recall_macro};
pub use nested::{run_nested_cv, FoldReport, NestedCvReport};
pub use search::{BayesSearch, Evaluation, SearchConfig, SearchResult, SearchSpace};
pub use split::{Fold, StratifiedKFold};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ModelError;
use crate::tracking::TrackingError;

/// Errors that can occur during cross-validation
#[derive(Debug, Error)]
pub enum CvError {
    #[error("Need at least 2 folds, got {0}")]
    InvalidSplits(usize),

    #[error("Need at least 2 samples to cross-validate, got {0}")]
    TooFewSamples(usize),

    #[error("{rows} feature rows but {labels} labels")]
    LabelCountMismatch { rows: usize, labels: usize },

    #[error("Search space is empty")]
    EmptySearchSpace,

    #[error("Failed to build worker pool: {0}")]
    ThreadPool(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Tracking(#[from] TrackingError),
}

/// Nested cross-validation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CvConfig {
    pub outer_folds: usize,
    /// Inner search; its seed also drives the outer split
    pub search: SearchConfig,
}

impl Default for CvConfig {
    fn default() -> Self {
        Self {
            outer_folds: 5,
            search: SearchConfig::default(),
        }
    }
}
