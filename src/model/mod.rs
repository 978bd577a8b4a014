//! Scaling pipeline and the one-vs-one RBF SVM classifier.

pub mod multiclass;
mod persist;
pub mod scaler;
pub mod svm;

pub use multiclass::OneVsOne;
pub use scaler::StandardScaler;
pub use svm::{BinarySvc, SvcParams};

use chrono::{DateTime, Utc};
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::features::{FeatureConfig, FEATURE_COUNT};
use crate::labels::{Emotion, LabelError};

/// Errors that can occur while fitting, using or persisting a model
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Cannot fit on an empty training set")]
    EmptyTrainingSet,

    #[error("Expected {expected} features, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("{rows} feature rows but {labels} labels")]
    LabelCountMismatch { rows: usize, labels: usize },

    #[error(transparent)]
    Label(#[from] LabelError),

    #[error("Failed to access model file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to (de)serialize model: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Standardisation followed by the multiclass SVM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SvmPipeline {
    scaler: StandardScaler,
    classifier: OneVsOne,
}

impl SvmPipeline {
    pub fn new(scaler: StandardScaler, classifier: OneVsOne) -> Self {
        Self { scaler, classifier }
    }

    /// Fit the scaler on `x`, then the classifier on the scaled rows
    pub fn fit(x: ArrayView2<f64>, y: &[usize], params: SvcParams) -> Result<Self, ModelError> {
        let scaler = StandardScaler::fit(x)?;
        let scaled = scaler.transform(x)?;
        let classifier = OneVsOne::fit(scaled.view(), y, params)?;
        Ok(Self { scaler, classifier })
    }

    pub fn scaler(&self) -> &StandardScaler {
        &self.scaler
    }

    pub fn classifier(&self) -> &OneVsOne {
        &self.classifier
    }

    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Vec<usize>, ModelError> {
        let scaled = self.scaler.transform(x)?;
        Ok(self.classifier.predict(scaled.view()))
    }

    pub fn predict_row(&self, row: &[f64]) -> Result<usize, ModelError> {
        let scaled = self.scaler.transform_row(row)?;
        Ok(self.classifier.predict_row(&scaled))
    }
}

/// Final trained model, persisted as a single JSON document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionModel {
    pub pipeline: SvmPipeline,
    /// Classes the classifier was fit on
    pub classes: Vec<Emotion>,
    pub feature_count: usize,
    /// Extraction settings used for training; inference must match them
    pub feature_config: FeatureConfig,
    pub trained_at: DateTime<Utc>,
}

impl EmotionModel {
    pub fn new(pipeline: SvmPipeline, feature_config: FeatureConfig) -> Result<Self, ModelError> {
        let classes = pipeline
            .classifier()
            .classes()
            .iter()
            .map(|&id| Emotion::from_id(id))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            feature_count: pipeline.scaler().n_features(),
            pipeline,
            classes,
            feature_config,
            trained_at: Utc::now(),
        })
    }

    pub fn params(&self) -> SvcParams {
        self.pipeline.classifier().params()
    }

    /// Predict the emotion of one feature vector
    pub fn predict(&self, features: &[f64]) -> Result<Emotion, ModelError> {
        if features.len() != self.feature_count {
            return Err(ModelError::DimensionMismatch {
                expected: self.feature_count,
                got: features.len(),
            });
        }
        let id = self.pipeline.predict_row(features)?;
        Ok(Emotion::from_id(id)?)
    }

    /// Whether the feature layout matches this build's extractor
    pub fn is_compatible(&self) -> bool {
        self.feature_count == FEATURE_COUNT
    }
}
