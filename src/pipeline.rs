//! End-to-end training and inference.
//!
//! Training: load the dataset description, extract features for every
//! clip, run nested cross-validation inside a parent tracking run, then
//! persist and log the final model. Inference: load the model, extract one
//! clip and predict.

use anyhow::{ensure, Context, Result};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::Config;
use crate::cv::{run_nested_cv, FoldReport, NestedCvReport};
use crate::dataset::{Dataset, DatasetError};
use crate::features::{FeatureExtractor, FEATURE_COUNT};
use crate::labels::Emotion;
use crate::model::{EmotionModel, SvcParams};
use crate::tracking::{
    self, ExperimentTracker, ModelSignature, RunId, RunStatus, PARAM_C, PARAM_GAMMA,
};

/// Name of the parent tracking run
pub const PARENT_RUN_NAME: &str = "SVM-SER";
/// Name of the child run holding the final model
pub const FINAL_RUN_NAME: &str = "Final-Model";

/// What a training run produced
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub folds: Vec<FoldReport>,
    /// Mean outer-fold accuracy
    pub weighted_accuracy: f64,
    /// Mean outer-fold macro recall
    pub unweighted_accuracy: f64,
    pub final_params: SvcParams,
    pub model_path: PathBuf,
}

/// Load the dataset and extract its feature matrix and class ids
pub fn load_training_data(config: &Config) -> Result<(Dataset, Array2<f64>, Vec<usize>)> {
    let dataset = Dataset::load(&config.dataset_path, config.excluded_emotion)
        .with_context(|| format!("Failed to load dataset {:?}", config.dataset_path))?;
    if dataset.is_empty() {
        return Err(DatasetError::Empty.into());
    }

    let extractor = FeatureExtractor::new(config.features.clone());
    let paths: Vec<PathBuf> = dataset.samples().iter().map(|s| s.path.clone()).collect();
    let x = extractor
        .extract_batch(&paths)
        .context("Feature extraction failed")?;
    let y: Vec<usize> = dataset.labels().iter().map(Emotion::id).collect();

    info!("Feature matrix: {} x {}", x.nrows(), x.ncols());
    Ok((dataset, x, y))
}

/// Train with the tracker configured by `config.tracking_uri`.
///
/// The tracker is only contacted once the features are extracted.
pub fn train(config: &Config) -> Result<TrainingSummary> {
    let (_, x, y) = load_training_data(config)?;
    let mut tracker = tracking::connect(&config.tracking_uri, &config.experiment_name)
        .context("Failed to connect to experiment tracker")?;
    train_on(config, tracker.as_mut(), &x, &y)
}

/// Train, logging to `tracker`.
///
/// Features are extracted before the parent run is opened, so a bad
/// dataset never leaves a dangling run. A failure afterwards marks the
/// parent run as failed.
pub fn train_with_tracker(
    config: &Config,
    tracker: &mut dyn ExperimentTracker,
) -> Result<TrainingSummary> {
    let (_, x, y) = load_training_data(config)?;
    train_on(config, tracker, &x, &y)
}

fn train_on(
    config: &Config,
    tracker: &mut dyn ExperimentTracker,
    x: &Array2<f64>,
    y: &[usize],
) -> Result<TrainingSummary> {
    let parent = tracker
        .start_run(PARENT_RUN_NAME, None)
        .context("Failed to start parent run")?;

    match train_in_run(config, tracker, &parent, x, y) {
        Ok(summary) => {
            tracker
                .end_run(&parent, RunStatus::Finished)
                .context("Failed to close parent run")?;
            Ok(summary)
        }
        Err(e) => {
            if let Err(close_err) = tracker.end_run(&parent, RunStatus::Failed) {
                warn!("Failed to mark run {} as failed: {}", parent, close_err);
            }
            Err(e)
        }
    }
}

fn train_in_run(
    config: &Config,
    tracker: &mut dyn ExperimentTracker,
    parent: &RunId,
    x: &Array2<f64>,
    y: &[usize],
) -> Result<TrainingSummary> {
    let report: NestedCvReport = run_nested_cv(x.view(), y, &config.cv, tracker, parent)
        .context("Nested cross-validation failed")?;

    let model = EmotionModel::new(report.final_pipeline.clone(), config.features.clone())?;
    model
        .save(&config.model_path)
        .context("Failed to save final model")?;

    let signature = ModelSignature::infer(x.view());
    let run = tracker.start_run(FINAL_RUN_NAME, Some(parent))?;
    tracker.log_params(
        &run,
        &[
            (PARAM_C, model.params().c.to_string()),
            (PARAM_GAMMA, model.params().gamma.to_string()),
        ],
    )?;
    tracker.log_model(&run, "final_model", &serde_json::to_value(&model)?, &signature)?;
    tracker.end_run(&run, RunStatus::Finished)?;

    Ok(TrainingSummary {
        weighted_accuracy: report.mean_accuracy(),
        unweighted_accuracy: report.mean_recall(),
        final_params: model.params(),
        folds: report.folds,
        model_path: config.model_path.clone(),
    })
}

/// Which clip to classify
#[derive(Debug, Clone)]
pub enum PredictSource {
    /// A specific audio file; the true emotion is unknown
    Audio(PathBuf),
    /// A random entry of a dataset description
    Dataset { path: PathBuf, seed: Option<u64> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub audio: PathBuf,
    pub true_emotion: Option<Emotion>,
    pub predicted: Emotion,
}

/// Load the model at `model_path` and classify one clip
pub fn predict(model_path: &Path, source: &PredictSource) -> Result<Prediction> {
    let model = EmotionModel::load(model_path)
        .with_context(|| format!("Failed to load model {:?}", model_path))?;
    predict_with_model(&model, source)
}

pub fn predict_with_model(model: &EmotionModel, source: &PredictSource) -> Result<Prediction> {
    ensure!(
        model.is_compatible(),
        "Model expects {} features but the extractor produces {}; retrain the model",
        model.feature_count,
        FEATURE_COUNT
    );

    let (audio, true_emotion) = match source {
        PredictSource::Audio(path) => (path.clone(), None),
        PredictSource::Dataset { path, seed } => {
            let dataset = Dataset::load(path, None)
                .with_context(|| format!("Failed to load dataset {:?}", path))?;
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(*seed),
                None => StdRng::from_entropy(),
            };
            let sample = dataset.random_sample(&mut rng)?;
            info!("Picked sample '{}'", sample.id);
            (sample.path.clone(), Some(sample.emotion))
        }
    };

    let extractor = FeatureExtractor::new(model.feature_config.clone());
    let features = extractor
        .extract_file(&audio)
        .with_context(|| format!("Failed to extract features from {:?}", audio))?;
    let predicted = model.predict(features.values())?;

    assert!(
        model.classes.contains(&predicted),
        "Predicted emotion not valid: {}",
        predicted
    );

    Ok(Prediction {
        audio,
        true_emotion,
        predicted,
    })
}
