//! Experiment tracking: runs with parameters, metrics and model artifacts.
//!
//! Two backends implement [`ExperimentTracker`]: an MLflow REST client for
//! `http(s)://` tracking URIs and a local JSON store for `file:` URIs.

mod file;
mod mlflow;

pub use file::FileTracker;
pub use mlflow::MlflowTracker;

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing::info;

/// Param: SVM regularisation, keyed as the search estimator's parameter
pub const PARAM_C: &str = "estimator__C";
/// Param: RBF kernel coefficient
pub const PARAM_GAMMA: &str = "estimator__gamma";

/// Metric: best mean inner-fold macro recall of a fold's search
pub const METRIC_INNER_RECALL: &str = "best_inner_recall_score";
/// Metric: accuracy on the held-out outer partition
pub const METRIC_OUTER_ACCURACY: &str = "best_outer_acc_score";
/// Metric: macro recall on the held-out outer partition
pub const METRIC_OUTER_RECALL: &str = "best_outer_recall_score";

/// Errors that can occur while talking to a tracking backend
#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Tracking server returned HTTP {status} for {endpoint}: {body}")]
    Server {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Unexpected tracking response: {0}")]
    Response(String),

    #[error("Unsupported tracking URI: {0}")]
    UnsupportedUri(String),

    #[error("Unsupported artifact location: {0}")]
    UnsupportedArtifactStore(String),

    #[error("Unknown run: {0}")]
    UnknownRun(String),

    #[error("Failed to write {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Identifier of a tracked run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Terminal state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Finished,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
        }
    }
}

/// dtype and shape of one tensor; `-1` marks the batch dimension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorSpec {
    pub dtype: String,
    pub shape: Vec<i64>,
}

/// Input/output schema recorded with a logged model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSignature {
    pub inputs: TensorSpec,
    pub outputs: TensorSpec,
}

impl ModelSignature {
    /// Feature matrix in, one integer class id per row out
    pub fn infer(x: ArrayView2<f64>) -> Self {
        Self {
            inputs: TensorSpec {
                dtype: "float64".to_string(),
                shape: vec![-1, x.ncols() as i64],
            },
            outputs: TensorSpec {
                dtype: "int64".to_string(),
                shape: vec![-1],
            },
        }
    }

    /// Signature encoded as the `MLmodel` file expects: each side is a
    /// JSON string holding a list of tensor specs
    pub fn to_mlflow_strings(&self) -> Result<(String, String), TrackingError> {
        let encode = |spec: &TensorSpec| {
            serde_json::to_string(&serde_json::json!([{
                "type": "tensor",
                "tensor-spec": { "dtype": spec.dtype, "shape": spec.shape },
            }]))
        };
        Ok((encode(&self.inputs)?, encode(&self.outputs)?))
    }
}

/// Run-oriented experiment tracking
pub trait ExperimentTracker {
    /// Open a run, nested under `parent` when given
    fn start_run(&mut self, name: &str, parent: Option<&RunId>) -> Result<RunId, TrackingError>;

    fn log_params(&mut self, run: &RunId, params: &[(&str, String)]) -> Result<(), TrackingError>;

    fn log_metric(&mut self, run: &RunId, key: &str, value: f64) -> Result<(), TrackingError>;

    /// Store a serialized model under `artifact_path` together with its signature
    fn log_model(
        &mut self,
        run: &RunId,
        artifact_path: &str,
        model: &serde_json::Value,
        signature: &ModelSignature,
    ) -> Result<(), TrackingError>;

    fn end_run(&mut self, run: &RunId, status: RunStatus) -> Result<(), TrackingError>;
}

/// Build a tracker for `uri`, binding it to `experiment`.
///
/// `http://` and `https://` select the MLflow REST backend; `file:<dir>`
/// (or a bare path) selects the local store.
pub fn connect(uri: &str, experiment: &str) -> Result<Box<dyn ExperimentTracker>, TrackingError> {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        info!("Tracking to MLflow at {} (experiment '{}')", uri, experiment);
        Ok(Box::new(MlflowTracker::connect(uri, experiment)?))
    } else if let Some(path) = uri.strip_prefix("file://").or_else(|| uri.strip_prefix("file:")) {
        info!("Tracking to local directory {} (experiment '{}')", path, experiment);
        Ok(Box::new(FileTracker::new(PathBuf::from(path), experiment)?))
    } else if !uri.contains("://") && !uri.is_empty() {
        info!("Tracking to local directory {} (experiment '{}')", uri, experiment);
        Ok(Box::new(FileTracker::new(PathBuf::from(uri), experiment)?))
    } else {
        Err(TrackingError::UnsupportedUri(uri.to_string()))
    }
}

/// Milliseconds since the Unix epoch
fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use tempfile::tempdir;

    #[test]
    fn test_signature_shapes() {
        let x = Array2::<f64>::zeros((10, 88));
        let signature = ModelSignature::infer(x.view());
        assert_eq!(signature.inputs.shape, vec![-1, 88]);
        assert_eq!(signature.inputs.dtype, "float64");
        assert_eq!(signature.outputs.shape, vec![-1]);
        assert_eq!(signature.outputs.dtype, "int64");
    }

    #[test]
    fn test_signature_mlflow_encoding() {
        let x = Array2::<f64>::zeros((2, 3));
        let (inputs, outputs) = ModelSignature::infer(x.view())
            .to_mlflow_strings()
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&inputs).unwrap();
        assert_eq!(parsed[0]["type"], "tensor");
        assert_eq!(parsed[0]["tensor-spec"]["shape"], serde_json::json!([-1, 3]));
        assert!(outputs.contains("int64"));
    }

    #[test]
    fn test_connect_file_uri() {
        let dir = tempdir().unwrap();
        let uri = format!("file:{}", dir.path().display());
        let mut tracker = connect(&uri, "exp").unwrap();
        let run = tracker.start_run("run", None).unwrap();
        tracker.end_run(&run, RunStatus::Finished).unwrap();
    }

    #[test]
    fn test_connect_rejects_unknown_scheme() {
        assert!(matches!(
            connect("ftp://host/path", "exp"),
            Err(TrackingError::UnsupportedUri(_))
        ));
    }
}
