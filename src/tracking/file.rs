use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use super::{ExperimentTracker, ModelSignature, RunId, RunStatus, TrackingError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub key: String,
    pub value: f64,
    pub timestamp: i64,
}

/// Everything logged to one run, stored as `<root>/<experiment>/<run id>/run.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub name: String,
    pub parent: Option<RunId>,
    /// `None` while the run is open
    pub status: Option<RunStatus>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub params: BTreeMap<String, String>,
    pub metrics: Vec<MetricRecord>,
    /// Artifact paths relative to the run's `artifacts/` directory
    pub artifacts: Vec<String>,
}

/// Local JSON-file tracker
pub struct FileTracker {
    experiment_dir: PathBuf,
    runs: HashMap<RunId, RunRecord>,
}

impl FileTracker {
    pub fn new(root: PathBuf, experiment: &str) -> Result<Self, TrackingError> {
        let experiment_dir = root.join(experiment);
        create_dir(&experiment_dir)?;
        Ok(Self {
            experiment_dir,
            runs: HashMap::new(),
        })
    }

    pub fn experiment_dir(&self) -> &Path {
        &self.experiment_dir
    }

    fn run_dir(&self, run: &RunId) -> PathBuf {
        self.experiment_dir.join(&run.0)
    }

    /// Read a run record back from disk
    pub fn load_run(&self, run: &RunId) -> Result<RunRecord, TrackingError> {
        let path = self.run_dir(run).join("run.json");
        let content = std::fs::read_to_string(&path).map_err(|source| TrackingError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// All runs started by this tracker, oldest first
    pub fn runs(&self) -> Vec<&RunRecord> {
        let mut runs: Vec<&RunRecord> = self.runs.values().collect();
        runs.sort_by_key(|r| r.start_time);
        runs
    }

    fn record_mut(&mut self, run: &RunId) -> Result<&mut RunRecord, TrackingError> {
        self.runs
            .get_mut(run)
            .ok_or_else(|| TrackingError::UnknownRun(run.0.clone()))
    }

    fn flush(&self, run: &RunId) -> Result<(), TrackingError> {
        let record = self
            .runs
            .get(run)
            .ok_or_else(|| TrackingError::UnknownRun(run.0.clone()))?;
        let path = self.run_dir(run).join("run.json");
        write_file(&path, &serde_json::to_string_pretty(record)?)
    }
}

impl ExperimentTracker for FileTracker {
    fn start_run(&mut self, name: &str, parent: Option<&RunId>) -> Result<RunId, TrackingError> {
        let run_id = RunId(Uuid::new_v4().simple().to_string());
        create_dir(&self.run_dir(&run_id))?;

        self.runs.insert(
            run_id.clone(),
            RunRecord {
                run_id: run_id.clone(),
                name: name.to_string(),
                parent: parent.cloned(),
                status: None,
                start_time: Utc::now(),
                end_time: None,
                params: BTreeMap::new(),
                metrics: Vec::new(),
                artifacts: Vec::new(),
            },
        );
        self.flush(&run_id)?;

        debug!("Started local run '{}' ({})", name, run_id);
        Ok(run_id)
    }

    fn log_params(&mut self, run: &RunId, params: &[(&str, String)]) -> Result<(), TrackingError> {
        let record = self.record_mut(run)?;
        for (key, value) in params {
            record.params.insert(key.to_string(), value.clone());
        }
        self.flush(run)
    }

    fn log_metric(&mut self, run: &RunId, key: &str, value: f64) -> Result<(), TrackingError> {
        self.record_mut(run)?.metrics.push(MetricRecord {
            key: key.to_string(),
            value,
            timestamp: super::now_millis(),
        });
        self.flush(run)
    }

    fn log_model(
        &mut self,
        run: &RunId,
        artifact_path: &str,
        model: &serde_json::Value,
        signature: &ModelSignature,
    ) -> Result<(), TrackingError> {
        let dir = self.run_dir(run).join("artifacts").join(artifact_path);
        create_dir(&dir)?;
        write_file(&dir.join("model.json"), &serde_json::to_string_pretty(model)?)?;
        write_file(
            &dir.join("signature.json"),
            &serde_json::to_string_pretty(signature)?,
        )?;

        let record = self.record_mut(run)?;
        record.artifacts.push(format!("{}/model.json", artifact_path));
        record.artifacts.push(format!("{}/signature.json", artifact_path));
        self.flush(run)
    }

    fn end_run(&mut self, run: &RunId, status: RunStatus) -> Result<(), TrackingError> {
        let record = self.record_mut(run)?;
        record.status = Some(status);
        record.end_time = Some(Utc::now());
        self.flush(run)
    }
}

fn create_dir(path: &Path) -> Result<(), TrackingError> {
    std::fs::create_dir_all(path).map_err(|source| TrackingError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write_file(path: &Path, content: &str) -> Result<(), TrackingError> {
    std::fs::write(path, content).map_err(|source| TrackingError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use tempfile::tempdir;

    #[test]
    fn test_nested_runs_are_recorded() {
        let dir = tempdir().unwrap();
        let mut tracker = FileTracker::new(dir.path().to_path_buf(), "svm").unwrap();

        let parent = tracker.start_run("SVM-SER", None).unwrap();
        let child = tracker.start_run("Fold_1", Some(&parent)).unwrap();
        tracker
            .log_params(
                &child,
                &[
                    ("estimator__C", "10".to_string()),
                    ("estimator__gamma", "0.01".to_string()),
                ],
            )
            .unwrap();
        tracker.log_metric(&child, "best_outer_acc_score", 0.75).unwrap();
        tracker.end_run(&child, RunStatus::Finished).unwrap();

        let record = tracker.load_run(&child).unwrap();
        assert_eq!(record.name, "Fold_1");
        assert_eq!(record.parent.as_ref(), Some(&parent));
        assert_eq!(record.params["estimator__C"], "10");
        assert_eq!(record.metrics[0].value, 0.75);
        assert_eq!(record.status, Some(RunStatus::Finished));
        assert!(record.end_time.is_some());

        let parent_record = tracker.load_run(&parent).unwrap();
        assert_eq!(parent_record.status, None);
    }

    #[test]
    fn test_log_model_writes_artifacts() {
        let dir = tempdir().unwrap();
        let mut tracker = FileTracker::new(dir.path().to_path_buf(), "svm").unwrap();
        let run = tracker.start_run("Final-Model", None).unwrap();

        let x = Array2::<f64>::zeros((4, 88));
        let signature = ModelSignature::infer(x.view());
        let model = serde_json::json!({ "weights": [1.0, 2.0] });
        tracker.log_model(&run, "final_model", &model, &signature).unwrap();

        let artifact = tracker
            .experiment_dir()
            .join(&run.0)
            .join("artifacts/final_model/model.json");
        let stored: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(artifact).unwrap()).unwrap();
        assert_eq!(stored, model);
        assert_eq!(tracker.load_run(&run).unwrap().artifacts.len(), 2);
    }

    #[test]
    fn test_unknown_run() {
        let dir = tempdir().unwrap();
        let mut tracker = FileTracker::new(dir.path().to_path_buf(), "svm").unwrap();
        let ghost = RunId("missing".to_string());
        assert!(matches!(
            tracker.log_metric(&ghost, "m", 1.0),
            Err(TrackingError::UnknownRun(_))
        ));
    }
}
