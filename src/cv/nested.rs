use ndarray::{ArrayView2, Axis};
use tracing::info;

use super::metrics::{accuracy, mean, recall_macro};
use super::search::{BayesSearch, SearchResult};
use super::split::StratifiedKFold;
use super::{CvConfig, CvError};
use crate::model::{StandardScaler, SvcParams, SvmPipeline};
use crate::tracking::{
    ExperimentTracker, ModelSignature, RunId, RunStatus, TrackingError, METRIC_INNER_RECALL,
    METRIC_OUTER_ACCURACY, METRIC_OUTER_RECALL, PARAM_C, PARAM_GAMMA,
};

/// Outcome of one outer fold
#[derive(Debug, Clone, PartialEq)]
pub struct FoldReport {
    /// 1-based fold number
    pub fold: usize,
    pub params: SvcParams,
    pub inner_recall: f64,
    pub accuracy: f64,
    pub recall: f64,
}

#[derive(Debug, Clone)]
pub struct NestedCvReport {
    pub folds: Vec<FoldReport>,
    /// Scaler + classifier refit on the full dataset
    pub final_pipeline: SvmPipeline,
    pub final_search: SearchResult,
}

impl NestedCvReport {
    /// Mean held-out accuracy over the outer folds
    pub fn mean_accuracy(&self) -> f64 {
        mean(&self.folds.iter().map(|f| f.accuracy).collect::<Vec<_>>())
    }

    /// Mean held-out macro recall over the outer folds
    pub fn mean_recall(&self) -> f64 {
        mean(&self.folds.iter().map(|f| f.recall).collect::<Vec<_>>())
    }
}

/// Fit the scaler on `x`, search on the scaled rows, and pair the scaler
/// with the refit winner
fn fit_pipeline(
    x: ArrayView2<f64>,
    y: &[usize],
    search: &BayesSearch,
) -> Result<(SvmPipeline, SearchResult), CvError> {
    let scaler = StandardScaler::fit(x)?;
    let scaled = scaler.transform(x)?;
    let result = search.fit(scaled.view(), y)?;
    let pipeline = SvmPipeline::new(scaler, result.best_estimator.clone());
    Ok((pipeline, result))
}

/// Nested stratified cross-validation.
///
/// Each outer fold fits scaler and search on its training partition and is
/// scored on the held-out partition, then logged as a child run of
/// `parent`. Finally the whole procedure is repeated on all rows to produce
/// the model that gets persisted. Any failure aborts the run.
pub fn run_nested_cv(
    x: ArrayView2<f64>,
    y: &[usize],
    config: &CvConfig,
    tracker: &mut dyn ExperimentTracker,
    parent: &RunId,
) -> Result<NestedCvReport, CvError> {
    if x.nrows() != y.len() {
        return Err(CvError::LabelCountMismatch {
            rows: x.nrows(),
            labels: y.len(),
        });
    }

    let signature = ModelSignature::infer(x);
    let outer = StratifiedKFold::new(config.outer_folds, config.search.seed).split(y)?;
    let search = BayesSearch::new(config.search.clone());

    info!(
        "Nested CV: {} samples, {} outer folds, {} inner folds",
        y.len(),
        outer.len(),
        config.search.inner_folds
    );

    let mut folds = Vec::with_capacity(outer.len());
    for (idx, fold) in outer.iter().enumerate() {
        let fold_number = idx + 1;
        let x_train = x.select(Axis(0), &fold.train);
        let y_train: Vec<usize> = fold.train.iter().map(|&i| y[i]).collect();
        let x_test = x.select(Axis(0), &fold.test);
        let y_test: Vec<usize> = fold.test.iter().map(|&i| y[i]).collect();

        let (pipeline, result) = fit_pipeline(x_train.view(), &y_train, &search)?;
        let y_pred = pipeline.predict(x_test.view())?;

        let report = FoldReport {
            fold: fold_number,
            params: result.best_params,
            inner_recall: result.best_score,
            accuracy: accuracy(&y_test, &y_pred),
            recall: recall_macro(&y_test, &y_pred),
        };
        info!(
            "Fold {}/{}: C={}, gamma={}, inner recall={:.4}, outer acc={:.4}, outer recall={:.4}",
            fold_number,
            outer.len(),
            report.params.c,
            report.params.gamma,
            report.inner_recall,
            report.accuracy,
            report.recall
        );

        log_fold(tracker, parent, &report, &pipeline, &signature)?;
        folds.push(report);
    }

    info!("Refitting on all {} samples", y.len());
    let (final_pipeline, final_search) = fit_pipeline(x, y, &search)?;

    Ok(NestedCvReport {
        folds,
        final_pipeline,
        final_search,
    })
}

fn log_fold(
    tracker: &mut dyn ExperimentTracker,
    parent: &RunId,
    report: &FoldReport,
    pipeline: &SvmPipeline,
    signature: &ModelSignature,
) -> Result<(), TrackingError> {
    let run = tracker.start_run(&format!("Fold_{}", report.fold), Some(parent))?;
    tracker.log_params(
        &run,
        &[
            (PARAM_C, report.params.c.to_string()),
            (PARAM_GAMMA, report.params.gamma.to_string()),
        ],
    )?;
    tracker.log_metric(&run, METRIC_INNER_RECALL, report.inner_recall)?;
    tracker.log_metric(&run, METRIC_OUTER_ACCURACY, report.accuracy)?;
    tracker.log_metric(&run, METRIC_OUTER_RECALL, report.recall)?;
    tracker.log_model(&run, "best_model", &serde_json::to_value(pipeline)?, signature)?;
    tracker.end_run(&run, RunStatus::Finished)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cv::search::{SearchConfig, SearchSpace};
    use crate::tracking::FileTracker;
    use ndarray::Array2;
    use tempfile::tempdir;

    /// Three classes on separate corners of a 4-d cube
    fn blobs() -> (Array2<f64>, Vec<usize>) {
        let mut flat = Vec::new();
        let mut y = Vec::new();
        for class in 0..3usize {
            for k in 0..6 {
                let jitter = (k as f64 * 1.3).sin() * 0.2;
                for dim in 0..4 {
                    let base = if dim == class { 3.0 } else { 0.0 };
                    flat.push(base + jitter * (dim as f64 + 1.0) * 0.3);
                }
                y.push(class);
            }
        }
        (Array2::from_shape_vec((y.len(), 4), flat).unwrap(), y)
    }

    fn quick_config() -> CvConfig {
        CvConfig {
            outer_folds: 3,
            search: SearchConfig {
                space: SearchSpace {
                    c: vec![0.1, 1.0, 10.0],
                    gamma: vec![0.01, 0.1, 1.0],
                },
                n_iter: 5,
                n_initial_points: 3,
                inner_folds: 3,
                seed: 42,
                n_jobs: 2,
            },
        }
    }

    #[test]
    fn test_reports_and_logs_every_fold() {
        let (x, y) = blobs();
        let dir = tempdir().unwrap();
        let mut tracker = FileTracker::new(dir.path().to_path_buf(), "exp").unwrap();
        let parent = tracker.start_run("SVM-SER", None).unwrap();

        let report = run_nested_cv(x.view(), &y, &quick_config(), &mut tracker, &parent).unwrap();

        assert_eq!(report.folds.len(), 3);
        for fold in &report.folds {
            assert!((0.0..=1.0).contains(&fold.accuracy));
            assert!((0.0..=1.0).contains(&fold.recall));
            assert!((0.0..=1.0).contains(&fold.inner_recall));
        }
        assert!(report.mean_accuracy() > 0.8);

        let children: Vec<_> = tracker
            .runs()
            .into_iter()
            .filter(|r| r.parent.as_ref() == Some(&parent))
            .map(|r| (r.name.clone(), r.metrics.len(), r.artifacts.len()))
            .collect();
        assert_eq!(children.len(), 3);
        let mut names: Vec<_> = children.iter().map(|c| c.0.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["Fold_1", "Fold_2", "Fold_3"]);
        assert!(children.iter().all(|c| c.1 == 3 && c.2 > 0));
    }

    #[test]
    fn test_fold_params_use_estimator_keys() {
        let (x, y) = blobs();
        let dir = tempdir().unwrap();
        let mut tracker = FileTracker::new(dir.path().to_path_buf(), "exp").unwrap();
        let parent = tracker.start_run("SVM-SER", None).unwrap();

        let report = run_nested_cv(x.view(), &y, &quick_config(), &mut tracker, &parent).unwrap();

        let first = tracker
            .runs()
            .into_iter()
            .find(|r| r.name == "Fold_1")
            .unwrap();
        let mut keys: Vec<_> = first.params.keys().map(String::as_str).collect();
        keys.sort();
        assert_eq!(keys, vec!["estimator__C", "estimator__gamma"]);
        assert_eq!(first.params["estimator__C"], report.folds[0].params.c.to_string());
        assert_eq!(
            first.params["estimator__gamma"],
            report.folds[0].params.gamma.to_string()
        );
    }

    #[test]
    fn test_final_pipeline_fits_all_rows() {
        let (x, y) = blobs();
        let dir = tempdir().unwrap();
        let mut tracker = FileTracker::new(dir.path().to_path_buf(), "exp").unwrap();
        let parent = tracker.start_run("SVM-SER", None).unwrap();

        let report = run_nested_cv(x.view(), &y, &quick_config(), &mut tracker, &parent).unwrap();
        assert_eq!(report.final_pipeline.classifier().classes(), &[0, 1, 2]);
        assert_eq!(report.final_pipeline.classifier().params(), report.final_search.best_params);
        let predicted = report.final_pipeline.predict(x.view()).unwrap();
        assert!(accuracy(&y, &predicted) > 0.9);
    }

    struct FailingTracker;

    impl ExperimentTracker for FailingTracker {
        fn start_run(&mut self, _: &str, _: Option<&RunId>) -> Result<RunId, TrackingError> {
            Err(TrackingError::Response("tracker offline".to_string()))
        }
        fn log_params(&mut self, _: &RunId, _: &[(&str, String)]) -> Result<(), TrackingError> {
            Ok(())
        }
        fn log_metric(&mut self, _: &RunId, _: &str, _: f64) -> Result<(), TrackingError> {
            Ok(())
        }
        fn log_model(
            &mut self,
            _: &RunId,
            _: &str,
            _: &serde_json::Value,
            _: &ModelSignature,
        ) -> Result<(), TrackingError> {
            Ok(())
        }
        fn end_run(&mut self, _: &RunId, _: RunStatus) -> Result<(), TrackingError> {
            Ok(())
        }
    }

    #[test]
    fn test_tracker_failure_aborts() {
        let (x, y) = blobs();
        let parent = RunId("parent".to_string());
        let err = run_nested_cv(x.view(), &y, &quick_config(), &mut FailingTracker, &parent)
            .unwrap_err();
        assert!(matches!(err, CvError::Tracking(_)));
    }

    #[test]
    fn test_label_count_mismatch() {
        let (x, _) = blobs();
        let dir = tempdir().unwrap();
        let mut tracker = FileTracker::new(dir.path().to_path_buf(), "exp").unwrap();
        let parent = RunId("p".to_string());
        assert!(matches!(
            run_nested_cv(x.view(), &[0, 1], &quick_config(), &mut tracker, &parent),
            Err(CvError::LabelCountMismatch { rows: 18, labels: 2 })
        ));
    }
}
