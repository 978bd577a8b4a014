//! MLflow tracking server client (REST API 2.0).
//!
//! Runs are created through `runs/create`; nesting uses the
//! `mlflow.parentRunId` tag the way the MLflow clients do it. Model
//! artifacts are uploaded through the server's `mlflow-artifacts` proxy, so
//! the server must run with artifact serving enabled.

use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use super::{now_millis, ExperimentTracker, ModelSignature, RunId, RunStatus, TrackingError};

/// Timeout for each REST call
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const ARTIFACT_SCHEME: &str = "mlflow-artifacts:";

#[derive(Debug, Deserialize)]
struct ExperimentResponse {
    experiment: Experiment,
}

#[derive(Debug, Deserialize)]
struct Experiment {
    experiment_id: String,
}

#[derive(Debug, Deserialize)]
struct CreateExperimentResponse {
    experiment_id: String,
}

#[derive(Debug, Deserialize)]
struct CreateRunResponse {
    run: Run,
}

#[derive(Debug, Deserialize)]
struct Run {
    info: RunInfo,
}

#[derive(Debug, Deserialize)]
struct RunInfo {
    run_id: String,
    artifact_uri: String,
}

/// MLflow REST client bound to one experiment
pub struct MlflowTracker {
    client: Client,
    base_url: String,
    experiment_id: String,
    /// Artifact root of each run, as reported by the server
    artifact_roots: HashMap<RunId, String>,
}

impl MlflowTracker {
    /// Connect and resolve (or create) the experiment by name
    pub fn connect(base_url: &str, experiment: &str) -> Result<Self, TrackingError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let mut tracker = Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            experiment_id: String::new(),
            artifact_roots: HashMap::new(),
        };
        tracker.experiment_id = tracker.get_or_create_experiment(experiment)?;
        info!(
            "Using MLflow experiment '{}' (id {})",
            experiment, tracker.experiment_id
        );
        Ok(tracker)
    }

    fn api_url(&self, endpoint: &str) -> String {
        format!("{}/api/2.0/mlflow/{}", self.base_url, endpoint)
    }

    fn get_or_create_experiment(&self, name: &str) -> Result<String, TrackingError> {
        let url = self.api_url("experiments/get-by-name");
        let response = self
            .client
            .get(&url)
            .query(&[("experiment_name", name)])
            .send()?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!("Experiment '{}' not found, creating it", name);
            let created: CreateExperimentResponse =
                self.post("experiments/create", &json!({ "name": name }))?;
            return Ok(created.experiment_id);
        }

        let found: ExperimentResponse = parse_response(&url, response)?;
        Ok(found.experiment.experiment_id)
    }

    fn post<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<T, TrackingError> {
        let url = self.api_url(endpoint);
        let response = self.client.post(&url).json(body).send()?;
        parse_response(&url, response)
    }

    /// URL that accepts a PUT of one artifact file under `run`
    fn artifact_upload_url(&self, run: &RunId, relative: &str) -> Result<String, TrackingError> {
        let root = self
            .artifact_roots
            .get(run)
            .ok_or_else(|| TrackingError::UnknownRun(run.0.clone()))?;
        let path = root
            .strip_prefix(ARTIFACT_SCHEME)
            .ok_or_else(|| TrackingError::UnsupportedArtifactStore(root.clone()))?
            .trim_start_matches('/');
        Ok(format!(
            "{}/api/2.0/mlflow-artifacts/artifacts/{}/{}",
            self.base_url, path, relative
        ))
    }

    fn upload_artifact(
        &self,
        run: &RunId,
        relative: &str,
        content: String,
    ) -> Result<(), TrackingError> {
        let url = self.artifact_upload_url(run, relative)?;
        let response = self.client.put(&url).body(content).send()?;
        check_status(&url, response).map(|_| ())
    }
}

impl ExperimentTracker for MlflowTracker {
    fn start_run(&mut self, name: &str, parent: Option<&RunId>) -> Result<RunId, TrackingError> {
        let mut tags = vec![json!({ "key": "mlflow.runName", "value": name })];
        if let Some(parent) = parent {
            tags.push(json!({ "key": "mlflow.parentRunId", "value": parent.0 }));
        }

        let created: CreateRunResponse = self.post(
            "runs/create",
            &json!({
                "experiment_id": self.experiment_id,
                "run_name": name,
                "start_time": now_millis(),
                "tags": tags,
            }),
        )?;

        let run_id = RunId(created.run.info.run_id);
        self.artifact_roots
            .insert(run_id.clone(), created.run.info.artifact_uri);
        debug!("Started MLflow run '{}' ({})", name, run_id);
        Ok(run_id)
    }

    fn log_params(&mut self, run: &RunId, params: &[(&str, String)]) -> Result<(), TrackingError> {
        let params: Vec<serde_json::Value> = params
            .iter()
            .map(|(key, value)| json!({ "key": key, "value": value }))
            .collect();
        let _: serde_json::Value = self.post(
            "runs/log-batch",
            &json!({ "run_id": run.0, "params": params }),
        )?;
        Ok(())
    }

    fn log_metric(&mut self, run: &RunId, key: &str, value: f64) -> Result<(), TrackingError> {
        let _: serde_json::Value = self.post(
            "runs/log-metric",
            &json!({
                "run_id": run.0,
                "key": key,
                "value": value,
                "timestamp": now_millis(),
                "step": 0,
            }),
        )?;
        Ok(())
    }

    fn log_model(
        &mut self,
        run: &RunId,
        artifact_path: &str,
        model: &serde_json::Value,
        signature: &ModelSignature,
    ) -> Result<(), TrackingError> {
        let (inputs, outputs) = signature.to_mlflow_strings()?;
        let mlmodel = format!(
            "artifact_path: {path}\n\
             flavors:\n  \
               ser_svm:\n    \
                 data: model.json\n\
             run_id: {run}\n\
             signature:\n  \
               inputs: '{inputs}'\n  \
               outputs: '{outputs}'\n\
             utc_time_created: '{time}'\n",
            path = artifact_path,
            run = run.0,
            inputs = inputs,
            outputs = outputs,
            time = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.6f"),
        );

        self.upload_artifact(
            run,
            &format!("{}/model.json", artifact_path),
            serde_json::to_string(model)?,
        )?;
        self.upload_artifact(run, &format!("{}/MLmodel", artifact_path), mlmodel)?;
        debug!("Uploaded model artifact '{}' to run {}", artifact_path, run);
        Ok(())
    }

    fn end_run(&mut self, run: &RunId, status: RunStatus) -> Result<(), TrackingError> {
        let _: serde_json::Value = self.post(
            "runs/update",
            &json!({
                "run_id": run.0,
                "status": status.as_str(),
                "end_time": now_millis(),
            }),
        )?;
        Ok(())
    }
}

fn check_status(
    url: &str,
    response: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response, TrackingError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(TrackingError::Server {
        endpoint: url.to_string(),
        status: status.as_u16(),
        body,
    })
}

fn parse_response<T: DeserializeOwned>(
    url: &str,
    response: reqwest::blocking::Response,
) -> Result<T, TrackingError> {
    let response = check_status(url, response)?;
    let text = response.text()?;
    serde_json::from_str(&text)
        .map_err(|e| TrackingError::Response(format!("{}: {} ({})", url, e, text)))
}
