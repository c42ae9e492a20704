use parking_lot::Mutex;
use reqwest::{blocking::Client, blocking::Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{collections::HashMap, fs, path::Path};

use super::{now_millis, Result, RunStatus, TrackingError, TrackingStore};

const ARTIFACT_SCHEME: &str = "mlflow-artifacts:";

#[derive(Deserialize)]
struct GetExperimentResponse {
    experiment: ExperimentInfo,
}

#[derive(Deserialize)]
struct ExperimentInfo {
    experiment_id: String,
}

#[derive(Deserialize)]
struct CreateExperimentResponse {
    experiment_id: String,
}

#[derive(Deserialize)]
struct CreateRunResponse {
    run: RunPayload,
}

#[derive(Deserialize)]
struct RunPayload {
    info: RunInfo,
}

#[derive(Deserialize)]
struct RunInfo {
    run_id: String,
    #[serde(default)]
    artifact_uri: String,
}

/// MLflow tracking server client (REST API 2.0).
///
/// Artifacts go through the server's artifact proxy, so only runs whose
/// artifact URI uses the `mlflow-artifacts:` scheme can receive files.
pub struct RestStore {
    client: Client,
    base: String,
    artifact_uris: Mutex<HashMap<String, String>>,
}

/// Proxy upload URL for one file of a run.
fn artifact_upload_url(base: &str, artifact_uri: &str, artifact_path: &str, file_name: &str) -> Result<String> {
    let location = artifact_uri
        .strip_prefix(ARTIFACT_SCHEME)
        .ok_or_else(|| TrackingError::UnsupportedArtifactUri(artifact_uri.to_string()))?
        .trim_matches('/');

    let mut url = format!("{}/api/2.0/mlflow-artifacts/artifacts/{}", base, location);
    let artifact_path = artifact_path.trim_matches('/');
    if !artifact_path.is_empty() {
        url.push('/');
        url.push_str(artifact_path);
    }
    url.push('/');
    url.push_str(file_name);
    Ok(url)
}

fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().unwrap_or_default();
    Err(TrackingError::Api { status: status.as_u16(), body })
}

impl RestStore {
    pub fn new(base: &str) -> Self {
        Self {
            client: Client::new(),
            base: base.trim_end_matches('/').to_string(),
            artifact_uris: Mutex::new(HashMap::new()),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/2.0/mlflow/{}", self.base, path)
    }

    fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<Response> {
        let resp = self.client.post(self.endpoint(path)).json(body).send()?;
        check(resp)
    }
}

impl TrackingStore for RestStore {
    fn get_or_create_experiment(&self, name: &str) -> Result<String> {
        let resp = self
            .client
            .get(self.endpoint("experiments/get-by-name"))
            .query(&[("experiment_name", name)])
            .send()?;

        if resp.status() != StatusCode::NOT_FOUND {
            let found: GetExperimentResponse = check(resp)?.json()?;
            return Ok(found.experiment.experiment_id);
        }

        let created: CreateExperimentResponse = self.post("experiments/create", &json!({ "name": name }))?.json()?;
        tracing::info!(experiment = name, experiment_id = %created.experiment_id, "created experiment");
        Ok(created.experiment_id)
    }

    fn create_run(&self, experiment_id: &str) -> Result<String> {
        let created: CreateRunResponse = self
            .post("runs/create", &json!({ "experiment_id": experiment_id, "start_time": now_millis() }))?
            .json()?;
        let RunInfo { run_id, artifact_uri } = created.run.info;
        self.artifact_uris.lock().insert(run_id.clone(), artifact_uri);
        Ok(run_id)
    }

    fn set_tag(&self, run_id: &str, key: &str, value: &str) -> Result<()> {
        self.post("runs/set-tag", &json!({ "run_id": run_id, "key": key, "value": value }))?;
        Ok(())
    }

    fn log_param(&self, run_id: &str, key: &str, value: &str) -> Result<()> {
        self.post("runs/log-parameter", &json!({ "run_id": run_id, "key": key, "value": value }))?;
        Ok(())
    }

    fn log_metric(&self, run_id: &str, key: &str, value: f64, step: i64) -> Result<()> {
        self.post(
            "runs/log-metric",
            &json!({ "run_id": run_id, "key": key, "value": value, "timestamp": now_millis(), "step": step }),
        )?;
        Ok(())
    }

    fn log_artifact(&self, run_id: &str, local_path: &Path, artifact_path: &str) -> Result<()> {
        let artifact_uri = self
            .artifact_uris
            .lock()
            .get(run_id)
            .cloned()
            .ok_or_else(|| TrackingError::UnknownRun(run_id.to_string()))?;
        let file_name = local_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let url = artifact_upload_url(&self.base, &artifact_uri, artifact_path, &file_name)?;

        let bytes = fs::read(local_path).map_err(|source| TrackingError::Io { path: local_path.to_path_buf(), source })?;
        check(self.client.put(url).body(bytes).send()?)?;
        Ok(())
    }

    fn finish_run(&self, run_id: &str, status: RunStatus) -> Result<()> {
        self.post(
            "runs/update",
            &json!({ "run_id": run_id, "status": status.as_str(), "end_time": now_millis() }),
        )?;
        self.artifact_uris.lock().remove(run_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_upload_url() {
        let url = artifact_upload_url(
            "http://127.0.0.1:5000",
            "mlflow-artifacts:/1/0a1b2c/artifacts",
            "preprocessor",
            "preprocessor.b",
        )
        .unwrap();
        assert_eq!(url, "http://127.0.0.1:5000/api/2.0/mlflow-artifacts/artifacts/1/0a1b2c/artifacts/preprocessor/preprocessor.b");

        let root = artifact_upload_url("http://h", "mlflow-artifacts:/1/r/artifacts", "", "m.json").unwrap();
        assert_eq!(root, "http://h/api/2.0/mlflow-artifacts/artifacts/1/r/artifacts/m.json");
    }

    #[test]
    fn test_local_artifact_uri_is_unsupported() {
        let err = artifact_upload_url("http://h", "./mlruns/1/r/artifacts", "x", "y").unwrap_err();
        assert!(matches!(err, TrackingError::UnsupportedArtifactUri(_)));
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let store = RestStore::new("http://mlflow:5000/");
        assert_eq!(store.endpoint("runs/create"), "http://mlflow:5000/api/2.0/mlflow/runs/create");
    }

    #[test]
    fn test_artifact_for_unknown_run() {
        let store = RestStore::new("http://127.0.0.1:9");
        let err = store.log_artifact("missing", Path::new("/tmp/x"), "a").unwrap_err();
        assert!(matches!(err, TrackingError::UnknownRun(_)));
    }
}
