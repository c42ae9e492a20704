//! Experiment tracking: runs with params, metrics, tags and artifacts.
//!
//! Two stores are available. A tracking URI starting with `http://` or
//! `https://` talks to an MLflow server over its REST API; anything else is
//! treated as a local directory (an optional `file:` prefix is stripped).

mod file;
mod rest;

pub use file::FileStore;
pub use rest::RestStore;

use std::{
    io,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("tracking server returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("unknown run {0}")]
    UnknownRun(String),

    #[error("unsupported tracking URI {0}: expected http(s)://, file: or a local path")]
    UnsupportedUri(String),

    #[error("cannot upload artifacts to {0}")]
    UnsupportedArtifactUri(String),
}

pub type Result<T> = std::result::Result<T, TrackingError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Finished,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Finished => "FINISHED",
            RunStatus::Failed => "FAILED",
        }
    }
}

pub trait TrackingStore {
    /// Id of the experiment called `name`, creating it when missing.
    fn get_or_create_experiment(&self, name: &str) -> Result<String>;
    fn create_run(&self, experiment_id: &str) -> Result<String>;
    fn set_tag(&self, run_id: &str, key: &str, value: &str) -> Result<()>;
    fn log_param(&self, run_id: &str, key: &str, value: &str) -> Result<()>;
    fn log_metric(&self, run_id: &str, key: &str, value: f64, step: i64) -> Result<()>;
    /// Copy `local_path` into the run's artifacts under `artifact_path`.
    fn log_artifact(&self, run_id: &str, local_path: &Path, artifact_path: &str) -> Result<()>;
    fn finish_run(&self, run_id: &str, status: RunStatus) -> Result<()>;
}

pub fn store_from_uri(uri: &str) -> Result<Box<dyn TrackingStore>> {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return Ok(Box::new(RestStore::new(uri)));
    }
    if let Some(path) = uri.strip_prefix("file://").or_else(|| uri.strip_prefix("file:")) {
        return Ok(Box::new(FileStore::new(path)));
    }
    // database and cloud backends (sqlite://, s3://, databricks://, ...)
    if let Some((scheme, _)) = uri.split_once("://") {
        let is_scheme = scheme.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
            && scheme.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if is_scheme {
            return Err(TrackingError::UnsupportedUri(uri.to_string()));
        }
    }
    Ok(Box::new(FileStore::new(uri)))
}

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// A named experiment on a tracking store.
pub struct Experiment {
    store: Box<dyn TrackingStore>,
    experiment_id: String,
    name: String,
}

impl Experiment {
    pub fn open(store: Box<dyn TrackingStore>, name: &str) -> Result<Self> {
        let experiment_id = store.get_or_create_experiment(name)?;
        tracing::info!(experiment = name, experiment_id = %experiment_id, "using experiment");
        Ok(Self { store, experiment_id, name: name.to_string() })
    }

    pub fn id(&self) -> &str {
        &self.experiment_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start_run(&self) -> Result<ActiveRun<'_>> {
        let run_id = self.store.create_run(&self.experiment_id)?;
        tracing::debug!(run_id = %run_id, "started run");
        Ok(ActiveRun { store: self.store.as_ref(), run_id, finished: false })
    }
}

/// A run in progress. Dropping it without [`ActiveRun::finish`] marks it failed.
pub struct ActiveRun<'a> {
    store: &'a dyn TrackingStore,
    run_id: String,
    finished: bool,
}

impl ActiveRun<'_> {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn set_tag(&self, key: &str, value: &str) -> Result<()> {
        self.store.set_tag(&self.run_id, key, value)
    }

    pub fn log_params(&self, params: &[(String, String)]) -> Result<()> {
        params.iter().try_for_each(|(k, v)| self.store.log_param(&self.run_id, k, v))
    }

    pub fn log_metric(&self, key: &str, value: f64) -> Result<()> {
        self.store.log_metric(&self.run_id, key, value, 0)
    }

    pub fn log_artifact(&self, local_path: &Path, artifact_path: &str) -> Result<()> {
        self.store.log_artifact(&self.run_id, local_path, artifact_path)
    }

    pub fn finish(mut self) -> Result<()> {
        self.finished = true;
        self.store.finish_run(&self.run_id, RunStatus::Finished)
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.store.finish_run(&self.run_id, RunStatus::Failed) {
                tracing::warn!(run_id = %self.run_id, error = %e, "could not mark run as failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_selection() {
        let dir = tempfile::tempdir().unwrap();
        let uri = format!("file:{}", dir.path().display());

        let store = store_from_uri(&uri).unwrap();
        let id = store.get_or_create_experiment("nyc-taxi-experiment").unwrap();
        assert!(dir.path().join(&id).join("meta.json").exists());
    }

    #[test]
    fn test_unknown_scheme_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let uri = format!("sqlite:///{}/mlflow.db", dir.path().display());

        let err = store_from_uri(&uri).err().unwrap();
        assert!(matches!(err, TrackingError::UnsupportedUri(ref u) if *u == uri));
        assert!(matches!(store_from_uri("s3://bucket/mlruns"), Err(TrackingError::UnsupportedUri(_))));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        assert!(store_from_uri("mlruns").is_ok());
        assert!(store_from_uri("http://127.0.0.1:5000").is_ok());
    }

    #[test]
    fn test_dropped_run_is_marked_failed() {
        let dir = tempfile::tempdir().unwrap();
        let experiment = Experiment::open(Box::new(FileStore::new(dir.path())), "exp").unwrap();

        let run_id = {
            let run = experiment.start_run().unwrap();
            run.run_id().to_string()
        };

        let store = FileStore::new(dir.path());
        assert_eq!(store.run_status(&run_id).unwrap(), "FAILED");
    }
}
