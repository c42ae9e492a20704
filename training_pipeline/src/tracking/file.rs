use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use super::{now_millis, Result, RunStatus, TrackingError, TrackingStore};

#[derive(Debug, Serialize, Deserialize)]
struct ExperimentMeta {
    experiment_id: String,
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct RunMeta {
    run_id: String,
    experiment_id: String,
    status: String,
    start_time: i64,
    end_time: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MetricLine {
    key: String,
    value: f64,
    step: i64,
    timestamp: i64,
}

/// Tracking store on the local filesystem:
///
/// ```text
/// <root>/<experiment_id>/meta.json
/// <root>/<experiment_id>/<run_id>/{meta.json,params.json,tags.json,metrics.jsonl}
/// <root>/<experiment_id>/<run_id>/artifacts/<artifact_path>/<file>
/// ```
pub struct FileStore {
    root: PathBuf,
}

fn at<T>(path: &Path, res: io::Result<T>) -> Result<T> {
    res.map_err(|source| TrackingError::Io { path: path.to_path_buf(), source })
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = at(path, fs::read(path))?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    at(path, fs::write(path, bytes))
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn experiments(&self) -> Result<Vec<ExperimentMeta>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in at(&self.root, fs::read_dir(&self.root))? {
            let entry = at(&self.root, entry)?;
            let meta = entry.path().join("meta.json");
            if meta.is_file() {
                out.push(read_json(&meta)?);
            }
        }
        Ok(out)
    }

    fn run_dir(&self, run_id: &str) -> Result<PathBuf> {
        for exp in self.experiments()? {
            let dir = self.root.join(&exp.experiment_id).join(run_id);
            if dir.join("meta.json").is_file() {
                return Ok(dir);
            }
        }
        Err(TrackingError::UnknownRun(run_id.to_string()))
    }

    fn update_map(&self, run_id: &str, file: &str, key: &str, value: &str) -> Result<()> {
        let path = self.run_dir(run_id)?.join(file);
        let mut map: BTreeMap<String, String> = if path.is_file() { read_json(&path)? } else { BTreeMap::new() };
        map.insert(key.to_string(), value.to_string());
        write_json(&path, &map)
    }

    #[cfg(test)]
    pub fn run_status(&self, run_id: &str) -> Result<String> {
        let meta: RunMeta = read_json(&self.run_dir(run_id)?.join("meta.json"))?;
        Ok(meta.status)
    }

    #[cfg(test)]
    pub fn run_params(&self, run_id: &str) -> Result<BTreeMap<String, String>> {
        let path = self.run_dir(run_id)?.join("params.json");
        if path.is_file() {
            read_json(&path)
        } else {
            Ok(BTreeMap::new())
        }
    }

    #[cfg(test)]
    pub fn run_metrics(&self, run_id: &str) -> Result<Vec<(String, f64)>> {
        let path = self.run_dir(run_id)?.join("metrics.jsonl");
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let text = at(&path, fs::read_to_string(&path))?;
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| -> Result<(String, f64)> {
                let m: MetricLine = serde_json::from_str(l)?;
                Ok((m.key, m.value))
            })
            .collect()
    }

    pub fn artifacts_dir(&self, run_id: &str) -> Result<PathBuf> {
        Ok(self.run_dir(run_id)?.join("artifacts"))
    }
}

impl TrackingStore for FileStore {
    fn get_or_create_experiment(&self, name: &str) -> Result<String> {
        let existing = self.experiments()?;
        if let Some(exp) = existing.iter().find(|e| e.name == name) {
            return Ok(exp.experiment_id.clone());
        }

        let next_id = existing
            .iter()
            .filter_map(|e| e.experiment_id.parse::<u64>().ok())
            .max()
            .map_or(0, |max| max + 1)
            .to_string();
        let dir = self.root.join(&next_id);
        at(&dir, fs::create_dir_all(&dir))?;
        write_json(&dir.join("meta.json"), &ExperimentMeta { experiment_id: next_id.clone(), name: name.to_string() })?;
        Ok(next_id)
    }

    fn create_run(&self, experiment_id: &str) -> Result<String> {
        let run_id = uuid::Uuid::new_v4().simple().to_string();
        let dir = self.root.join(experiment_id).join(&run_id);
        at(&dir, fs::create_dir_all(dir.join("artifacts")))?;
        let meta = RunMeta {
            run_id: run_id.clone(),
            experiment_id: experiment_id.to_string(),
            status: "RUNNING".to_string(),
            start_time: now_millis(),
            end_time: None,
        };
        write_json(&dir.join("meta.json"), &meta)?;
        Ok(run_id)
    }

    fn set_tag(&self, run_id: &str, key: &str, value: &str) -> Result<()> {
        self.update_map(run_id, "tags.json", key, value)
    }

    fn log_param(&self, run_id: &str, key: &str, value: &str) -> Result<()> {
        self.update_map(run_id, "params.json", key, value)
    }

    fn log_metric(&self, run_id: &str, key: &str, value: f64, step: i64) -> Result<()> {
        let path = self.run_dir(run_id)?.join("metrics.jsonl");
        let line = serde_json::to_string(&MetricLine { key: key.to_string(), value, step, timestamp: now_millis() })?;
        let mut file = at(&path, fs::OpenOptions::new().create(true).append(true).open(&path))?;
        at(&path, writeln!(file, "{}", line))
    }

    fn log_artifact(&self, run_id: &str, local_path: &Path, artifact_path: &str) -> Result<()> {
        let dest_dir = self.artifacts_dir(run_id)?.join(artifact_path);
        at(&dest_dir, fs::create_dir_all(&dest_dir))?;
        let file_name = local_path
            .file_name()
            .ok_or_else(|| TrackingError::Io {
                path: local_path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "artifact has no file name"),
            })?;
        at(local_path, fs::copy(local_path, dest_dir.join(file_name)))?;
        Ok(())
    }

    fn finish_run(&self, run_id: &str, status: RunStatus) -> Result<()> {
        let path = self.run_dir(run_id)?.join("meta.json");
        let mut meta: RunMeta = read_json(&path)?;
        meta.status = status.as_str().to_string();
        meta.end_time = Some(now_millis());
        write_json(&path, &meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_experiments_are_found_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        let a = store.get_or_create_experiment("a").unwrap();
        let b = store.get_or_create_experiment("b").unwrap();
        assert_eq!(a, "0");
        assert_eq!(b, "1");
        assert_eq!(store.get_or_create_experiment("a").unwrap(), "0");
    }

    #[test]
    fn test_run_records_params_metrics_and_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("mlruns"));
        let exp = store.get_or_create_experiment("nyc-taxi-experiment").unwrap();
        let run = store.create_run(&exp).unwrap();

        store.set_tag(&run, "model", "gbtree").unwrap();
        store.log_param(&run, "max_depth", "30").unwrap();
        store.log_param(&run, "learning_rate", "0.1").unwrap();
        store.log_metric(&run, "rmse", 6.5, 0).unwrap();

        let artifact = dir.path().join("preprocessor.b");
        fs::write(&artifact, b"{}").unwrap();
        store.log_artifact(&run, &artifact, "preprocessor").unwrap();
        store.finish_run(&run, RunStatus::Finished).unwrap();

        let params = store.run_params(&run).unwrap();
        assert_eq!(params.get("max_depth").map(String::as_str), Some("30"));
        assert_eq!(params.len(), 2);
        assert_eq!(store.run_metrics(&run).unwrap(), vec![("rmse".to_string(), 6.5)]);
        assert!(store.artifacts_dir(&run).unwrap().join("preprocessor/preprocessor.b").is_file());
        assert_eq!(store.run_status(&run).unwrap(), "FINISHED");
    }

    #[test]
    fn test_unknown_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.get_or_create_experiment("a").unwrap();

        assert!(matches!(store.log_param("nope", "k", "v"), Err(TrackingError::UnknownRun(_))));
    }
}
