use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf};

use crate::gbtree::TrainOptions;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub train_data_path: PathBuf,
    pub val_data_path: PathBuf,
    pub tracking_uri: String,
    pub experiment_name: String,
    pub models_dir: PathBuf,
    pub max_evals: usize,
    pub num_boost_round: usize,
    pub early_stopping_rounds: usize,
    pub search_seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            train_data_path: PathBuf::from("../data/green_tripdata_2021-01.parquet"),
            val_data_path: PathBuf::from("../data/green_tripdata_2021-02.parquet"),
            tracking_uri: "mlruns".to_string(),
            experiment_name: "nyc-taxi-experiment".to_string(),
            models_dir: PathBuf::from("models"),
            max_evals: 1,
            num_boost_round: 100,
            early_stopping_rounds: 50,
            search_seed: 42,
        }
    }
}

impl TrainingConfig {
    /// Read a JSON config; missing keys keep their defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn train_options(&self) -> TrainOptions {
        TrainOptions {
            num_boost_round: self.num_boost_round,
            early_stopping_rounds: Some(self.early_stopping_rounds),
        }
    }
}

/// Train the ride duration model and register it with the tracking store.
#[derive(Debug, Parser)]
#[command(name = "training_pipeline", version)]
pub struct Cli {
    /// JSON file with base settings; flags and env vars override it.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, env = "TRAIN_DATA_PATH")]
    pub train_data_path: Option<PathBuf>,

    #[arg(long, env = "VAL_DATA_PATH")]
    pub val_data_path: Option<PathBuf>,

    #[arg(long, env = "MLFLOW_TRACKING_URI")]
    pub tracking_uri: Option<String>,

    #[arg(long, env = "EXPERIMENT_NAME")]
    pub experiment_name: Option<String>,

    #[arg(long, env = "MODELS_DIR")]
    pub models_dir: Option<PathBuf>,

    #[arg(long, env = "MAX_EVALS")]
    pub max_evals: Option<usize>,

    #[arg(long)]
    pub num_boost_round: Option<usize>,

    #[arg(long)]
    pub early_stopping_rounds: Option<usize>,

    #[arg(long)]
    pub search_seed: Option<u64>,
}

impl Cli {
    pub fn into_config(self) -> anyhow::Result<TrainingConfig> {
        let mut cfg = match &self.config {
            Some(path) => TrainingConfig::load(path)?,
            None => TrainingConfig::default(),
        };

        if let Some(v) = self.train_data_path {
            cfg.train_data_path = v;
        }
        if let Some(v) = self.val_data_path {
            cfg.val_data_path = v;
        }
        if let Some(v) = self.tracking_uri {
            cfg.tracking_uri = v;
        }
        if let Some(v) = self.experiment_name {
            cfg.experiment_name = v;
        }
        if let Some(v) = self.models_dir {
            cfg.models_dir = v;
        }
        if let Some(v) = self.max_evals {
            cfg.max_evals = v;
        }
        if let Some(v) = self.num_boost_round {
            cfg.num_boost_round = v;
        }
        if let Some(v) = self.early_stopping_rounds {
            cfg.early_stopping_rounds = v;
        }
        if let Some(v) = self.search_seed {
            cfg.search_seed = v;
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.json");
        fs::write(&path, r#"{"max_evals": 5, "tracking_uri": "http://127.0.0.1:5000"}"#).unwrap();

        let cfg = TrainingConfig::load(&path).unwrap();
        assert_eq!(cfg.max_evals, 5);
        assert_eq!(cfg.tracking_uri, "http://127.0.0.1:5000");
        assert_eq!(cfg.experiment_name, "nyc-taxi-experiment");
        assert_eq!(cfg.num_boost_round, 100);
    }

    #[test]
    fn test_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.json");
        fs::write(&path, r#"{"max_evals": 5, "search_seed": 7}"#).unwrap();

        let cli = Cli::try_parse_from([
            "training_pipeline",
            "--config",
            path.to_str().unwrap(),
            "--max-evals",
            "3",
            "--models-dir",
            "out",
        ])
        .unwrap();
        let cfg = cli.into_config().unwrap();

        assert_eq!(cfg.max_evals, 3);
        assert_eq!(cfg.search_seed, 7);
        assert_eq!(cfg.models_dir, PathBuf::from("out"));
        assert_eq!(cfg.train_options().early_stopping_rounds, Some(50));
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        assert!(TrainingConfig::load(Path::new("/nonexistent/train.json")).is_err());
    }
}
