use anyhow::Context;
use ride_model::{Booster, ModelBundle, Predict};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{
    config::TrainingConfig,
    dataset::read_dataframe,
    features::{add_features, FeatureSet},
    gbtree::{train, BoosterParams, TrainOptions},
    metrics::rmse,
    search::{fmin, SearchSpace, Trial},
    tracking::{store_from_uri, Experiment},
};

pub const PREPROCESSOR_FILE: &str = "preprocessor.b";
pub const BOOSTER_FILE: &str = "booster.json";
pub const BUNDLE_FILE: &str = "model_bundle.bin";

#[derive(Debug)]
pub struct TrainingSummary {
    pub run_id: String,
    pub rmse: f64,
    pub params: BoosterParams,
    pub bundle_path: PathBuf,
}

fn validation_rmse(booster: &Booster, features: &FeatureSet) -> anyhow::Result<f64> {
    let pred = booster.predict(features.valid.rows())?;
    Ok(rmse(features.valid.labels(), &pred))
}

/// Run `max_evals` tracked trials and return the best one.
pub fn train_model_search(
    experiment: &Experiment,
    features: &FeatureSet,
    cfg: &TrainingConfig,
) -> anyhow::Result<Option<Trial>> {
    let opts = cfg.train_options();
    let space = SearchSpace::default();

    fmin(&space, cfg.max_evals, cfg.search_seed, |params| -> anyhow::Result<f64> {
        let run = experiment.start_run()?;
        run.set_tag("model", "gbtree")?;
        run.log_params(&params.to_params())?;

        let booster = train(params, &features.train, Some(&features.valid), &opts)?;
        let loss = validation_rmse(&booster, features)?;
        run.log_metric("rmse", loss)?;
        run.finish()?;
        Ok(loss)
    })
}

/// Retrain with `params`, log the metric and artifacts, and write the serving bundle.
pub fn train_best_model(
    experiment: &Experiment,
    features: &FeatureSet,
    params: &BoosterParams,
    opts: &TrainOptions,
    models_dir: &Path,
) -> anyhow::Result<TrainingSummary> {
    let run = experiment.start_run()?;
    run.set_tag("model", "gbtree")?;
    run.log_params(&params.to_params())?;

    let booster = train(params, &features.train, Some(&features.valid), opts)?;
    let score = validation_rmse(&booster, features)?;
    run.log_metric("rmse", score)?;
    tracing::info!(run_id = run.run_id(), rmse = score, trees = booster.num_trees(), "trained final model");

    fs::create_dir_all(models_dir).with_context(|| format!("failed to create {}", models_dir.display()))?;

    let preprocessor_path = models_dir.join(PREPROCESSOR_FILE);
    fs::write(&preprocessor_path, serde_json::to_vec(&features.vectorizer)?)
        .with_context(|| format!("failed to write {}", preprocessor_path.display()))?;
    run.log_artifact(&preprocessor_path, "preprocessor")?;

    let booster_path = models_dir.join(BOOSTER_FILE);
    fs::write(&booster_path, serde_json::to_vec(&booster)?)
        .with_context(|| format!("failed to write {}", booster_path.display()))?;
    run.log_artifact(&booster_path, "models_mlflow")?;

    let bundle_path = models_dir.join(BUNDLE_FILE);
    let bundle = ModelBundle {
        vectorizer: features.vectorizer.clone(),
        booster,
        run_id: Some(run.run_id().to_string()),
    };
    bundle.save(&bundle_path)?;
    run.log_artifact(&bundle_path, "models_mlflow")?;

    let run_id = run.run_id().to_string();
    run.finish()?;

    Ok(TrainingSummary { run_id, rmse: score, params: params.clone(), bundle_path })
}

pub fn run(cfg: &TrainingConfig) -> anyhow::Result<TrainingSummary> {
    let experiment = store_from_uri(&cfg.tracking_uri)
        .and_then(|store| Experiment::open(store, &cfg.experiment_name))
        .with_context(|| format!("failed to open experiment {:?} at {}", cfg.experiment_name, cfg.tracking_uri))?;

    let df_train = read_dataframe(&cfg.train_data_path)
        .with_context(|| format!("failed to load {}", cfg.train_data_path.display()))?;
    let df_val = read_dataframe(&cfg.val_data_path)
        .with_context(|| format!("failed to load {}", cfg.val_data_path.display()))?;

    let features = add_features(&df_train, &df_val)?;
    tracing::info!(
        experiment = experiment.name(),
        experiment_id = experiment.id(),
        n_features = features.train.n_features(),
        max_evals = cfg.max_evals,
        "starting hyperparameter search"
    );

    let best = train_model_search(&experiment, &features, cfg)?.context("hyperparameter search ran no trials")?;
    tracing::info!(loss = best.loss, "best trial");

    train_best_model(&experiment, &features, &best.params, &cfg.train_options(), &cfg.models_dir)
}
