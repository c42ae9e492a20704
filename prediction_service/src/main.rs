use anyhow::Context;
use ride_model::{ModelBundle, ModelService};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod app;
mod config;
mod sinks;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = config::ServiceConfig::from_env()?;

    // Loaded once; the service never reloads or mutates it.
    let bundle = ModelBundle::load(&cfg.model_file)
        .with_context(|| format!("failed to load model bundle {}", cfg.model_file.display()))?;
    let ModelBundle { vectorizer, booster, run_id } = bundle;
    tracing::info!(
        features = vectorizer.n_features(),
        trees = booster.num_trees(),
        run_id = run_id.as_deref().unwrap_or("-"),
        "loaded model bundle from {}",
        cfg.model_file.display()
    );

    let version = cfg.model_version.clone().or(run_id);
    let model: app::DynModel = Box::new(booster);
    let service = ModelService::new(model, Arc::new(vectorizer), version);

    let storage = sinks::MongoStorage::connect(&cfg.mongodb_address)
        .await
        .with_context(|| format!("invalid MongoDB address {}", cfg.mongodb_address))?;
    let monitoring = sinks::EvidentlyMonitor::new(&cfg.evidently_address);
    tracing::info!(
        storage = %cfg.mongodb_address,
        monitoring = monitoring.endpoint(),
        "prediction sinks configured"
    );

    let state = app::AppState {
        model: Arc::new(service),
        storage: Arc::new(storage),
        monitoring: Arc::new(monitoring),
    };
    let app = app::router(state);

    let addr = cfg.bind_addr();
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
