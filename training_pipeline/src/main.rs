use clap::Parser;
use tracing_subscriber::EnvFilter;

mod config;
mod dataset;
mod features;
mod gbtree;
mod metrics;
mod pipeline;
mod search;
mod tracking;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = config::Cli::parse().into_config()?;
    tracing::info!(
        train = %cfg.train_data_path.display(),
        valid = %cfg.val_data_path.display(),
        tracking_uri = %cfg.tracking_uri,
        experiment = %cfg.experiment_name,
        max_evals = cfg.max_evals,
        "starting training"
    );

    let summary = pipeline::run(&cfg)?;
    tracing::info!(
        run_id = %summary.run_id,
        rmse = summary.rmse,
        max_depth = summary.params.max_depth,
        learning_rate = summary.params.learning_rate,
        "model saved to {}",
        summary.bundle_path.display()
    );
    Ok(())
}
