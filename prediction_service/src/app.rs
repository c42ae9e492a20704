use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use ride_model::{BatchResult, KinesisEvent, ModelError, ModelService, Predict, RideRecord};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

use crate::sinks::{MonitoringSink, SinkError, StorageSink};

pub const PREDICT_PATH: &str = "/predict";
/// Invocation path of the function runtime emulator, used for the streaming batch.
pub const INVOCATIONS_PATH: &str = "/2015-03-31/functions/function/invocations";

pub type DynModel = Box<dyn Predict + Send + Sync>;

// ---------- Response types ----------

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct DurationOut {
    pub duration: f64,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

// ---------- Server state ----------

#[derive(Clone)]
pub struct AppState {
    pub model: Arc<ModelService<DynModel>>,
    pub storage: Arc<dyn StorageSink>,
    pub monitoring: Arc<dyn MonitoringSink>,
}

// ---------- Handlers ----------

async fn predict(
    State(state): State<AppState>,
    Json(ride): Json<RideRecord>,
) -> Result<Json<DurationOut>, ApiError> {
    let features = state.model.prepare_features(&ride);
    let duration = state.model.predict(&features)?;
    tracing::info!(pu_do = %features.pu_do, duration, "served prediction");

    let doc = ride.with_prediction(duration)?;
    state.storage.save(&doc).await?;
    state.monitoring.send(&doc).await?;

    Ok(Json(DurationOut { duration }))
}

async fn invocations(
    State(state): State<AppState>,
    Json(event): Json<KinesisEvent>,
) -> Result<Json<BatchResult>, ApiError> {
    let result = state.model.lambda_handler(&event)?;
    tracing::info!(records = result.predictions.len(), "served batch");
    Ok(Json(result))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(PREDICT_PATH, post(predict))
        .route(INVOCATIONS_PATH, post(invocations))
        .with_state(state)
}
