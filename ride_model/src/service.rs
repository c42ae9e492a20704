use std::sync::Arc;

use crate::{
    error::{ModelError, Result},
    event::{base64_decode, BatchResult, KinesisEvent, PredictionEnvelope, RideEvent, RidePrediction},
    features::{self, Features},
    record::RideRecord,
    vectorizer::{DictVectorizer, FeatureVector},
};

pub const MODEL_NAME: &str = "ride_duration_prediction_model";

/// Anything that turns a batch of encoded rows into one number per row.
pub trait Predict {
    fn predict(&self, batch: &[FeatureVector]) -> Result<Vec<f64>>;
}

impl<M: Predict + ?Sized> Predict for Arc<M> {
    fn predict(&self, batch: &[FeatureVector]) -> Result<Vec<f64>> {
        (**self).predict(batch)
    }
}

impl<M: Predict + ?Sized> Predict for Box<M> {
    fn predict(&self, batch: &[FeatureVector]) -> Result<Vec<f64>> {
        (**self).predict(batch)
    }
}

/// Loaded model plus the encoder it was trained with.
///
/// The encoder is shared, not owned: the training side fits it and several
/// services may hold the same instance.
pub struct ModelService<M> {
    model: M,
    encoder: Arc<DictVectorizer>,
    model_version: Option<String>,
}

impl<M: Predict> ModelService<M> {
    pub fn new(model: M, encoder: Arc<DictVectorizer>, model_version: Option<String>) -> Self {
        Self { model, encoder, model_version }
    }

    pub fn model_version(&self) -> Option<&str> {
        self.model_version.as_deref()
    }

    pub fn encoder(&self) -> &DictVectorizer {
        &self.encoder
    }

    pub fn prepare_features(&self, ride: &RideRecord) -> Features {
        features::prepare_features(ride)
    }

    /// Predict the duration for one feature mapping.
    pub fn predict(&self, features: &Features) -> Result<f64> {
        let x = self.encoder.transform(std::slice::from_ref(features));
        let preds = self.model.predict(&x)?;
        preds.first().copied().ok_or(ModelError::EmptyPrediction)
    }

    /// Base64 → UTF-8 → JSON `{"ride": ..., "ride_id": ...}`.
    pub fn decode_envelope(&self, encoded: &str) -> Result<RideEvent> {
        base64_decode(encoded)
    }

    /// Decode, featurize and predict every encoded ride event.
    ///
    /// The first failing record aborts the batch; no partial result is returned.
    pub fn handle_batch<I, S>(&self, encoded: I) -> Result<BatchResult>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut predictions = Vec::new();
        for payload in encoded {
            let event = self.decode_envelope(payload.as_ref())?;
            let features = self.prepare_features(&event.ride);
            let ride_duration = self.predict(&features)?;
            tracing::debug!(ride_id = event.ride_id, ride_duration, "predicted ride");

            predictions.push(PredictionEnvelope {
                model: MODEL_NAME.to_string(),
                version: self.model_version.clone(),
                prediction: RidePrediction { ride_duration, ride_id: event.ride_id },
            });
        }
        Ok(BatchResult { predictions })
    }

    pub fn lambda_handler(&self, event: &KinesisEvent) -> Result<BatchResult> {
        self.handle_batch(event.payloads())
    }
}
