//! Streaming envelope: the base64 ride events that arrive in a record batch
//! and the prediction envelopes sent back.

use base64::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{error::Result, record::RideRecord};

/// Decoded payload of one streaming record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideEvent {
    pub ride: RideRecord,
    pub ride_id: i64,
}

/// Record batch as delivered by the stream trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KinesisEvent {
    #[serde(rename = "Records")]
    pub records: Vec<KinesisRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KinesisRecord {
    pub kinesis: KinesisPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KinesisPayload {
    /// Base64 encoded [`RideEvent`] JSON.
    pub data: String,
}

impl KinesisEvent {
    pub fn from_payloads<I, S>(payloads: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            records: payloads
                .into_iter()
                .map(|data| KinesisRecord { kinesis: KinesisPayload { data: data.into() } })
                .collect(),
        }
    }

    pub fn payloads(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.kinesis.data.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RidePrediction {
    pub ride_duration: f64,
    pub ride_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionEnvelope {
    pub model: String,
    pub version: Option<String>,
    pub prediction: RidePrediction,
}

/// One envelope per input record, in input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub predictions: Vec<PredictionEnvelope>,
}

/// Decode a base64 encoded ride event. Surrounding whitespace is ignored.
pub fn base64_decode(encoded: &str) -> Result<RideEvent> {
    let bytes = BASE64_STANDARD.decode(encoded.trim())?;
    let text = String::from_utf8(bytes)?;
    Ok(serde_json::from_str(&text)?)
}
