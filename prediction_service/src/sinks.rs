use async_trait::async_trait;
use mongodb::{bson::Document, Client, Collection};
use serde_json::{Map, Value};
use thiserror::Error;

/// Ride record with `PU_DO` and `prediction` merged in.
pub type PredictionDocument = Map<String, Value>;

pub const DATABASE: &str = "prediction_service";
pub const COLLECTION: &str = "data";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("storage insert failed: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("record is not a valid BSON document: {0}")]
    Bson(#[from] mongodb::bson::ser::Error),

    #[error("monitoring request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Persists served predictions.
#[async_trait]
pub trait StorageSink: Send + Sync {
    async fn save(&self, doc: &PredictionDocument) -> Result<(), SinkError>;
}

/// Receives served predictions for drift monitoring.
#[async_trait]
pub trait MonitoringSink: Send + Sync {
    async fn send(&self, doc: &PredictionDocument) -> Result<(), SinkError>;
}

pub struct MongoStorage {
    collection: Collection<Document>,
}

impl MongoStorage {
    /// Parses the address and prepares the collection handle. The driver
    /// connects lazily, on the first insert.
    pub async fn connect(address: &str) -> Result<Self, SinkError> {
        let client = Client::with_uri_str(address).await?;
        let collection = client.database(DATABASE).collection::<Document>(COLLECTION);
        Ok(Self { collection })
    }
}

#[async_trait]
impl StorageSink for MongoStorage {
    async fn save(&self, doc: &PredictionDocument) -> Result<(), SinkError> {
        let doc = mongodb::bson::to_document(doc)?;
        self.collection.insert_one(doc, None).await?;
        Ok(())
    }
}

/// Posts each prediction as a one-element batch to `{address}/iterate/taxi`.
pub struct EvidentlyMonitor {
    client: reqwest::Client,
    endpoint: String,
}

impl EvidentlyMonitor {
    pub fn new(address: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/iterate/taxi", address.trim_end_matches('/')),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl MonitoringSink for EvidentlyMonitor {
    async fn send(&self, doc: &PredictionDocument) -> Result<(), SinkError> {
        // Only transport failures count; the response status is not inspected.
        let resp = self.client.post(&self.endpoint).json(&[doc]).send().await?;
        tracing::debug!(status = %resp.status(), "monitoring service answered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_endpoint() {
        assert_eq!(EvidentlyMonitor::new("http://127.0.0.1:5000").endpoint(), "http://127.0.0.1:5000/iterate/taxi");
        assert_eq!(EvidentlyMonitor::new("http://evidently:8085/").endpoint(), "http://evidently:8085/iterate/taxi");
    }

    #[tokio::test]
    async fn test_monitor_posts_one_element_batch() {
        use axum::http::{Method, StatusCode, Uri};
        use parking_lot::Mutex;
        use serde_json::json;
        use std::sync::Arc;

        let received: Arc<Mutex<Vec<(Method, String, Value)>>> = Arc::default();
        let seen = received.clone();
        let app = axum::Router::new().fallback(move |method: Method, uri: Uri, axum::Json(body): axum::Json<Value>| {
            let seen = seen.clone();
            async move {
                seen.lock().push((method, uri.path().to_string(), body));
                StatusCode::SERVICE_UNAVAILABLE
            }
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let monitor = EvidentlyMonitor::new(&format!("http://{}", addr));
        let record = json!({
            "PULocationID": 130,
            "DOLocationID": 205,
            "trip_distance": 3.66,
            "PU_DO": "130_205",
            "prediction": 18.2
        });
        let doc = record.as_object().unwrap().clone();

        // a 503 from the monitoring service does not fail the prediction
        monitor.send(&doc).await.unwrap();

        let calls = received.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, Method::POST);
        assert_eq!(calls[0].1, "/iterate/taxi");
        assert_eq!(calls[0].2, json!([record]));
    }

    #[tokio::test]
    async fn test_unreachable_monitor_is_an_error() {
        // port 9 (discard) is not served on loopback in test environments
        let monitor = EvidentlyMonitor::new("http://127.0.0.1:9");
        let doc = PredictionDocument::new();
        assert!(matches!(monitor.send(&doc).await, Err(SinkError::Http(_))));
    }

    #[tokio::test]
    async fn test_bad_mongo_address_is_rejected() {
        assert!(matches!(MongoStorage::connect("not-a-uri").await, Err(SinkError::Mongo(_))));
    }
}
