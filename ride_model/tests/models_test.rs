/// Integration tests for the model service contract
///
/// Run with: cargo test -p ride_model --test models_test -- --nocapture

use std::{fs, path::Path, sync::Arc};

use ride_model::{
    base64_decode, BatchResult, DictVectorizer, FeatureVector, Features, KinesisEvent, ModelService,
    Predict, PredictionEnvelope, RideEvent, RidePrediction, RideRecord,
};
use serde_json::json;

fn read_text(file: &str) -> String {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join(file);
    fs::read_to_string(path).expect("fixture should exist").trim().to_string()
}

/// Returns the same value for every row of the batch.
struct ModelMock {
    value: f64,
}

impl Predict for ModelMock {
    fn predict(&self, batch: &[FeatureVector]) -> ride_model::Result<Vec<f64>> {
        Ok(vec![self.value; batch.len()])
    }
}

fn service(value: f64, version: Option<&str>) -> ModelService<ModelMock> {
    ModelService::new(
        ModelMock { value },
        Arc::new(DictVectorizer::default()),
        version.map(str::to_string),
    )
}

#[test]
fn test_prepare_features() {
    println!("\n=== Test: Prepare Features ===");
    let model_service = service(0.0, None);
    let ride: RideRecord = serde_json::from_value(json!({
        "PULocationID": 130,
        "DOLocationID": 205,
        "trip_distance": 3.66
    }))
    .unwrap();

    let actual_features = model_service.prepare_features(&ride);

    let expected_features = Features { pu_do: "130_205".to_string(), trip_distance: 3.66 };
    assert_eq!(actual_features, expected_features);
    println!("✓ {:?}", actual_features);
}

#[test]
fn test_base64_decode() {
    println!("\n=== Test: Base64 Decode ===");
    let base64_input = read_text("data.b64");

    let actual_result = base64_decode(&base64_input).unwrap();

    let expected_result = RideEvent { ride: RideRecord::new(130, 205, 3.66), ride_id: 256 };
    assert_eq!(actual_result, expected_result);
    assert_eq!(
        serde_json::to_value(&actual_result).unwrap(),
        json!({
            "ride": { "PULocationID": 130, "DOLocationID": 205, "trip_distance": 3.66 },
            "ride_id": 256
        })
    );
    println!("✓ Decoded ride_id={}", actual_result.ride_id);
}

#[test]
fn test_predict() {
    println!("\n=== Test: Predict ===");
    let model_service = service(10.0, None);
    let features = Features { pu_do: "130_205".to_string(), trip_distance: 3.66 };

    let actual_prediction = model_service.predict(&features).unwrap();

    assert_eq!(actual_prediction, 10.0);
    println!("✓ Prediction {}", actual_prediction);
}

#[test]
fn test_lambda_handler() {
    println!("\n=== Test: Lambda Handler ===");
    let model_version = "123";
    let model_service = service(10.0, Some(model_version));
    let event: KinesisEvent = serde_json::from_value(json!({
        "Records": [{
            "kinesis": {
                "data": read_text("data.b64"),
            }
        }]
    }))
    .unwrap();

    let actual_predictions = model_service.lambda_handler(&event).unwrap();

    let expected_predictions = BatchResult {
        predictions: vec![PredictionEnvelope {
            model: "ride_duration_prediction_model".to_string(),
            version: Some(model_version.to_string()),
            prediction: RidePrediction { ride_duration: 10.0, ride_id: 256 },
        }],
    };
    assert_eq!(actual_predictions, expected_predictions);
    assert_eq!(
        serde_json::to_value(&actual_predictions).unwrap(),
        json!({
            "predictions": [{
                "model": "ride_duration_prediction_model",
                "version": "123",
                "prediction": { "ride_duration": 10.0, "ride_id": 256 }
            }]
        })
    );
    println!("✓ Lambda handler output matches");
}
