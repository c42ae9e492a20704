//! Ride duration model: feature derivation, encoding, the boosted-tree
//! model format and the service wrapper used by the prediction endpoints.

pub mod booster;
pub mod bundle;
pub mod error;
pub mod event;
pub mod features;
pub mod record;
pub mod service;
pub mod vectorizer;

pub use booster::{Booster, Node, Tree};
pub use bundle::ModelBundle;
pub use error::{ModelError, Result};
pub use event::{base64_decode, BatchResult, KinesisEvent, PredictionEnvelope, RideEvent, RidePrediction};
pub use features::{prepare_features, FeatureValue, Features};
pub use record::{LocationId, RideRecord};
pub use service::{ModelService, Predict, MODEL_NAME};
pub use vectorizer::{DictVectorizer, FeatureVector};
