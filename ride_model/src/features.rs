use serde::{Deserialize, Serialize};
use std::fmt::Display;

use crate::record::RideRecord;

/// Model input derived from a ride: the pickup/dropoff pair and the distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Features {
    #[serde(rename = "PU_DO")]
    pub pu_do: String,
    pub trip_distance: f64,
}

/// A single feature value as seen by the encoder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeatureValue<'a> {
    /// Categorical, one-hot encoded as `key=value`.
    Text(&'a str),
    /// Numeric, stored under its own key.
    Number(f64),
}

impl Features {
    /// Build the feature mapping from raw zone ids and a distance.
    ///
    /// # Arguments
    /// * `pu_location_id` - Pickup zone, rendered with `Display`
    /// * `do_location_id` - Dropoff zone, rendered with `Display`
    /// * `trip_distance` - Copied through unchanged
    pub fn new(pu_location_id: impl Display, do_location_id: impl Display, trip_distance: f64) -> Self {
        Self {
            pu_do: format!("{}_{}", pu_location_id, do_location_id),
            trip_distance,
        }
    }

    /// Key/value pairs in the order the encoder walks them.
    pub fn entries(&self) -> [(&'static str, FeatureValue<'_>); 2] {
        [
            ("PU_DO", FeatureValue::Text(&self.pu_do)),
            ("trip_distance", FeatureValue::Number(self.trip_distance)),
        ]
    }
}

/// Derive the feature mapping for a ride. Every other field of the record is dropped.
pub fn prepare_features(ride: &RideRecord) -> Features {
    Features::new(&ride.pu_location_id, &ride.do_location_id, ride.trip_distance)
}
