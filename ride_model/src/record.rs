use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};
use serde_json::{Map, Number, Value};
use std::fmt;

use crate::{error::Result, features::prepare_features};

/// Taxi zone identifier.
///
/// Upstream producers send zones as JSON numbers or strings, and rows that
/// went through a dataframe with missing values arrive as floats. Any JSON
/// value is accepted and rendered as its JSON text; the original form is kept
/// so a stored record looks like the one received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LocationId {
    Number(i64),
    Text(String),
    Other(Value),
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationId::Number(n) => write!(f, "{}", n),
            LocationId::Text(s) => f.write_str(s),
            LocationId::Other(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for LocationId {
    fn from(n: i64) -> Self {
        LocationId::Number(n)
    }
}

impl From<&str> for LocationId {
    fn from(s: &str) -> Self {
        LocationId::Text(s.to_string())
    }
}

impl From<String> for LocationId {
    fn from(s: String) -> Self {
        LocationId::Text(s)
    }
}

#[derive(Deserialize)]
struct RideRecordRepr {
    #[serde(rename = "PULocationID")]
    pu_location_id: LocationId,
    #[serde(rename = "DOLocationID")]
    do_location_id: LocationId,
    trip_distance: Number,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl TryFrom<RideRecordRepr> for RideRecord {
    type Error = String;

    fn try_from(repr: RideRecordRepr) -> std::result::Result<Self, Self::Error> {
        let trip_distance = repr
            .trip_distance
            .as_f64()
            .ok_or_else(|| format!("trip_distance {} is not a finite number", repr.trip_distance))?;
        Ok(Self {
            pu_location_id: repr.pu_location_id,
            do_location_id: repr.do_location_id,
            trip_distance,
            extra: repr.extra,
            received_distance: Some(repr.trip_distance),
        })
    }
}

/// A single ride as received by the serving side.
///
/// Fields other than the three the model reads are kept in `extra` and
/// written back out untouched when the record is forwarded to the sinks.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RideRecordRepr")]
pub struct RideRecord {
    pub pu_location_id: LocationId,
    pub do_location_id: LocationId,
    pub trip_distance: f64,
    pub extra: Map<String, Value>,
    /// `trip_distance` exactly as it was written on the wire (`40` stays `40`).
    received_distance: Option<Number>,
}

impl PartialEq for RideRecord {
    fn eq(&self, other: &Self) -> bool {
        self.pu_location_id == other.pu_location_id
            && self.do_location_id == other.do_location_id
            && self.trip_distance == other.trip_distance
            && self.extra == other.extra
    }
}

impl Serialize for RideRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.extra.len() + 3))?;
        for (key, value) in &self.extra {
            map.serialize_entry(key, value)?;
        }
        map.serialize_entry("PULocationID", &self.pu_location_id)?;
        map.serialize_entry("DOLocationID", &self.do_location_id)?;
        map.serialize_entry("trip_distance", &self.distance_value())?;
        map.end()
    }
}

impl RideRecord {
    pub fn new(
        pu_location_id: impl Into<LocationId>,
        do_location_id: impl Into<LocationId>,
        trip_distance: f64,
    ) -> Self {
        Self {
            pu_location_id: pu_location_id.into(),
            do_location_id: do_location_id.into(),
            trip_distance,
            extra: Map::new(),
            received_distance: None,
        }
    }

    fn distance_value(&self) -> Value {
        match &self.received_distance {
            Some(n) => Value::Number(n.clone()),
            None => Number::from_f64(self.trip_distance).map_or(Value::Null, Value::Number),
        }
    }

    /// The record as a JSON object with `PU_DO` and `prediction` merged in,
    /// which is the document shape both sinks receive.
    pub fn with_prediction(&self, prediction: f64) -> Result<Map<String, Value>> {
        let mut doc = self.extra.clone();
        doc.insert("PULocationID".to_string(), serde_json::to_value(&self.pu_location_id)?);
        doc.insert("DOLocationID".to_string(), serde_json::to_value(&self.do_location_id)?);
        doc.insert("trip_distance".to_string(), self.distance_value());
        doc.insert("PU_DO".to_string(), Value::String(prepare_features(self).pu_do));
        doc.insert("prediction".to_string(), serde_json::to_value(prediction)?);
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_location_ids_accept_numbers_and_strings() {
        let ride: RideRecord = serde_json::from_value(json!({
            "PULocationID": 130,
            "DOLocationID": "205",
            "trip_distance": 3.66
        }))
        .unwrap();

        assert_eq!(ride.pu_location_id, LocationId::Number(130));
        assert_eq!(ride.do_location_id, LocationId::Text("205".into()));
        assert_eq!(ride.pu_location_id.to_string(), "130");
        assert!(ride.extra.is_empty());
    }

    #[test]
    fn test_missing_location_is_rejected() {
        let err = serde_json::from_value::<RideRecord>(json!({
            "DOLocationID": 205,
            "trip_distance": 3.66
        }))
        .unwrap_err();
        assert!(err.to_string().contains("PULocationID"));
    }

    #[test]
    fn test_non_numeric_distance_is_rejected() {
        let res = serde_json::from_value::<RideRecord>(json!({
            "PULocationID": 1,
            "DOLocationID": 2,
            "trip_distance": "far"
        }));
        assert!(res.is_err());
    }

    #[test]
    fn test_extra_fields_survive_into_prediction_document() {
        let ride: RideRecord = serde_json::from_value(json!({
            "PULocationID": 10,
            "DOLocationID": 50,
            "trip_distance": 40,
            "VendorID": 2
        }))
        .unwrap();

        let doc = ride.with_prediction(12.5).unwrap();
        assert_eq!(
            Value::Object(doc),
            json!({
                "PULocationID": 10,
                "DOLocationID": 50,
                "trip_distance": 40,
                "VendorID": 2,
                "PU_DO": "10_50",
                "prediction": 12.5
            })
        );
    }

    #[test]
    fn test_any_json_identifier_is_accepted() {
        let ride: RideRecord = serde_json::from_value(json!({
            "PULocationID": 130.0,
            "DOLocationID": u64::MAX,
            "trip_distance": 1.2
        }))
        .unwrap();
        assert_eq!(prepare_features(&ride).pu_do, "130.0_18446744073709551615");

        let ride: RideRecord = serde_json::from_value(json!({
            "PULocationID": true,
            "DOLocationID": null,
            "trip_distance": 1.2
        }))
        .unwrap();
        assert_eq!(ride.pu_location_id, LocationId::Other(json!(true)));
        assert_eq!(prepare_features(&ride).pu_do, "true_null");

        let doc = ride.with_prediction(5.0).unwrap();
        assert_eq!(doc["PULocationID"], json!(true));
        assert_eq!(doc["DOLocationID"], Value::Null);
    }

    #[test]
    fn test_serialized_record_echoes_input() {
        let input = json!({ "PULocationID": 10, "DOLocationID": "50", "trip_distance": 7, "store_and_fwd_flag": "N" });
        let ride: RideRecord = serde_json::from_value(input.clone()).unwrap();

        assert_eq!(ride.trip_distance, 7.0);
        assert_eq!(serde_json::to_value(&ride).unwrap(), input);
        assert_eq!(serde_json::to_value(RideRecord::new(1, 2, 0.5)).unwrap()["trip_distance"], json!(0.5));
    }
}
