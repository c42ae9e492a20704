use ride_model::{DictVectorizer, Features};

use crate::{
    dataset::Trip,
    gbtree::{DMatrix, TrainError},
};

/// Encoded train/validation sets and the encoder fitted on the training trips.
pub struct FeatureSet {
    pub train: DMatrix,
    pub valid: DMatrix,
    pub vectorizer: DictVectorizer,
}

fn trip_features(trip: &Trip) -> Features {
    Features::new(&trip.pu_location_id, &trip.do_location_id, trip.trip_distance)
}

pub fn add_features(train: &[Trip], valid: &[Trip]) -> Result<FeatureSet, TrainError> {
    let train_dicts: Vec<Features> = train.iter().map(trip_features).collect();
    let valid_dicts: Vec<Features> = valid.iter().map(trip_features).collect();

    let mut vectorizer = DictVectorizer::default();
    let x_train = vectorizer.fit_transform(&train_dicts);
    let x_valid = vectorizer.transform(&valid_dicts);
    let n_features = vectorizer.n_features();

    let y_train = train.iter().map(|t| t.duration).collect();
    let y_valid = valid.iter().map(|t| t.duration).collect();

    tracing::info!(
        n_features,
        train_rows = train.len(),
        valid_rows = valid.len(),
        "built feature matrices"
    );

    Ok(FeatureSet {
        train: DMatrix::new(x_train, y_train, n_features)?,
        valid: DMatrix::new(x_valid, y_valid, n_features)?,
        vectorizer,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trip(pu: &str, dropoff: &str, distance: f64, duration: f64) -> Trip {
        Trip {
            pu_location_id: pu.into(),
            do_location_id: dropoff.into(),
            trip_distance: distance,
            duration,
        }
    }

    #[test]
    fn test_encoder_is_fitted_on_training_trips_only() {
        let train = vec![trip("1", "2", 1.0, 5.0), trip("3", "4", 2.0, 9.0)];
        let valid = vec![trip("1", "2", 1.5, 6.0), trip("9", "9", 3.0, 12.0)];

        let fs = add_features(&train, &valid).unwrap();

        assert_eq!(fs.vectorizer.feature_names(), &["PU_DO=1_2", "PU_DO=3_4", "trip_distance"]);
        assert_eq!(fs.train.labels(), &[5.0, 9.0]);
        assert_eq!(fs.valid.labels(), &[6.0, 12.0]);
        // unseen zone pair keeps only the distance
        assert_eq!(fs.valid.rows()[1].entries(), &[(2, 3.0)]);
        assert_eq!(fs.train.n_features(), 3);
    }
}
