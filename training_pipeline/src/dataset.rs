//! Trip datasets stored as Parquet (NYC TLC layout).

use arrow::{
    array::{Array, ArrayRef, AsArray},
    compute::cast,
    datatypes::{DataType, Float64Type, TimeUnit, TimestampMicrosecondType},
    error::ArrowError,
    record_batch::RecordBatch,
};
use parquet::{arrow::arrow_reader::ParquetRecordBatchReaderBuilder, errors::ParquetError};
use std::{fs::File, io, path::Path, path::PathBuf};
use thiserror::Error;

/// Trips shorter or longer than this (minutes) are dropped.
pub const MIN_DURATION_MIN: f64 = 1.0;
pub const MAX_DURATION_MIN: f64 = 60.0;

const MICROS_PER_MINUTE: f64 = 60_000_000.0;

/// Green taxi files use `lpep_`, yellow taxi files `tpep_`.
const TIMESTAMP_PREFIXES: [&str; 2] = ["lpep", "tpep"];

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to open {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Parquet(#[from] ParquetError),

    #[error(transparent)]
    Arrow(#[from] ArrowError),

    #[error("missing column {0}")]
    MissingColumn(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trip {
    pub pu_location_id: String,
    pub do_location_id: String,
    pub trip_distance: f64,
    /// Dropoff minus pickup, in minutes.
    pub duration: f64,
}

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef, DatasetError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| DatasetError::MissingColumn(name.to_string()))
}

fn timestamp_columns(batch: &RecordBatch) -> Result<(&ArrayRef, &ArrayRef), DatasetError> {
    for prefix in TIMESTAMP_PREFIXES {
        let pickup = batch.column_by_name(&format!("{}_pickup_datetime", prefix));
        let dropoff = batch.column_by_name(&format!("{}_dropoff_datetime", prefix));
        if let (Some(p), Some(d)) = (pickup, dropoff) {
            return Ok((p, d));
        }
    }
    Err(DatasetError::MissingColumn("lpep_pickup_datetime / lpep_dropoff_datetime".to_string()))
}

/// Append the trips of one batch whose duration is in range.
/// Returns how many rows were dropped.
fn read_batch(batch: &RecordBatch, trips: &mut Vec<Trip>) -> Result<usize, DatasetError> {
    let micros = DataType::Timestamp(TimeUnit::Microsecond, None);
    let (pickup, dropoff) = timestamp_columns(batch)?;
    let pickup = cast(pickup.as_ref(), &micros)?;
    let dropoff = cast(dropoff.as_ref(), &micros)?;
    let pu = cast(column(batch, "PULocationID")?.as_ref(), &DataType::Utf8)?;
    let dropoff_zone = cast(column(batch, "DOLocationID")?.as_ref(), &DataType::Utf8)?;
    let distance = cast(column(batch, "trip_distance")?.as_ref(), &DataType::Float64)?;

    let pickup = pickup.as_primitive::<TimestampMicrosecondType>();
    let dropoff = dropoff.as_primitive::<TimestampMicrosecondType>();
    let pu = pu.as_string::<i32>();
    let dropoff_zone = dropoff_zone.as_string::<i32>();
    let distance = distance.as_primitive::<Float64Type>();

    let mut dropped = 0;
    for i in 0..batch.num_rows() {
        if pickup.is_null(i) || dropoff.is_null(i) || pu.is_null(i) || dropoff_zone.is_null(i) || distance.is_null(i) {
            dropped += 1;
            continue;
        }
        let duration = (dropoff.value(i) - pickup.value(i)) as f64 / MICROS_PER_MINUTE;
        if !(MIN_DURATION_MIN..=MAX_DURATION_MIN).contains(&duration) {
            dropped += 1;
            continue;
        }
        trips.push(Trip {
            pu_location_id: pu.value(i).to_string(),
            do_location_id: dropoff_zone.value(i).to_string(),
            trip_distance: distance.value(i),
            duration,
        });
    }
    Ok(dropped)
}

/// Load a trip file, computing durations and keeping trips of 1 to 60 minutes.
pub fn read_dataframe(path: &Path) -> Result<Vec<Trip>, DatasetError> {
    let file = File::open(path).map_err(|source| DatasetError::Io { path: path.to_path_buf(), source })?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut trips = Vec::new();
    let mut dropped = 0;
    for batch in reader {
        dropped += read_batch(&batch?, &mut trips)?;
    }

    tracing::info!(path = %path.display(), kept = trips.len(), dropped, "loaded trips");
    Ok(trips)
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_duration_filter_and_types() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("green.parquet");
        write_trips(
            &path,
            "lpep",
            &[
                (0, 10 * MINUTE_US, Some(130), 205, 3.66),     // kept
                (0, 30 * 1_000_000, Some(1), 2, 0.1),          // 0.5 min, dropped
                (0, 60 * MINUTE_US, Some(3), 4, 20.0),         // exactly 60, kept
                (0, 61 * MINUTE_US, Some(5), 6, 25.0),         // dropped
                (0, 5 * MINUTE_US, None, 6, 1.0),              // null zone, dropped
                (0, MINUTE_US, Some(7), 8, 0.3),               // exactly 1, kept
            ],
        );

        let trips = read_dataframe(&path).unwrap();

        assert_eq!(trips.len(), 3);
        assert_eq!(
            trips[0],
            Trip { pu_location_id: "130".into(), do_location_id: "205".into(), trip_distance: 3.66, duration: 10.0 }
        );
        assert_eq!(trips[1].duration, 60.0);
        assert_eq!(trips[2].duration, 1.0);
    }

    #[test]
    fn test_yellow_prefix_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("yellow.parquet");
        write_trips(&path, "tpep", &synthetic_rows(5, 0));

        assert_eq!(read_dataframe(&path).unwrap().len(), 5);
    }

    #[test]
    fn test_missing_file() {
        let err = read_dataframe(Path::new("/no/such/trips.parquet")).unwrap_err();
        assert!(matches!(err, DatasetError::Io { .. }));
    }

    #[test]
    fn test_missing_timestamp_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.parquet");
        write_trips(&path, "xpep", &synthetic_rows(2, 0));

        assert!(matches!(read_dataframe(&path), Err(DatasetError::MissingColumn(_))));
    }
}
