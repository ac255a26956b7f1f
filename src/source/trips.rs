use std::io::Read;
use std::path::PathBuf;

use serde::Deserialize;
use tracing::{debug, warn};

use super::traits::{TripData, TripSource};
use super::types::{GeoPoint, SourceResult};
use crate::error::FareHexError;

/// One raw taxi trip.
///
/// Field order matches the column order of header-less training files, so the
/// same type deserializes either by header name or by position. Test files
/// have no `fare_amount` column.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TripRecord {
    pub key: String,
    #[serde(default)]
    pub fare_amount: Option<f64>,
    #[serde(default)]
    pub pickup_datetime: Option<String>,
    #[serde(default)]
    pub pickup_longitude: Option<f64>,
    #[serde(default)]
    pub pickup_latitude: Option<f64>,
    #[serde(default)]
    pub dropoff_longitude: Option<f64>,
    #[serde(default)]
    pub dropoff_latitude: Option<f64>,
    #[serde(default)]
    pub passenger_count: Option<i32>,
}

impl TripData for TripRecord {
    fn key(&self) -> &str {
        &self.key
    }

    fn pickup(&self) -> Option<GeoPoint> {
        Some(GeoPoint::new(self.pickup_latitude?, self.pickup_longitude?))
    }

    fn dropoff(&self) -> Option<GeoPoint> {
        Some(GeoPoint::new(self.dropoff_latitude?, self.dropoff_longitude?))
    }
}

/// A CSV file of raw trips.
#[derive(Debug, Clone)]
pub struct CsvTripFile {
    path: PathBuf,
    has_headers: bool,
    limit: Option<usize>,
}

impl CsvTripFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            has_headers: true,
            limit: None,
        }
    }

    /// Sets whether the first line holds column names.
    pub fn with_headers(mut self, has_headers: bool) -> Self {
        self.has_headers = has_headers;
        self
    }

    /// Reads at most `limit` rows.
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }
}

impl TripSource for CsvTripFile {
    type Record = TripRecord;

    fn read_trips(&self) -> Result<SourceResult<TripRecord>, FareHexError> {
        let file = std::fs::File::open(&self.path)?;
        let result = read_trips_from(file, self.has_headers, self.limit);
        if result.has_errors() {
            warn!(
                "{}: skipped {} malformed rows",
                self.path.display(),
                result.errors.len()
            );
        }
        Ok(result)
    }
}

/// Parses trip rows from any CSV reader.
pub fn read_trips_from<R: Read>(
    reader: R,
    has_headers: bool,
    limit: Option<usize>,
) -> SourceResult<TripRecord> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(has_headers)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut result = SourceResult::new();
    let rows = csv_reader
        .deserialize::<TripRecord>()
        .take(limit.unwrap_or(usize::MAX));

    for (row, record) in rows.enumerate() {
        match record {
            Ok(record) => result.records.push(record),
            Err(e) => {
                debug!("row {}: {}", row, e);
                result.errors.push(FareHexError::Csv(e));
            }
        }
    }

    result
}
