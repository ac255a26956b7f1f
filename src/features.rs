//! Per-trip numeric features for the fare model.

use std::collections::HashMap;

use chrono::{Datelike, NaiveDateTime, Timelike};
use md5::{Digest, Md5};
use rayon::prelude::*;
use xxhash_rust::xxh64::xxh64;

use crate::core::PointRegionAssignment;
use crate::source::{GeoPoint, RegionId, Role, TripData, TripRecord};

pub const EARTH_RADIUS_KM: f64 = 6371.0;
pub const HOURS_PER_WEEK: f64 = 168.0;

/// Open latitude and longitude bounds of the New York City area.
pub const NYC_LAT_BOUNDS: (f64, f64) = (40.0, 42.0);
pub const NYC_LON_BOUNDS: (f64, f64) = (-75.0, -72.0);

/// Trips longer than this, or with fares above [`MAX_FARE`], are outliers.
pub const MAX_DISTANCE_KM: f64 = 100.0;
pub const MAX_FARE: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SplitLabel {
    Train = 0,
    Test = 1,
    Outlier = 2,
}

impl SplitLabel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Parameters of the deterministic train/test assignment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitParams {
    pub train_fraction: f64,
    pub seed: u64,
}

impl Default for SplitParams {
    fn default() -> Self {
        Self {
            train_fraction: 0.75,
            seed: 0,
        }
    }
}

/// Everything [`derive_features`] needs besides the record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureParams {
    pub split: SplitParams,
    /// Harmonics of `time_in_week` emitted as cos/sin pairs.
    pub week_fourier_order: usize,
}

impl Default for FeatureParams {
    fn default() -> Self {
        Self {
            split: SplitParams::default(),
            week_fourier_order: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TripFeatures {
    pub key: String,
    pub primary_key: u64,
    pub fare: Option<f64>,
    pub passenger_count: Option<i32>,
    pub pickup: Option<GeoPoint>,
    pub dropoff: Option<GeoPoint>,
    pub distance_km: Option<f64>,
    pub time_in_week: Option<f64>,
    /// [`fourier_series`] of `time_in_week` over one week.
    pub week_fourier: Option<Vec<f64>>,
    pub in_bounding_box: bool,
    pub split: SplitLabel,
}

/// Great-circle distance on a sphere of radius [`EARTH_RADIUS_KM`].
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lon1) = (a.lat.to_radians(), a.lon.to_radians());
    let (lat2, lon2) = (b.lat.to_radians(), b.lon.to_radians());

    let h = ((lat1 - lat2) / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * ((lon1 - lon2) / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Parses the `YYYY-MM-DD HH:MM:SS` prefix of a pickup timestamp such as
/// `2009-06-15 17:26:21 UTC`.
pub fn parse_pickup_datetime(value: &str) -> Option<NaiveDateTime> {
    let prefix = value.trim().get(..19)?;
    NaiveDateTime::parse_from_str(prefix, "%Y-%m-%d %H:%M:%S").ok()
}

/// Hours since Sunday midnight.
pub fn time_in_week(datetime: &NaiveDateTime) -> f64 {
    let day = datetime.weekday().num_days_from_sunday() as f64;
    day * 24.0 + datetime.num_seconds_from_midnight() as f64 / 3600.0
}

/// `[cos(a), sin(a), cos(2a), sin(2a), ...]` for `a = 2π·value/period`.
pub fn fourier_series(value: f64, period: f64, max_freq: usize) -> Vec<f64> {
    let angle = value * std::f64::consts::TAU / period;
    (1..=max_freq)
        .flat_map(|freq| {
            let a = angle * freq as f64;
            [a.cos(), a.sin()]
        })
        .collect()
}

/// True when both ends of the trip lie strictly inside the NYC box.
pub fn in_bounding_box<T: TripData>(record: &T) -> bool {
    let inside = |p: GeoPoint| {
        p.lat > NYC_LAT_BOUNDS.0
            && p.lat < NYC_LAT_BOUNDS.1
            && p.lon > NYC_LON_BOUNDS.0
            && p.lon < NYC_LON_BOUNDS.1
    };
    record.pickup().is_some_and(inside) && record.dropoff().is_some_and(inside)
}

/// Stable 64-bit id of a record key: the first 8 bytes of its MD5 digest,
/// big-endian.
pub fn primary_key(key: &str) -> u64 {
    let digest = Md5::digest(key.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

/// Assigns a record to train, test or outlier.
///
/// Outliers fall outside the NYC box, have a distance outside
/// (0, [`MAX_DISTANCE_KM`]) or a fare outside (0, [`MAX_FARE`]). A missing
/// fare (test files) does not make a trip an outlier. Everything else is
/// split by the key hash so `train_fraction` of keys land in train.
pub fn split_label(
    key: &str,
    in_box: bool,
    distance_km: Option<f64>,
    fare: Option<f64>,
    params: &SplitParams,
) -> SplitLabel {
    let good_distance = distance_km.is_some_and(|d| d > 0.0 && d < MAX_DISTANCE_KM);
    let good_fare = fare.is_none_or(|f| f > 0.0 && f < MAX_FARE);
    if !(in_box && good_distance && good_fare) {
        return SplitLabel::Outlier;
    }

    let unit = (xxh64(key.as_bytes(), params.seed) >> 11) as f64 / (1u64 << 53) as f64;
    if unit < params.train_fraction {
        SplitLabel::Train
    } else {
        SplitLabel::Test
    }
}

pub fn derive_features(record: &TripRecord, params: &FeatureParams) -> TripFeatures {
    let valid = record.has_valid_coordinates();
    let pickup = record.pickup().filter(|_| valid);
    let dropoff = record.dropoff().filter(|_| valid);
    let distance_km = pickup.zip(dropoff).map(|(a, b)| haversine_km(a, b));
    let in_box = in_bounding_box(record);
    let week_time = record
        .pickup_datetime
        .as_deref()
        .and_then(parse_pickup_datetime)
        .map(|dt| time_in_week(&dt));

    TripFeatures {
        key: record.key.clone(),
        primary_key: primary_key(&record.key),
        fare: record.fare_amount,
        passenger_count: record.passenger_count,
        pickup,
        dropoff,
        distance_km,
        time_in_week: week_time,
        week_fourier: week_time
            .map(|t| fourier_series(t, HOURS_PER_WEEK, params.week_fourier_order)),
        in_bounding_box: in_box,
        split: split_label(&record.key, in_box, distance_km, record.fare_amount, &params.split),
    }
}

/// Derives features for a batch in parallel, preserving input order.
pub fn derive_all(records: &[TripRecord], params: &FeatureParams) -> Vec<TripFeatures> {
    records
        .par_iter()
        .map(|record| derive_features(record, params))
        .collect()
}

/// Pickup and dropoff regions of one boundary dataset, row-aligned with a
/// slice of [`TripFeatures`].
#[derive(Debug, Clone, PartialEq)]
pub struct RegionColumns {
    pub dataset: String,
    pub pickup: Vec<Option<RegionId>>,
    pub dropoff: Vec<Option<RegionId>>,
}

impl RegionColumns {
    /// All-null columns for a dataset without location rows.
    pub fn empty(dataset: impl Into<String>, len: usize) -> Self {
        Self {
            dataset: dataset.into(),
            pickup: vec![None; len],
            dropoff: vec![None; len],
        }
    }

    /// Lines location rows up with `features` by key. Trips without a row
    /// get null regions.
    pub fn from_assignments(
        dataset: impl Into<String>,
        features: &[TripFeatures],
        rows: &[PointRegionAssignment],
    ) -> Self {
        let by_key: HashMap<(&str, Role), Option<&RegionId>> = rows
            .iter()
            .map(|row| ((row.key.as_str(), row.role), row.region_id.as_ref()))
            .collect();
        let column = |role: Role| -> Vec<Option<RegionId>> {
            features
                .iter()
                .map(|f| by_key.get(&(f.key.as_str(), role)).copied().flatten().cloned())
                .collect()
        };

        Self {
            dataset: dataset.into(),
            pickup: column(Role::Pickup),
            dropoff: column(Role::Dropoff),
        }
    }

    pub fn len(&self) -> usize {
        self.pickup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pickup.is_empty()
    }
}
