use h3o::Resolution;
use rayon::prelude::*;

use crate::source::{GeoPoint, Role, TripData};

use super::hex::HexCell;

/// Fine resolution used for trip points.
pub const POINT_RESOLUTION: Resolution = Resolution::Fifteen;

/// Coarse resolution used for boundary rasterization.
pub const BOUNDARY_RESOLUTION: Resolution = Resolution::Eleven;

/// Returns the cell of a single point, or `None` if the point is invalid.
pub fn index_point(point: &GeoPoint, resolution: Resolution) -> Option<HexCell> {
    if !point.is_valid() {
        return None;
    }
    HexCell::encode(point.lat, point.lon, resolution).ok()
}

/// Cells of one trip record.
///
/// Both cells are `None` when any coordinate of the record is absent or
/// invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedTrip {
    pub key: String,
    pub pickup: Option<HexCell>,
    pub dropoff: Option<HexCell>,
}

impl IndexedTrip {
    pub fn cell(&self, role: Role) -> Option<HexCell> {
        match role {
            Role::Pickup => self.pickup,
            Role::Dropoff => self.dropoff,
        }
    }

    pub fn is_indexed(&self) -> bool {
        self.pickup.is_some() && self.dropoff.is_some()
    }
}

/// Indexes both points of a record, all or nothing.
pub fn index_record<T: TripData>(record: &T, resolution: Resolution) -> IndexedTrip {
    let cells = if record.has_valid_coordinates() {
        record
            .pickup()
            .and_then(|p| index_point(&p, resolution))
            .zip(record.dropoff().and_then(|p| index_point(&p, resolution)))
    } else {
        None
    };

    IndexedTrip {
        key: record.key().to_string(),
        pickup: cells.map(|(pickup, _)| pickup),
        dropoff: cells.map(|(_, dropoff)| dropoff),
    }
}

/// Indexes a batch of records in parallel, preserving input order.
pub fn index_records<T: TripData>(records: &[T], resolution: Resolution) -> Vec<IndexedTrip> {
    records
        .par_iter()
        .map(|record| index_record(record, resolution))
        .collect()
}
