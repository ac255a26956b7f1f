use super::boundary::BoundaryRegion;
use super::types::{GeoPoint, Role, SourceResult};
use crate::error::FareHexError;

/// Trait for sources of named boundary regions.
pub trait BoundarySource {
    fn read_regions(&self) -> Result<Vec<BoundaryRegion>, FareHexError>;
}

/// Trait for sources of trip records.
///
/// Failing to open the source is an error; rows that fail to parse are
/// collected in [`SourceResult::errors`] and do not stop the read.
pub trait TripSource {
    type Record: TripData;

    fn read_trips(&self) -> Result<SourceResult<Self::Record>, FareHexError>;
}

/// Trait for trip records from different sources.
/// Implement this for a record type to enable hex indexing and feature derivation.
pub trait TripData: Send + Sync {
    /// Returns the record's primary key.
    fn key(&self) -> &str;

    /// Returns the pickup location, if both coordinates are present.
    fn pickup(&self) -> Option<GeoPoint>;

    /// Returns the dropoff location, if both coordinates are present.
    fn dropoff(&self) -> Option<GeoPoint>;

    fn point(&self, role: Role) -> Option<GeoPoint> {
        match role {
            Role::Pickup => self.pickup(),
            Role::Dropoff => self.dropoff(),
        }
    }

    /// True only if every point of the record is present and valid.
    fn has_valid_coordinates(&self) -> bool {
        Role::ALL
            .iter()
            .all(|role| self.point(*role).is_some_and(|p| p.is_valid()))
    }
}
