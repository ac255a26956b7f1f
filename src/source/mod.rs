pub mod boundary;
pub mod traits;
pub mod trips;
pub mod types;

pub use boundary::{BoundaryRegion, GeoJsonBoundaryFile, parse_boundary_regions};
pub use traits::{BoundarySource, TripData, TripSource};
pub use trips::{CsvTripFile, TripRecord, read_trips_from};
pub use types::{GeoPoint, RegionId, Role, SourceResult};
