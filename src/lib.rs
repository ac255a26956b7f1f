pub mod config;
pub mod core;
pub mod error;
pub mod features;
pub mod pipeline;
pub mod source;

pub use config::{Config, DatasetConfig};
pub use crate::core::{
    CompactCellSet, FromGeoJson, HexCell, IndexedTrip, JoinStats, PointRegionAssignment,
    SpatialJoinResolver, compact, index_point, index_record, index_records, polyfill, rasterize,
    rasterize_regions, read_parquet, write_geoparquet, write_parquet,
};
pub use error::FareHexError;
pub use features::{
    FeatureParams, RegionColumns, SplitLabel, SplitParams, TripFeatures, derive_all, derive_features,
};
pub use pipeline::FeaturePipeline;
pub use source::{
    BoundaryRegion, BoundarySource, CsvTripFile, GeoJsonBoundaryFile, GeoPoint, RegionId, Role,
    TripData, TripRecord, TripSource,
};
