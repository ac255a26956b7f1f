mod arrow;
mod geometry;
mod hex;
mod join;
mod parquet;
mod point;
mod raster;

pub use self::arrow::{
    assignments_from_record_batches, assignments_to_record_batch, cell_sets_from_record_batches,
    cell_sets_to_record_batch, cell_sets_to_record_batch_no_geom, features_to_record_batch,
    hexagons_from_record_batches, hexagons_to_record_batch,
};
pub use geometry::FromGeoJson;
pub use hex::{HexCell, MAX_RESOLUTION, is_valid_coordinate, parse_resolution};
pub use join::{JoinMatch, JoinStats, PointRegionAssignment, SpatialJoinResolver};
pub use self::parquet::{
    read_parquet, read_parquet_table, staging_path, write_geoparquet, write_parquet,
};
pub use point::{BOUNDARY_RESOLUTION, IndexedTrip, POINT_RESOLUTION, index_point, index_record, index_records};
pub use raster::{CompactCellSet, compact, polyfill, rasterize, rasterize_regions};
