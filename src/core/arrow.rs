use std::collections::BTreeMap;
use std::sync::Arc;

use arrow_array::{
    Array, ArrayRef, Float64Array, Int32Array, RecordBatch, StringArray, UInt8Array, UInt64Array,
};
use arrow_schema::{DataType, Field, Schema};
use geo_types::Polygon;
use geoarrow_array::IntoArrow;
use geoarrow_array::builder::PolygonBuilder;
use geoarrow_schema::{Crs, Dimension, Metadata, PolygonType};
use serde_json::json;

use crate::error::FareHexError;
use crate::features::{RegionColumns, TripFeatures};
use crate::source::{RegionId, Role};

use super::hex::HexCell;
use super::join::PointRegionAssignment;
use super::point::IndexedTrip;
use super::raster::CompactCellSet;

fn wgs84_metadata() -> Arc<Metadata> {
    let crs = Crs::from_projjson(json!({
        "type": "GeographicCRS",
        "name": "WGS 84",
        "id": {"authority": "EPSG", "code": 4326}
    }));
    Arc::new(Metadata::new(crs, None))
}

fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T, FareHexError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| FareHexError::Parquet(format!("Missing column '{name}'")))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| FareHexError::Parquet(format!("Column '{name}' has an unexpected type")))
}

fn cell_set_rows(sets: &BTreeMap<RegionId, CompactCellSet>) -> Vec<(String, HexCell)> {
    sets.iter()
        .flat_map(|(region_id, set)| {
            let name = region_id.to_string();
            set.iter().map(move |cell| (name.clone(), cell))
        })
        .collect()
}

fn cell_set_fields() -> Vec<Field> {
    vec![
        Field::new("region_id", DataType::Utf8, false),
        Field::new("cell", DataType::UInt64, false),
        Field::new("resolution", DataType::UInt8, false),
    ]
}

/// One row per (region, cell), ordered by region then cell.
pub fn cell_sets_to_record_batch_no_geom(
    sets: &BTreeMap<RegionId, CompactCellSet>,
) -> Result<RecordBatch, FareHexError> {
    let rows = cell_set_rows(sets);

    let region_ids: StringArray = rows.iter().map(|(id, _)| Some(id.as_str())).collect();
    let cells: UInt64Array = rows.iter().map(|(_, c)| Some(c.to_integer())).collect();
    let resolutions: UInt8Array = rows.iter().map(|(_, c)| Some(u8::from(c.resolution()))).collect();

    let batch = RecordBatch::try_new(
        Arc::new(Schema::new(cell_set_fields())),
        vec![Arc::new(region_ids), Arc::new(cells), Arc::new(resolutions)],
    )?;
    Ok(batch)
}

/// Like [`cell_sets_to_record_batch_no_geom`] with each cell's hexagon as an
/// EPSG:4326 polygon column.
pub fn cell_sets_to_record_batch(
    sets: &BTreeMap<RegionId, CompactCellSet>,
) -> Result<RecordBatch, FareHexError> {
    let rows = cell_set_rows(sets);

    let region_ids: StringArray = rows.iter().map(|(id, _)| Some(id.as_str())).collect();
    let cells: UInt64Array = rows.iter().map(|(_, c)| Some(c.to_integer())).collect();
    let resolutions: UInt8Array = rows.iter().map(|(_, c)| Some(u8::from(c.resolution()))).collect();

    let polygons: Vec<Polygon<f64>> = rows.iter().map(|(_, c)| c.to_polygon()).collect();
    let poly_type = PolygonType::new(Dimension::XY, wgs84_metadata());
    let geometry_array = PolygonBuilder::from_polygons(&polygons, poly_type).finish();
    let geometry_field = geometry_array.extension_type().to_field("geometry", false);

    let mut fields = cell_set_fields();
    fields.push(geometry_field);

    let batch = RecordBatch::try_new(
        Arc::new(Schema::new(fields)),
        vec![
            Arc::new(region_ids),
            Arc::new(cells),
            Arc::new(resolutions),
            Arc::new(geometry_array.into_arrow()),
        ],
    )?;
    Ok(batch)
}

/// Rebuilds region cell sets from persisted batches.
///
/// # Errors
///
/// Returns [`FareHexError::InvalidEncoding`] if a stored value is not a valid
/// cell.
pub fn cell_sets_from_record_batches(
    batches: &[RecordBatch],
) -> Result<BTreeMap<RegionId, CompactCellSet>, FareHexError> {
    let mut by_region: BTreeMap<RegionId, Vec<HexCell>> = BTreeMap::new();

    for batch in batches {
        let region_ids = column::<StringArray>(batch, "region_id")?;
        let cells = column::<UInt64Array>(batch, "cell")?;

        for i in 0..batch.num_rows() {
            if region_ids.is_null(i) || cells.is_null(i) {
                return Err(FareHexError::InvalidEncoding(format!("Null cell-set entry at row {i}")));
            }
            let cell = HexCell::from_integer(cells.value(i))?;
            by_region
                .entry(RegionId::parse(region_ids.value(i)))
                .or_default()
                .push(cell);
        }
    }

    Ok(by_region
        .into_iter()
        .map(|(region_id, cells)| (region_id, CompactCellSet::from_cells(cells)))
        .collect())
}

pub fn hexagons_to_record_batch(trips: &[IndexedTrip]) -> Result<RecordBatch, FareHexError> {
    let keys: StringArray = trips.iter().map(|t| Some(t.key.as_str())).collect();
    let pickups: UInt64Array = trips.iter().map(|t| t.pickup.map(u64::from)).collect();
    let dropoffs: UInt64Array = trips.iter().map(|t| t.dropoff.map(u64::from)).collect();

    let schema = Schema::new(vec![
        Field::new("key", DataType::Utf8, false),
        Field::new("pickup_hexagon", DataType::UInt64, true),
        Field::new("dropoff_hexagon", DataType::UInt64, true),
    ]);

    let batch = RecordBatch::try_new(
        Arc::new(schema),
        vec![Arc::new(keys), Arc::new(pickups), Arc::new(dropoffs)],
    )?;
    Ok(batch)
}

fn optional_cell(array: &UInt64Array, i: usize) -> Result<Option<HexCell>, FareHexError> {
    if array.is_null(i) {
        Ok(None)
    } else {
        HexCell::from_integer(array.value(i)).map(Some)
    }
}

pub fn hexagons_from_record_batches(batches: &[RecordBatch]) -> Result<Vec<IndexedTrip>, FareHexError> {
    let mut trips = Vec::new();

    for batch in batches {
        let keys = column::<StringArray>(batch, "key")?;
        let pickups = column::<UInt64Array>(batch, "pickup_hexagon")?;
        let dropoffs = column::<UInt64Array>(batch, "dropoff_hexagon")?;

        for i in 0..batch.num_rows() {
            trips.push(IndexedTrip {
                key: keys.value(i).to_string(),
                pickup: optional_cell(pickups, i)?,
                dropoff: optional_cell(dropoffs, i)?,
            });
        }
    }

    Ok(trips)
}

pub fn assignments_to_record_batch(
    rows: &[PointRegionAssignment],
) -> Result<RecordBatch, FareHexError> {
    let keys: StringArray = rows.iter().map(|r| Some(r.key.as_str())).collect();
    let roles: StringArray = rows.iter().map(|r| Some(r.role.as_str())).collect();
    let region_ids: StringArray = rows
        .iter()
        .map(|r| r.region_id.as_ref().map(RegionId::to_string))
        .collect();

    let schema = Schema::new(vec![
        Field::new("key", DataType::Utf8, false),
        Field::new("role", DataType::Utf8, false),
        Field::new("region_id", DataType::Utf8, true),
    ]);

    let batch = RecordBatch::try_new(
        Arc::new(schema),
        vec![Arc::new(keys), Arc::new(roles), Arc::new(region_ids)],
    )?;
    Ok(batch)
}

pub fn assignments_from_record_batches(
    batches: &[RecordBatch],
) -> Result<Vec<PointRegionAssignment>, FareHexError> {
    let mut rows = Vec::new();

    for batch in batches {
        let keys = column::<StringArray>(batch, "key")?;
        let roles = column::<StringArray>(batch, "role")?;
        let region_ids = column::<StringArray>(batch, "region_id")?;

        for i in 0..batch.num_rows() {
            let role = match roles.value(i) {
                "pickup" => Role::Pickup,
                "dropoff" => Role::Dropoff,
                other => {
                    return Err(FareHexError::Parquet(format!("Unknown role '{other}' at row {i}")));
                }
            };
            rows.push(PointRegionAssignment {
                key: keys.value(i).to_string(),
                role,
                region_id: (!region_ids.is_null(i)).then(|| RegionId::parse(region_ids.value(i))),
            });
        }
    }

    Ok(rows)
}

/// Feature table: the per-trip features, `week_fourier_order` cos/sin column
/// pairs of `time_in_week`, then a pickup and a dropoff region column per
/// dataset in `regions`.
pub fn features_to_record_batch(
    features: &[TripFeatures],
    week_fourier_order: usize,
    regions: &[RegionColumns],
) -> Result<RecordBatch, FareHexError> {
    let keys: StringArray = features.iter().map(|f| Some(f.key.as_str())).collect();
    let primary_keys: UInt64Array = features.iter().map(|f| Some(f.primary_key)).collect();
    let fares: Float64Array = features.iter().map(|f| f.fare).collect();
    let passengers: Int32Array = features.iter().map(|f| f.passenger_count).collect();
    let pickup_lat: Float64Array = features.iter().map(|f| f.pickup.map(|p| p.lat)).collect();
    let pickup_lon: Float64Array = features.iter().map(|f| f.pickup.map(|p| p.lon)).collect();
    let dropoff_lat: Float64Array = features.iter().map(|f| f.dropoff.map(|p| p.lat)).collect();
    let dropoff_lon: Float64Array = features.iter().map(|f| f.dropoff.map(|p| p.lon)).collect();
    let distances: Float64Array = features.iter().map(|f| f.distance_km).collect();
    let week_times: Float64Array = features.iter().map(|f| f.time_in_week).collect();
    let in_box: Float64Array = features
        .iter()
        .map(|f| Some(if f.in_bounding_box { 1.0 } else { 0.0 }))
        .collect();
    let splits: UInt8Array = features.iter().map(|f| Some(f.split.as_u8())).collect();

    let mut fields = vec![
        Field::new("key", DataType::Utf8, false),
        Field::new("primary_key", DataType::UInt64, false),
        Field::new("fare", DataType::Float64, true),
        Field::new("passenger_count", DataType::Int32, true),
        Field::new("pickup_latitude", DataType::Float64, true),
        Field::new("pickup_longitude", DataType::Float64, true),
        Field::new("dropoff_latitude", DataType::Float64, true),
        Field::new("dropoff_longitude", DataType::Float64, true),
        Field::new("distance_km", DataType::Float64, true),
        Field::new("time_in_week", DataType::Float64, true),
        Field::new("in_bounding_box", DataType::Float64, false),
        Field::new("split", DataType::UInt8, false),
    ];
    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(keys),
        Arc::new(primary_keys),
        Arc::new(fares),
        Arc::new(passengers),
        Arc::new(pickup_lat),
        Arc::new(pickup_lon),
        Arc::new(dropoff_lat),
        Arc::new(dropoff_lon),
        Arc::new(distances),
        Arc::new(week_times),
        Arc::new(in_box),
        Arc::new(splits),
    ];

    for (index, name) in (1..=week_fourier_order).flat_map(|freq| {
        [
            (2 * (freq - 1), format!("time_in_week_cos_{freq}")),
            (2 * (freq - 1) + 1, format!("time_in_week_sin_{freq}")),
        ]
    }) {
        let values: Float64Array = features
            .iter()
            .map(|f| f.week_fourier.as_ref().and_then(|v| v.get(index)).copied())
            .collect();
        fields.push(Field::new(name, DataType::Float64, true));
        columns.push(Arc::new(values));
    }

    for region in regions {
        if region.len() != features.len() {
            return Err(FareHexError::InvalidEncoding(format!(
                "{} region columns have {} rows for {} trips",
                region.dataset,
                region.len(),
                features.len()
            )));
        }
        for (role, ids) in [(Role::Pickup, &region.pickup), (Role::Dropoff, &region.dropoff)] {
            let values: StringArray = ids.iter().map(|id| id.as_ref().map(RegionId::to_string)).collect();
            fields.push(Field::new(format!("{}_{}", region.dataset, role), DataType::Utf8, true));
            columns.push(Arc::new(values));
        }
    }

    let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;
    Ok(batch)
}
