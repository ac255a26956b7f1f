use std::collections::BTreeMap;

use geo_types::{MultiPolygon, Polygon};
use h3o::geom::{ContainmentMode, TilerBuilder};
use h3o::{CellIndex, Resolution};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::error::FareHexError;
use crate::source::{BoundaryRegion, RegionId};

use super::hex::{HexCell, is_valid_coordinate};

/// Cells covering a region with no overlap, merged upward wherever a full
/// set of siblings is present.
///
/// Cells are kept sorted by their integer encoding and free of duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactCellSet {
    cells: Vec<HexCell>,
}

impl CompactCellSet {
    /// Builds a set from already-compacted cells, e.g. cells read back from
    /// storage.
    pub fn from_cells(cells: impl IntoIterator<Item = HexCell>) -> Self {
        let mut cells: Vec<HexCell> = cells.into_iter().collect();
        cells.sort_unstable();
        cells.dedup();
        Self { cells }
    }

    pub fn cells(&self) -> &[HexCell] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// True if `cell` is itself a member of the set.
    pub fn contains(&self, cell: HexCell) -> bool {
        self.cells.binary_search(&cell).is_ok()
    }

    /// True if `cell` or one of its ancestors is a member of the set.
    pub fn covers(&self, cell: HexCell) -> bool {
        cell.ancestors().any(|ancestor| self.contains(ancestor))
    }

    pub fn iter(&self) -> impl Iterator<Item = HexCell> + '_ {
        self.cells.iter().copied()
    }
}

/// Returns every cell at `resolution` whose centre lies inside the polygon's
/// exterior ring, sorted by integer encoding.
///
/// Interior rings are not considered.
pub fn polyfill(polygon: &Polygon<f64>, resolution: Resolution) -> Result<Vec<HexCell>, FareHexError> {
    validate_ring(polygon)?;

    let mut tiler = TilerBuilder::new(resolution)
        .containment_mode(ContainmentMode::ContainsCentroid)
        .build();
    tiler
        .add(Polygon::new(polygon.exterior().clone(), vec![]))
        .map_err(|e| FareHexError::Geometry(e.to_string()))?;

    let mut inside: Vec<HexCell> = tiler.into_coverage().map(HexCell::from).collect();
    inside.sort_unstable();
    inside.dedup();
    debug!("polyfill: {} cells at resolution {}", inside.len(), resolution);
    Ok(inside)
}

fn validate_ring(polygon: &Polygon<f64>) -> Result<(), FareHexError> {
    let ring = polygon.exterior();
    if ring.0.len() < 4 {
        return Err(FareHexError::Geometry(format!(
            "Exterior ring needs at least 4 coordinates, got {}",
            ring.0.len()
        )));
    }

    if let Some(c) = ring.coords().find(|c| !is_valid_coordinate(c.y, c.x)) {
        return Err(FareHexError::Geometry(format!(
            "Ring vertex ({}, {}) is outside the valid lon/lat range",
            c.x, c.y
        )));
    }

    Ok(())
}

/// Merges every complete group of sibling cells into its parent, repeating
/// until no group at any level is complete.
///
/// Pentagon parents are complete with their six children.
///
/// # Errors
///
/// Returns [`FareHexError::InvalidResolution`] if the input mixes resolutions.
pub fn compact(cells: impl IntoIterator<Item = HexCell>) -> Result<CompactCellSet, FareHexError> {
    let mut cells: Vec<HexCell> = cells.into_iter().collect();
    cells.sort_unstable();
    cells.dedup();

    let Some(first) = cells.first().copied() else {
        return Ok(CompactCellSet::default());
    };
    if let Some(other) = cells.iter().find(|c| c.resolution() != first.resolution()) {
        return Err(FareHexError::InvalidResolution(format!(
            "cannot compact mixed resolutions {} and {}",
            u8::from(first.resolution()),
            u8::from(other.resolution())
        )));
    }

    let compacted = CellIndex::compact(cells.into_iter().map(CellIndex::from))
        .map_err(|e| FareHexError::InvalidResolution(e.to_string()))?;
    Ok(CompactCellSet::from_cells(compacted.map(HexCell::from)))
}

/// Rasterizes a (multi-)polygon into a compact cell set.
///
/// Each part is filled and compacted on its own and the results are unioned;
/// parts are assumed disjoint. Holes are not subtracted: interior rings are
/// ignored with a warning.
pub fn rasterize(geometry: &MultiPolygon<f64>, resolution: Resolution) -> Result<CompactCellSet, FareHexError> {
    let mut cells = Vec::new();
    for polygon in geometry.iter() {
        if !polygon.interiors().is_empty() {
            warn!(
                "Ignoring {} interior ring(s); holes are covered as part of the polygon",
                polygon.interiors().len()
            );
        }
        let part = compact(polyfill(polygon, resolution)?)?;
        cells.extend(part.iter());
    }
    Ok(CompactCellSet::from_cells(cells))
}

/// Rasterizes every region in parallel. Regions sharing an id are unioned.
pub fn rasterize_regions(
    regions: &[BoundaryRegion],
    resolution: Resolution,
) -> Result<BTreeMap<RegionId, CompactCellSet>, FareHexError> {
    let sets: Result<Vec<(RegionId, CompactCellSet)>, FareHexError> = regions
        .par_iter()
        .map(|region| {
            let set = rasterize(&region.geometry, resolution)?;
            if set.is_empty() {
                warn!("Region {} covers no cell centre at this resolution", region.region_id);
            }
            Ok((region.region_id.clone(), set))
        })
        .collect();

    let mut by_region: BTreeMap<RegionId, Vec<HexCell>> = BTreeMap::new();
    for (region_id, set) in sets? {
        by_region.entry(region_id).or_default().extend(set.iter());
    }

    let result: BTreeMap<RegionId, CompactCellSet> = by_region
        .into_iter()
        .map(|(region_id, cells)| (region_id, CompactCellSet::from_cells(cells)))
        .collect();

    for (region_id, set) in &result {
        info!("  {}: {} compact cells", region_id, set.len());
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Contains;
    use geo_types::{Coord, LineString, Point};

    fn rectangle(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Polygon<f64> {
        Polygon::new(
            LineString::new(vec![
                Coord { x: min_lon, y: min_lat },
                Coord { x: max_lon, y: min_lat },
                Coord { x: max_lon, y: max_lat },
                Coord { x: min_lon, y: max_lat },
                Coord { x: min_lon, y: min_lat },
            ]),
            vec![],
        )
    }

    fn around(cell: HexCell, half_size: f64) -> Polygon<f64> {
        let (lat, lon) = cell.center();
        rectangle(lon - half_size, lat - half_size, lon + half_size, lat + half_size)
    }

    #[test]
    fn test_small_rectangle_rasterizes_to_one_cell() {
        let cell = HexCell::encode(40.7831, -73.9712, Resolution::Eleven).unwrap();
        let polygon = around(cell, 0.0001);

        let set = rasterize(&MultiPolygon::new(vec![polygon]), Resolution::Eleven).unwrap();
        assert_eq!(set.cells(), &[cell]);
    }

    #[test]
    fn test_cell_outline_compacts_to_parent() {
        let parent = HexCell::encode(40.75, -73.98, Resolution::Six).unwrap();
        let polygon = parent.to_polygon();

        let filled = polyfill(&polygon, Resolution::Seven).unwrap();
        assert_eq!(filled.len(), 7);
        assert!(filled.iter().all(|c| parent.contains(*c)));

        let set = rasterize(&MultiPolygon::new(vec![polygon]), Resolution::Seven).unwrap();
        assert_eq!(set.cells(), &[parent]);
    }

    #[test]
    fn test_compaction_covers_every_filled_cell() {
        let polygon = rectangle(-74.00, 40.70, -73.95, 40.75);

        let filled = polyfill(&polygon, Resolution::Nine).unwrap();
        let set = compact(filled.clone()).unwrap();

        assert!(!filled.is_empty());
        assert!(set.len() <= filled.len());
        for cell in &filled {
            assert!(set.covers(*cell), "{cell} is not covered");
        }
        for cell in set.iter() {
            assert!(u8::from(cell.resolution()) <= 9);
        }
    }

    #[test]
    fn test_compacted_cells_do_not_overlap() {
        let polygon = rectangle(-74.00, 40.70, -73.95, 40.75);
        let set = rasterize(&MultiPolygon::new(vec![polygon]), Resolution::Nine).unwrap();

        for a in set.iter() {
            for b in set.iter() {
                if a != b {
                    assert!(!a.contains(b));
                }
            }
        }
    }

    #[test]
    fn test_polyfill_uses_centroid_containment() {
        let polygon = rectangle(-74.00, 40.70, -73.98, 40.72);
        let filled = polyfill(&polygon, Resolution::Nine).unwrap();

        for cell in &filled {
            let (lat, lon) = cell.center();
            assert!(polygon.contains(&Point::new(lon, lat)));
        }
        // Nothing just outside the ring's cells is missed.
        for cell in &filled {
            for neighbour in CellIndex::from(*cell).grid_disk::<Vec<_>>(1) {
                let neighbour = HexCell::from(neighbour);
                let (lat, lon) = neighbour.center();
                if polygon.contains(&Point::new(lon, lat)) {
                    assert!(filled.contains(&neighbour));
                }
            }
        }
    }

    #[test]
    fn test_rasterize_is_deterministic() {
        let polygon = rectangle(-74.00, 40.70, -73.96, 40.74);
        let geometry = MultiPolygon::new(vec![polygon]);

        let first = rasterize(&geometry, Resolution::Nine).unwrap();
        let second = rasterize(&geometry, Resolution::Nine).unwrap();
        assert_eq!(first, second);
        assert!(first.cells().windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_multipolygon_parts_are_unioned() {
        let a = HexCell::encode(40.75, -73.98, Resolution::Six).unwrap();
        let b = HexCell::encode(40.60, -74.15, Resolution::Six).unwrap();
        assert_ne!(a, b);

        let geometry = MultiPolygon::new(vec![a.to_polygon(), b.to_polygon()]);
        let set = rasterize(&geometry, Resolution::Seven).unwrap();

        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(set.cells(), expected.as_slice());
    }

    #[test]
    fn test_holes_are_not_subtracted() {
        let cell = HexCell::encode(40.7831, -73.9712, Resolution::Eleven).unwrap();
        let outer = around(cell, 0.002);
        let hole = around(cell, 0.0005);
        let with_hole = Polygon::new(outer.exterior().clone(), vec![hole.exterior().clone()]);

        let set = rasterize(&MultiPolygon::new(vec![with_hole]), Resolution::Eleven).unwrap();
        assert!(set.covers(cell));
    }

    #[test]
    fn test_invalid_rings_are_rejected() {
        let degenerate = Polygon::new(
            LineString::new(vec![Coord { x: 0.0, y: 0.0 }, Coord { x: 1.0, y: 1.0 }]),
            vec![],
        );
        assert!(matches!(
            polyfill(&degenerate, Resolution::Nine),
            Err(FareHexError::Geometry(_))
        ));

        let out_of_range = rectangle(170.0, 80.0, 190.0, 85.0);
        assert!(matches!(
            polyfill(&out_of_range, Resolution::Two),
            Err(FareHexError::Geometry(_))
        ));
    }

    #[test]
    fn test_compact_rejects_mixed_resolutions() {
        let fine = HexCell::encode(40.75, -73.98, Resolution::Nine).unwrap();
        let coarse = fine.parent(Resolution::Eight).unwrap();
        assert!(matches!(
            compact(vec![fine, coarse]),
            Err(FareHexError::InvalidResolution(_))
        ));
        assert!(compact(Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn test_compact_keeps_incomplete_groups() {
        let parent = HexCell::encode(40.75, -73.98, Resolution::Eight).unwrap();
        let mut children = polyfill(&parent.to_polygon(), Resolution::Nine).unwrap();
        assert_eq!(children.len(), 7);

        let full = compact(children.clone()).unwrap();
        assert_eq!(full.cells(), &[parent]);

        children.pop();
        let partial = compact(children.clone()).unwrap();
        assert_eq!(partial.cells(), children.as_slice());
    }

    #[test]
    fn test_compact_merges_pentagon_children() {
        let pentagon = CellIndex::base_cells()
            .find(|cell| cell.is_pentagon())
            .unwrap()
            .children(Resolution::Two)
            .find(|cell| cell.is_pentagon())
            .unwrap();
        let children: Vec<HexCell> = pentagon.children(Resolution::Three).map(HexCell::from).collect();
        assert_eq!(children.len(), 6);

        let full = compact(children.clone()).unwrap();
        assert_eq!(full.cells(), &[HexCell::from(pentagon)]);

        let partial = compact(children[1..].to_vec()).unwrap();
        assert_eq!(partial.len(), 5);
        assert!(!partial.contains(HexCell::from(pentagon)));
    }

    #[test]
    fn test_rasterize_regions_unions_duplicate_ids() {
        let a = HexCell::encode(40.75, -73.98, Resolution::Six).unwrap();
        let b = HexCell::encode(40.60, -74.15, Resolution::Six).unwrap();
        let regions = vec![
            BoundaryRegion::new("Manhattan", MultiPolygon::new(vec![a.to_polygon()])),
            BoundaryRegion::new("Manhattan", MultiPolygon::new(vec![b.to_polygon()])),
            BoundaryRegion::new(12i64, MultiPolygon::new(vec![b.to_polygon()])),
        ];

        let sets = rasterize_regions(&regions, Resolution::Seven).unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[&RegionId::from("Manhattan")].len(), 2);
        assert_eq!(sets[&RegionId::Code(12)].cells(), &[b]);
    }
}
