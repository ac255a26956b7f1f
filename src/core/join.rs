use std::collections::{BTreeMap, HashMap};
use std::ops::AddAssign;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::source::{RegionId, Role};

use super::hex::HexCell;
use super::point::IndexedTrip;
use super::raster::CompactCellSet;

#[derive(Debug, Clone, Copy)]
struct CellEntry {
    region: usize,
    /// Set when the same cell appears in more than one region.
    shared: bool,
}

/// Outcome of resolving one point cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinMatch<'a> {
    pub region: Option<&'a RegionId>,
    /// Another region also matched somewhere on the ancestor chain.
    pub ambiguous: bool,
}

/// Region assigned to one end of a trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointRegionAssignment {
    pub key: String,
    pub role: Role,
    pub region_id: Option<RegionId>,
}

/// Counters for one join run, one unit per point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinStats {
    pub matched: usize,
    pub unmatched: usize,
    pub unindexed: usize,
    pub ambiguous: usize,
}

impl JoinStats {
    pub fn points(&self) -> usize {
        self.matched + self.unmatched + self.unindexed
    }
}

impl AddAssign for JoinStats {
    fn add_assign(&mut self, other: Self) {
        self.matched += other.matched;
        self.unmatched += other.unmatched;
        self.unindexed += other.unindexed;
        self.ambiguous += other.ambiguous;
    }
}

/// Resolves point cells to regions through a single map from every compact
/// cell, at whatever resolution it was compacted to, to its region.
///
/// A lookup walks the point cell's ancestor chain finest first, so each point
/// costs at most one hash lookup per resolution regardless of the number of
/// regions. When regions overlap, the finest matching ancestor wins, and
/// among regions sharing that cell the smallest [`RegionId`] wins.
///
/// The index is read-only once built and can be shared across threads.
#[derive(Debug, Clone, Default)]
pub struct SpatialJoinResolver {
    regions: Vec<RegionId>,
    cells: HashMap<u64, CellEntry>,
    overlapping_cells: usize,
}

impl SpatialJoinResolver {
    pub fn build(sets: &BTreeMap<RegionId, CompactCellSet>) -> Self {
        info!("Building join index for {} regions...", sets.len());

        let capacity = sets.values().map(CompactCellSet::len).sum();
        let mut cells: HashMap<u64, CellEntry> = HashMap::with_capacity(capacity);
        let mut regions = Vec::with_capacity(sets.len());
        let mut overlapping_cells = 0;

        for (index, (region_id, set)) in sets.iter().enumerate() {
            regions.push(region_id.clone());
            for cell in set.iter() {
                cells
                    .entry(cell.to_integer())
                    .and_modify(|entry| {
                        if !entry.shared {
                            overlapping_cells += 1;
                        }
                        entry.shared = true;
                    })
                    .or_insert(CellEntry {
                        region: index,
                        shared: false,
                    });
            }
        }

        if overlapping_cells > 0 {
            warn!(
                "{} cells belong to more than one region; the first region in id order is kept",
                overlapping_cells
            );
        }
        info!("Join index built with {} cells", cells.len());

        Self {
            regions,
            cells,
            overlapping_cells,
        }
    }

    pub fn regions(&self) -> &[RegionId] {
        &self.regions
    }

    /// Number of indexed cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn overlapping_cells(&self) -> usize {
        self.overlapping_cells
    }

    fn lookup(&self, cell: HexCell) -> Option<&CellEntry> {
        self.cells.get(&cell.to_integer())
    }

    /// Returns the region containing `cell`, if any.
    pub fn resolve(&self, cell: HexCell) -> Option<&RegionId> {
        cell.ancestors()
            .find_map(|ancestor| self.lookup(ancestor))
            .map(|entry| &self.regions[entry.region])
    }

    /// Like [`resolve`](Self::resolve), but keeps walking the whole chain to
    /// report whether another region also matched.
    pub fn resolve_detailed(&self, cell: HexCell) -> JoinMatch<'_> {
        let mut winner: Option<usize> = None;
        let mut ambiguous = false;

        for entry in cell.ancestors().filter_map(|ancestor| self.lookup(ancestor)) {
            match winner {
                None => {
                    winner = Some(entry.region);
                    ambiguous |= entry.shared;
                }
                Some(region) if region != entry.region => ambiguous = true,
                Some(_) => {}
            }
        }

        JoinMatch {
            region: winner.map(|index| &self.regions[index]),
            ambiguous,
        }
    }

    fn assign_trip(&self, trip: &IndexedTrip) -> (Vec<PointRegionAssignment>, JoinStats) {
        let mut stats = JoinStats::default();
        let rows = Role::ALL
            .iter()
            .map(|&role| {
                let region_id = match trip.cell(role) {
                    None => {
                        stats.unindexed += 1;
                        None
                    }
                    Some(cell) => {
                        let found = self.resolve_detailed(cell);
                        if found.ambiguous {
                            stats.ambiguous += 1;
                            debug!("{} {} ({}) matches more than one region", trip.key, role, cell);
                        }
                        match found.region {
                            Some(_) => stats.matched += 1,
                            None => stats.unmatched += 1,
                        }
                        found.region.cloned()
                    }
                };
                PointRegionAssignment {
                    key: trip.key.clone(),
                    role,
                    region_id,
                }
            })
            .collect();
        (rows, stats)
    }

    /// Assigns a region to both ends of every trip.
    ///
    /// Every trip yields exactly one row per role, in input order. Points
    /// that were not indexed or fall outside every region get `None`.
    pub fn assign(&self, trips: &[IndexedTrip]) -> (Vec<PointRegionAssignment>, JoinStats) {
        let per_trip: Vec<(Vec<PointRegionAssignment>, JoinStats)> =
            trips.par_iter().map(|trip| self.assign_trip(trip)).collect();

        let mut stats = JoinStats::default();
        let mut rows = Vec::with_capacity(trips.len() * Role::ALL.len());
        for (trip_rows, trip_stats) in per_trip {
            rows.extend(trip_rows);
            stats += trip_stats;
        }
        (rows, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{POINT_RESOLUTION, index_point, rasterize};
    use crate::source::GeoPoint;
    use geo_types::{Coord, LineString, MultiPolygon, Polygon};
    use h3o::Resolution;

    /// Nested-loop reference: ancestors finest first, regions in id order.
    fn resolve_by_scan(cell: HexCell, sets: &BTreeMap<RegionId, CompactCellSet>) -> Option<RegionId> {
        cell.ancestors().find_map(|ancestor| {
            sets.iter()
                .find(|(_, set)| set.contains(ancestor))
                .map(|(id, _)| id.clone())
        })
    }

    fn rectangle_around(lat: f64, lon: f64, half_size: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![Polygon::new(
            LineString::new(vec![
                Coord { x: lon - half_size, y: lat - half_size },
                Coord { x: lon + half_size, y: lat - half_size },
                Coord { x: lon + half_size, y: lat + half_size },
                Coord { x: lon - half_size, y: lat + half_size },
                Coord { x: lon - half_size, y: lat - half_size },
            ]),
            vec![],
        )])
    }

    fn boroughs() -> BTreeMap<RegionId, CompactCellSet> {
        let mut sets = BTreeMap::new();
        sets.insert(
            RegionId::from("Manhattan"),
            rasterize(&rectangle_around(40.78, -73.97, 0.01), Resolution::Eleven).unwrap(),
        );
        sets.insert(
            RegionId::from("Brooklyn"),
            rasterize(&rectangle_around(40.65, -73.95, 0.01), Resolution::Eleven).unwrap(),
        );
        sets
    }

    #[test]
    fn test_single_cell_region_resolves_center_point() {
        let cell = HexCell::encode(40.7831, -73.9712, Resolution::Eleven).unwrap();
        let (lat, lon) = cell.center();

        let set = rasterize(&rectangle_around(lat, lon, 0.0001), Resolution::Eleven).unwrap();
        assert_eq!(set.cells(), &[cell]);

        let mut sets = BTreeMap::new();
        sets.insert(RegionId::from("Manhattan"), set);
        let resolver = SpatialJoinResolver::build(&sets);

        let point = index_point(&GeoPoint::new(lat, lon), POINT_RESOLUTION).unwrap();
        assert_eq!(resolver.resolve(point), Some(&RegionId::from("Manhattan")));
    }

    #[test]
    fn test_point_outside_all_regions_is_unmatched() {
        let resolver = SpatialJoinResolver::build(&boroughs());
        let point = index_point(&GeoPoint::new(51.5074, -0.1278), POINT_RESOLUTION).unwrap();

        assert_eq!(resolver.resolve(point), None);
        let found = resolver.resolve_detailed(point);
        assert_eq!(found.region, None);
        assert!(!found.ambiguous);
    }

    #[test]
    fn test_ancestor_in_set_resolves_to_region() {
        let sets = boroughs();
        let resolver = SpatialJoinResolver::build(&sets);

        for (region_id, set) in &sets {
            for cell in set.iter().take(25) {
                let (lat, lon) = cell.center();
                let point = index_point(&GeoPoint::new(lat, lon), POINT_RESOLUTION).unwrap();
                if set.covers(point) {
                    assert_eq!(resolver.resolve(point), Some(region_id));
                }
            }
        }
    }

    #[test]
    fn test_indexed_join_agrees_with_scan() {
        let sets = boroughs();
        let resolver = SpatialJoinResolver::build(&sets);

        for i in 0..40 {
            let lat = 40.63 + i as f64 * 0.004;
            let lon = -73.98 + i as f64 * 0.0007;
            let point = index_point(&GeoPoint::new(lat, lon), POINT_RESOLUTION).unwrap();
            assert_eq!(resolver.resolve(point).cloned(), resolve_by_scan(point, &sets));
        }
    }

    #[test]
    fn test_shared_cell_goes_to_smallest_region_id() {
        let cell = HexCell::encode(40.75, -73.98, Resolution::Eleven).unwrap();
        let mut sets = BTreeMap::new();
        sets.insert(RegionId::Code(65), CompactCellSet::from_cells([cell]));
        sets.insert(RegionId::Code(7), CompactCellSet::from_cells([cell]));

        let resolver = SpatialJoinResolver::build(&sets);
        assert_eq!(resolver.overlapping_cells(), 1);

        let point = index_point(&GeoPoint::new(40.75, -73.98), POINT_RESOLUTION).unwrap();
        let found = resolver.resolve_detailed(point);
        assert_eq!(found.region, Some(&RegionId::Code(7)));
        assert!(found.ambiguous);
    }

    #[test]
    fn test_finest_ancestor_wins_across_resolutions() {
        let point = index_point(&GeoPoint::new(40.75, -73.98), POINT_RESOLUTION).unwrap();
        let fine = point.parent(Resolution::Eleven).unwrap();
        let coarse = point.parent(Resolution::Nine).unwrap();

        let mut sets = BTreeMap::new();
        sets.insert(RegionId::from("A"), CompactCellSet::from_cells([coarse]));
        sets.insert(RegionId::from("B"), CompactCellSet::from_cells([fine]));

        let resolver = SpatialJoinResolver::build(&sets);
        assert_eq!(resolver.overlapping_cells(), 0);

        let found = resolver.resolve_detailed(point);
        assert_eq!(found.region, Some(&RegionId::from("B")));
        assert!(found.ambiguous);
        assert_eq!(resolver.resolve(point), Some(&RegionId::from("B")));
    }

    #[test]
    fn test_assign_emits_one_row_per_role() {
        let resolver = SpatialJoinResolver::build(&boroughs());
        let inside = index_point(&GeoPoint::new(40.78, -73.97), POINT_RESOLUTION);
        let outside = index_point(&GeoPoint::new(51.5074, -0.1278), POINT_RESOLUTION);

        let trips = vec![
            IndexedTrip {
                key: "a".into(),
                pickup: inside,
                dropoff: outside,
            },
            IndexedTrip {
                key: "b".into(),
                pickup: None,
                dropoff: None,
            },
        ];

        let (rows, stats) = resolver.assign(&trips);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].key, "a");
        assert_eq!(rows[0].role, Role::Pickup);
        assert_eq!(rows[0].region_id, Some(RegionId::from("Manhattan")));
        assert_eq!(rows[1].role, Role::Dropoff);
        assert_eq!(rows[1].region_id, None);
        assert!(rows[2..].iter().all(|r| r.key == "b" && r.region_id.is_none()));

        assert_eq!(
            stats,
            JoinStats {
                matched: 1,
                unmatched: 1,
                unindexed: 2,
                ambiguous: 0,
            }
        );
        assert_eq!(stats.points(), 4);
    }

    #[test]
    fn test_assign_counts_ambiguous_points_once() {
        // Two districts drawn over the same block; the pickup lies in both.
        let mut sets = BTreeMap::new();
        sets.insert(
            RegionId::Code(65),
            rasterize(&rectangle_around(40.78, -73.97, 0.01), Resolution::Eleven).unwrap(),
        );
        sets.insert(
            RegionId::Code(73),
            rasterize(&rectangle_around(40.78, -73.97, 0.005), Resolution::Eleven).unwrap(),
        );
        let resolver = SpatialJoinResolver::build(&sets);
        assert!(resolver.overlapping_cells() > 0);

        let shared = index_point(&GeoPoint::new(40.78, -73.97), POINT_RESOLUTION);
        let only_outer = index_point(&GeoPoint::new(40.788, -73.962), POINT_RESOLUTION);
        let trips = vec![IndexedTrip {
            key: "a".into(),
            pickup: shared,
            dropoff: only_outer,
        }];

        let (rows, stats) = resolver.assign(&trips);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.iter().filter(|r| r.role == Role::Pickup).count(), 1);
        assert_eq!(rows.iter().filter(|r| r.role == Role::Dropoff).count(), 1);
        assert_eq!(rows[0].region_id.as_ref(), shared.and_then(|c| resolver.resolve(c)));
        assert!(rows[0].region_id.is_some());
        assert_eq!(rows[1].region_id, Some(RegionId::Code(65)));

        assert_eq!(
            stats,
            JoinStats {
                matched: 2,
                unmatched: 0,
                unindexed: 0,
                ambiguous: 1,
            }
        );
    }

    #[test]
    fn test_empty_index_resolves_nothing() {
        let resolver = SpatialJoinResolver::build(&BTreeMap::new());
        assert!(resolver.is_empty());

        let point = index_point(&GeoPoint::new(40.75, -73.98), POINT_RESOLUTION).unwrap();
        assert_eq!(resolver.resolve(point), None);
    }
}
