use geo_types::{Coord, LineString, MultiPolygon, Polygon};
use geojson::{Geometry as GeoJsonGeometry, Value as GeoJsonValue};

use crate::error::FareHexError;

// =============================================================================
// FromGeoJson Trait - Convert GeoJSON to geo_types
// =============================================================================

/// Trait for parsing GeoJSON geometries into geo_types.
pub trait FromGeoJson: Sized {
    /// The GeoJSON value types this type can be parsed from.
    fn from_geojson(geometry: &GeoJsonGeometry) -> Result<Self, FareHexError>;
}

impl FromGeoJson for Polygon<f64> {
    fn from_geojson(geometry: &GeoJsonGeometry) -> Result<Self, FareHexError> {
        match &geometry.value {
            GeoJsonValue::Polygon(rings) => rings_to_polygon(rings),
            other => Err(FareHexError::Geometry(format!(
                "Expected Polygon, got {:?}",
                other
            ))),
        }
    }
}

impl FromGeoJson for MultiPolygon<f64> {
    fn from_geojson(geometry: &GeoJsonGeometry) -> Result<Self, FareHexError> {
        match &geometry.value {
            GeoJsonValue::Polygon(rings) => {
                let polygon = rings_to_polygon(rings)?;
                Ok(MultiPolygon::new(vec![polygon]))
            }
            GeoJsonValue::MultiPolygon(polygons) => {
                let mut result = Vec::with_capacity(polygons.len());
                for rings in polygons {
                    result.push(rings_to_polygon(rings)?);
                }
                Ok(MultiPolygon::new(result))
            }
            other => Err(FareHexError::Geometry(format!(
                "Expected Polygon or MultiPolygon, got {:?}",
                other
            ))),
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Converts a GeoJSON position array to a ring, dropping positions with fewer
/// than two ordinates.
fn coords_to_ring(coords: &[Vec<f64>]) -> LineString<f64> {
    let points: Vec<Coord<f64>> = coords
        .iter()
        .filter_map(|c| {
            if c.len() >= 2 {
                Some(Coord { x: c[0], y: c[1] })
            } else {
                None
            }
        })
        .collect();
    LineString::new(points)
}

/// Converts GeoJSON polygon rings to a geo_types Polygon.
fn rings_to_polygon(rings: &[Vec<Vec<f64>>]) -> Result<Polygon<f64>, FareHexError> {
    if rings.is_empty() {
        return Err(FareHexError::Geometry("No rings in polygon".to_string()));
    }

    let exterior = coords_to_ring(&rings[0]);
    if exterior.0.len() < 3 {
        return Err(FareHexError::Geometry(format!(
            "Exterior ring needs at least 3 positions, got {}",
            exterior.0.len()
        )));
    }

    let holes: Vec<LineString<f64>> = rings[1..]
        .iter()
        .map(|ring| coords_to_ring(ring))
        .filter(|ls| !ls.0.is_empty())
        .collect();

    Ok(Polygon::new(exterior, holes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x: f64, y: f64) -> Vec<Vec<f64>> {
        vec![
            vec![x, y],
            vec![x + 1.0, y],
            vec![x + 1.0, y + 1.0],
            vec![x, y + 1.0],
            vec![x, y],
        ]
    }

    #[test]
    fn test_polygon_from_geojson() {
        let geom = GeoJsonGeometry::new(GeoJsonValue::Polygon(vec![square(0.0, 0.0)]));

        let poly = Polygon::from_geojson(&geom).unwrap();
        assert_eq!(poly.exterior().0.len(), 5);
        assert!(poly.interiors().is_empty());
    }

    #[test]
    fn test_polygon_keeps_lon_lat_order() {
        let geom = GeoJsonGeometry::new(GeoJsonValue::Polygon(vec![square(-74.0, 40.0)]));

        let poly = Polygon::from_geojson(&geom).unwrap();
        assert_eq!(poly.exterior().0[0], Coord { x: -74.0, y: 40.0 });
    }

    #[test]
    fn test_multipolygon_from_polygon_geojson() {
        let geom = GeoJsonGeometry::new(GeoJsonValue::Polygon(vec![square(0.0, 0.0)]));

        let mp = MultiPolygon::from_geojson(&geom).unwrap();
        assert_eq!(mp.0.len(), 1);
    }

    #[test]
    fn test_multipolygon_from_multipolygon_geojson() {
        let geom = GeoJsonGeometry::new(GeoJsonValue::MultiPolygon(vec![
            vec![square(0.0, 0.0)],
            vec![square(2.0, 2.0)],
        ]));

        let mp = MultiPolygon::from_geojson(&geom).unwrap();
        assert_eq!(mp.0.len(), 2);
    }

    #[test]
    fn test_polygon_hole_is_parsed() {
        let hole = vec![
            vec![0.2, 0.2],
            vec![0.8, 0.2],
            vec![0.8, 0.8],
            vec![0.2, 0.2],
        ];
        let geom = GeoJsonGeometry::new(GeoJsonValue::Polygon(vec![square(0.0, 0.0), hole]));

        let poly = Polygon::from_geojson(&geom).unwrap();
        assert_eq!(poly.interiors().len(), 1);
        assert_eq!(poly.interiors()[0].0.len(), 4);
    }

    #[test]
    fn test_rejects_degenerate_ring() {
        let geom = GeoJsonGeometry::new(GeoJsonValue::Polygon(vec![vec![
            vec![0.0, 0.0],
            vec![1.0],
        ]]));
        assert!(Polygon::from_geojson(&geom).is_err());

        let empty = GeoJsonGeometry::new(GeoJsonValue::Polygon(vec![]));
        assert!(MultiPolygon::from_geojson(&empty).is_err());
    }

    #[test]
    fn test_rejects_point_geometry() {
        let geom = GeoJsonGeometry::new(GeoJsonValue::Point(vec![0.0, 0.0]));

        assert!(Polygon::from_geojson(&geom).is_err());
        assert!(MultiPolygon::from_geojson(&geom).is_err());
    }
}
