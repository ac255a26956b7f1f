use std::path::PathBuf;

use geo_types::MultiPolygon;
use geojson::{Feature, GeoJson};

use crate::core::FromGeoJson;
use crate::error::FareHexError;

use super::traits::BoundarySource;
use super::types::RegionId;

/// A named boundary region in WGS84 (EPSG:4326) coordinates.
///
/// # Fields
///
/// * `region_id` - Join key read from the configured feature property
/// * `geometry` - One or more disjoint polygons in (lon, lat) order
#[derive(Debug, Clone)]
pub struct BoundaryRegion {
    pub region_id: RegionId,
    pub geometry: MultiPolygon<f64>,
}

impl BoundaryRegion {
    pub fn new(region_id: impl Into<RegionId>, geometry: MultiPolygon<f64>) -> Self {
        Self {
            region_id: region_id.into(),
            geometry,
        }
    }

    /// Builds a region from a GeoJSON feature, reading the id from
    /// `region_field`.
    ///
    /// # Errors
    ///
    /// Returns [`FareHexError::Geometry`] if the feature has no geometry, the
    /// geometry is not a (multi-)polygon, or the id property is missing.
    pub fn from_feature(feature: &Feature, region_field: &str) -> Result<Self, FareHexError> {
        let region_id = feature
            .property(region_field)
            .and_then(RegionId::from_json)
            .ok_or_else(|| {
                FareHexError::Geometry(format!("Feature has no usable '{region_field}' property"))
            })?;

        let geometry = feature.geometry.as_ref().ok_or_else(|| {
            FareHexError::Geometry(format!("Feature {region_id} has no geometry"))
        })?;

        Ok(Self {
            region_id,
            geometry: MultiPolygon::from_geojson(geometry)?,
        })
    }
}

/// Parses every feature of a GeoJSON document into boundary regions.
pub fn parse_boundary_regions(
    content: &str,
    region_field: &str,
) -> Result<Vec<BoundaryRegion>, FareHexError> {
    let geojson: GeoJson = content
        .parse()
        .map_err(|e: geojson::Error| FareHexError::Geometry(e.to_string()))?;

    let features = match geojson {
        GeoJson::FeatureCollection(collection) => collection.features,
        GeoJson::Feature(feature) => vec![feature],
        GeoJson::Geometry(_) => {
            return Err(FareHexError::Geometry(
                "Bare geometry has no region properties".to_string(),
            ));
        }
    };

    features
        .iter()
        .map(|feature| BoundaryRegion::from_feature(feature, region_field))
        .collect()
}

/// A GeoJSON file of boundary features, e.g. the borough shoreline dataset.
#[derive(Debug, Clone)]
pub struct GeoJsonBoundaryFile {
    path: PathBuf,
    region_field: String,
}

impl GeoJsonBoundaryFile {
    pub fn new(path: impl Into<PathBuf>, region_field: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            region_field: region_field.into(),
        }
    }
}

impl BoundarySource for GeoJsonBoundaryFile {
    fn read_regions(&self) -> Result<Vec<BoundaryRegion>, FareHexError> {
        let content = std::fs::read_to_string(&self.path)?;
        parse_boundary_regions(&content, &self.region_field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOROUGHS: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": {"BoroName": "Manhattan", "BoroCode": 1},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[-74.0, 40.7], [-73.9, 40.7], [-73.9, 40.8], [-74.0, 40.8], [-74.0, 40.7]]]
                }
            },
            {
                "type": "Feature",
                "properties": {"BoroName": "Staten Island", "BoroCode": 5},
                "geometry": {
                    "type": "MultiPolygon",
                    "coordinates": [
                        [[[-74.2, 40.5], [-74.1, 40.5], [-74.1, 40.6], [-74.2, 40.5]]],
                        [[[-74.3, 40.5], [-74.25, 40.5], [-74.25, 40.55], [-74.3, 40.5]]]
                    ]
                }
            }
        ]
    }"#;

    #[test]
    fn test_parse_feature_collection_by_name() {
        let regions = parse_boundary_regions(BOROUGHS, "BoroName").unwrap();

        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].region_id, RegionId::Name("Manhattan".into()));
        assert_eq!(regions[0].geometry.0.len(), 1);
        assert_eq!(regions[1].geometry.0.len(), 2);
    }

    #[test]
    fn test_parse_feature_collection_by_code() {
        let regions = parse_boundary_regions(BOROUGHS, "BoroCode").unwrap();
        assert_eq!(regions[1].region_id, RegionId::Code(5));
    }

    #[test]
    fn test_missing_region_field_is_an_error() {
        let err = parse_boundary_regions(BOROUGHS, "AssemDist").unwrap_err();
        assert!(matches!(err, FareHexError::Geometry(_)));
    }

    #[test]
    fn test_rejects_bare_geometry() {
        let geometry = r#"{"type": "Point", "coordinates": [0.0, 0.0]}"#;
        assert!(parse_boundary_regions(geometry, "BoroName").is_err());
    }

    #[test]
    fn test_read_regions_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("borough_water.geojson");
        std::fs::write(&path, BOROUGHS).unwrap();

        let regions = GeoJsonBoundaryFile::new(&path, "BoroName")
            .read_regions()
            .unwrap();
        assert_eq!(regions.len(), 2);
    }
}
