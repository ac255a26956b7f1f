use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use geo_types::{Coord, LineString, Polygon};
use h3o::{CellIndex, LatLng, Resolution};

use crate::error::FareHexError;

/// Finest resolution of the grid.
pub const MAX_RESOLUTION: u8 = 15;

/// Returns true when the coordinate is finite and strictly inside
/// (-90, 90) x (-180, 180).
pub fn is_valid_coordinate(lat: f64, lon: f64) -> bool {
    lat.is_finite()
        && lon.is_finite()
        && lat > -90.0
        && lat < 90.0
        && lon > -180.0
        && lon < 180.0
}

/// Parses a configured resolution level.
pub fn parse_resolution(value: u8) -> Result<Resolution, FareHexError> {
    Resolution::try_from(value).map_err(|e| {
        FareHexError::InvalidResolution(format!(
            "{value} is not in 0..={MAX_RESOLUTION}: {e}"
        ))
    })
}

/// A hexagonal (or pentagonal) H3 cell.
///
/// The canonical string token is the lowercase hexadecimal form of the
/// 64-bit index, e.g. `8b2a100d2c95fff`. Ordering follows the integer form so
/// that sorted cell sets are reproducible across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HexCell(CellIndex);

impl HexCell {
    /// Returns the cell covering `(lat, lon)` at `resolution`.
    ///
    /// # Errors
    ///
    /// Returns [`FareHexError::InvalidCoordinate`] if the coordinate is
    /// non-finite or on/outside the latitude and longitude bounds.
    pub fn encode(lat: f64, lon: f64, resolution: Resolution) -> Result<Self, FareHexError> {
        if !is_valid_coordinate(lat, lon) {
            return Err(FareHexError::InvalidCoordinate { lat, lon });
        }
        let ll = LatLng::new(lat, lon).map_err(|_| FareHexError::InvalidCoordinate { lat, lon })?;
        Ok(Self(ll.to_cell(resolution)))
    }

    /// Decodes a cell from its 64-bit integer form.
    pub fn from_integer(value: u64) -> Result<Self, FareHexError> {
        CellIndex::try_from(value)
            .map(Self)
            .map_err(|e| FareHexError::InvalidEncoding(format!("{value:#x}: {e}")))
    }

    pub fn to_integer(self) -> u64 {
        u64::from(self.0)
    }

    pub fn resolution(self) -> Resolution {
        self.0.resolution()
    }

    /// Returns the ancestor of this cell at `resolution`.
    ///
    /// # Errors
    ///
    /// Returns [`FareHexError::InvalidResolution`] if `resolution` is finer
    /// than the cell's own resolution.
    pub fn parent(self, resolution: Resolution) -> Result<Self, FareHexError> {
        self.0.parent(resolution).map(Self).ok_or_else(|| {
            FareHexError::InvalidResolution(format!(
                "cannot take parent at resolution {} of {} (resolution {})",
                u8::from(resolution),
                self,
                u8::from(self.resolution())
            ))
        })
    }

    /// Iterates over the cell itself and every ancestor down to resolution 0,
    /// finest first.
    pub fn ancestors(self) -> impl Iterator<Item = HexCell> {
        let cell = self.0;
        let finest = u8::from(cell.resolution());
        (0..=finest).rev().filter_map(move |r| {
            Resolution::try_from(r)
                .ok()
                .and_then(|res| cell.parent(res))
                .map(HexCell)
        })
    }

    /// True if `other` is this cell or one of its descendants.
    pub fn contains(self, other: HexCell) -> bool {
        other.0.parent(self.resolution()) == Some(self.0)
    }

    /// Cell centre as `(lat, lon)` in degrees.
    pub fn center(self) -> (f64, f64) {
        let ll = LatLng::from(self.0);
        (ll.lat(), ll.lng())
    }

    /// Cell outline as a closed polygon in (lon, lat) order.
    pub fn to_polygon(self) -> Polygon<f64> {
        let coords: Vec<Coord<f64>> = self
            .0
            .boundary()
            .iter()
            .map(|ll| Coord {
                x: ll.lng(),
                y: ll.lat(),
            })
            .collect();
        Polygon::new(LineString::new(coords), vec![])
    }
}

impl Ord for HexCell {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_integer().cmp(&other.to_integer())
    }
}

impl PartialOrd for HexCell {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for HexCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.to_integer())
    }
}

impl FromStr for HexCell {
    type Err = FareHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = u64::from_str_radix(s.trim(), 16)
            .map_err(|e| FareHexError::InvalidEncoding(format!("{s:?}: {e}")))?;
        Self::from_integer(value)
    }
}

impl From<HexCell> for u64 {
    fn from(cell: HexCell) -> Self {
        cell.to_integer()
    }
}

impl From<CellIndex> for HexCell {
    fn from(index: CellIndex) -> Self {
        Self(index)
    }
}

impl From<HexCell> for CellIndex {
    fn from(cell: HexCell) -> Self {
        cell.0
    }
}

impl TryFrom<u64> for HexCell {
    type Error = FareHexError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::from_integer(value)
    }
}
