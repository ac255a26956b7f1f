use std::fmt;

use geo_types::Point;
use serde_json::Value as JsonValue;

use crate::core::is_valid_coordinate;
use crate::error::FareHexError;

/// Records read from a source alongside the per-record failures that were
/// skipped along the way.
#[derive(Debug)]
pub struct SourceResult<T> {
    pub records: Vec<T>,
    pub errors: Vec<FareHexError>,
}

impl<T> SourceResult<T> {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

impl<T> Default for SourceResult<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        is_valid_coordinate(self.lat, self.lon)
    }
}

impl From<GeoPoint> for Point<f64> {
    fn from(p: GeoPoint) -> Self {
        Point::new(p.lon, p.lat)
    }
}

/// Which end of a trip a point belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Pickup,
    Dropoff,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::Pickup, Role::Dropoff];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Pickup => "pickup",
            Role::Dropoff => "dropoff",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Join key of a boundary region, e.g. a borough name or a district number.
///
/// Integer codes sort before names. A string that is the canonical form of an
/// integer is always read as [`RegionId::Code`], so ids survive a round trip
/// through a text column unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegionId {
    Code(i64),
    Name(String),
}

impl RegionId {
    pub fn parse(value: &str) -> Self {
        match value.parse::<i64>() {
            Ok(code) if code.to_string() == value => RegionId::Code(code),
            _ => RegionId::Name(value.to_string()),
        }
    }

    /// Reads a region id from a GeoJSON property value.
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::String(s) => Some(Self::parse(s)),
            JsonValue::Number(n) => match n.as_i64() {
                Some(code) => Some(RegionId::Code(code)),
                None => n.as_f64().map(|f| {
                    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                        RegionId::Code(f as i64)
                    } else {
                        RegionId::Name(n.to_string())
                    }
                }),
            },
            _ => None,
        }
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionId::Code(code) => write!(f, "{code}"),
            RegionId::Name(name) => f.write_str(name),
        }
    }
}

impl From<&str> for RegionId {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<i64> for RegionId {
    fn from(value: i64) -> Self {
        RegionId::Code(value)
    }
}
