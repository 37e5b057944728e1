use geo::prelude::*;
use geo::Point;
use h3o::{CellIndex, LatLng, Resolution};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RiskError};

/// A validated WGS84 position.
///
/// Fields are private so every value in circulation is known to be finite and
/// in range; the H3 form is computed once on construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCoordinate", into = "RawCoordinate")]
pub struct Coordinate {
    lat: f64,
    lon: f64,
    latlng: LatLng,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RawCoordinate {
    lat: f64,
    lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Result<Self> {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(RiskError::invalid(format!("latitude {lat} outside [-90, 90]")));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(RiskError::invalid(format!("longitude {lon} outside [-180, 180]")));
        }
        let latlng = LatLng::new(lat, lon)
            .map_err(|e| RiskError::invalid(format!("invalid coordinate ({lat}, {lon}): {e}")))?;
        Ok(Self { lat, lon, latlng })
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lon(&self) -> f64 {
        self.lon
    }

    fn point(&self) -> Point<f64> {
        Point::new(self.lon, self.lat)
    }

    /// Great-circle distance in meters.
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        self.point().haversine_distance(&other.point())
    }

    /// Point a fraction `t` of the way towards `other` (linear in degrees,
    /// fine for the sub-kilometer legs of a walking polyline).
    pub fn lerp(&self, other: &Coordinate, t: f64) -> Coordinate {
        let t = t.clamp(0.0, 1.0);
        let lat = self.lat + (other.lat - self.lat) * t;
        let lon = self.lon + (other.lon - self.lon) * t;
        // Both endpoints are valid and t is clamped, so the result is too.
        Coordinate::new(lat, lon).unwrap_or(*self)
    }

    /// `[lon, lat]` corner pairs of boxes that together contain every point
    /// within `radius_m`. Used to pre-filter R-tree lookups before the exact
    /// distance check. A circle crossing the antimeridian yields two boxes;
    /// one reaching a pole spans every longitude.
    pub fn bounding_boxes(&self, radius_m: f64) -> Vec<([f64; 2], [f64; 2])> {
        const METERS_PER_DEG_LAT: f64 = 111_320.0;
        let dlat = radius_m / METERS_PER_DEG_LAT;
        let cos_lat = self.lat.to_radians().cos().max(1e-6);
        let dlon = radius_m / (METERS_PER_DEG_LAT * cos_lat);

        let south = self.lat - dlat;
        let north = self.lat + dlat;
        if dlon >= 180.0 || south < -90.0 || north > 90.0 {
            return vec![([-180.0, south.max(-90.0)], [180.0, north.min(90.0)])];
        }

        let (west, east) = (self.lon - dlon, self.lon + dlon);
        let mut boxes = vec![([west.max(-180.0), south], [east.min(180.0), north])];
        if west < -180.0 {
            boxes.push(([west + 360.0, south], [180.0, north]));
        }
        if east > 180.0 {
            boxes.push(([-180.0, south], [east - 360.0, north]));
        }
        boxes
    }

    /// Rounded to `decimals` places, as integers so the result can key a map.
    pub fn coarsen(&self, decimals: u32) -> (i64, i64) {
        let factor = 10f64.powi(decimals as i32);
        ((self.lat * factor).round() as i64, (self.lon * factor).round() as i64)
    }
}

impl TryFrom<RawCoordinate> for Coordinate {
    type Error = RiskError;

    fn try_from(raw: RawCoordinate) -> Result<Self> {
        Coordinate::new(raw.lat, raw.lon)
    }
}

impl From<Coordinate> for RawCoordinate {
    fn from(c: Coordinate) -> Self {
        RawCoordinate { lat: c.lat, lon: c.lon }
    }
}

/// Maps coordinates to hexagonal cells at one fixed resolution.
#[derive(Debug, Clone, Copy)]
pub struct SpatialIndexer {
    resolution: Resolution,
}

impl SpatialIndexer {
    pub fn new(resolution: u8) -> Result<Self> {
        let resolution = Resolution::try_from(resolution)
            .map_err(|e| RiskError::config(format!("invalid H3 resolution {resolution}: {e}")))?;
        Ok(Self { resolution })
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn cell_of(&self, coordinate: &Coordinate) -> CellIndex {
        coordinate.latlng.to_cell(self.resolution)
    }

    /// Hexagon ring of `cell` as `[lon, lat]` pairs (GeoJSON order).
    pub fn boundary_of(&self, cell: CellIndex) -> Vec<[f64; 2]> {
        cell.boundary().iter().map(|ll| [ll.lng(), ll.lat()]).collect()
    }
}
