//! Airports and runways
//!
//!  Runways are parsed from X-Plane's `apt.dat` and kept in a tiled index that
//!  only holds the area around the current viewpoint.

mod index;
mod parser;

pub use index::{AirportIndex, IndexSnapshot, LoadOutcome};
pub use parser::{AptDatParser, ParseStats};

use serde::Serialize;

use crate::geo::{GeoPoint, LocalFrame};

/// Runway surface, from the apt.dat surface code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SurfaceType {
    Asphalt,
    Concrete,
    Grass,
    Dirt,
    Gravel,
    DryLakebed,
    Water,
    SnowIce,
    Transparent,
    Other(u16),
}

impl SurfaceType {
    pub fn from_code(code: u16) -> Self {
        match code {
            1 | 20..=38 => SurfaceType::Asphalt,
            2 | 50..=57 => SurfaceType::Concrete,
            3 => SurfaceType::Grass,
            4 => SurfaceType::Dirt,
            5 => SurfaceType::Gravel,
            12 => SurfaceType::DryLakebed,
            13 => SurfaceType::Water,
            14 => SurfaceType::SnowIce,
            15 => SurfaceType::Transparent,
            other => SurfaceType::Other(other),
        }
    }
}

/// One end of a runway
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunwayEnd {
    /// Designator painted on this end, e.g. "09L"
    pub designator: String,
    /// Threshold position, altitude is the field elevation in meters
    pub threshold: GeoPoint,
    /// Landing threshold is this far into the runway, meters
    pub displaced: f64,
}

/// A runway with both thresholds. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunwaySegment {
    pub airport: String,
    pub ends: [RunwayEnd; 2],
    pub width: f64,
    pub surface: SurfaceType,
    /// True heading from end 0 towards end 1
    pub heading: f64,
    pub length: f64,
}

impl RunwaySegment {
    pub fn new(airport: &str, ends: [RunwayEnd; 2], width: f64, surface: SurfaceType) -> Self {
        let heading = ends[0].threshold.bearing_to(&ends[1].threshold);
        let length = ends[0].threshold.distance_to(&ends[1].threshold);
        Self {
            airport: airport.to_string(),
            ends,
            width,
            surface,
            heading,
            length,
        }
    }

    /// Both designators, e.g. "09/27"
    pub fn designator(&self) -> String {
        format!("{}/{}", self.ends[0].designator, self.ends[1].designator)
    }

    /// Heading of a landing that touches down at end `i`
    pub fn landing_heading(&self, i: usize) -> f64 {
        self.ends[i].threshold.bearing_to(&self.ends[1 - i].threshold)
    }

    /// Distance from a point to the nearer threshold
    pub fn distance_to(&self, point: &GeoPoint) -> f64 {
        let a = self.ends[0].threshold.distance_to(point);
        let b = self.ends[1].threshold.distance_to(point);
        a.min(b)
    }

    /// Position of a point relative to a landing at end `i`:
    /// (along-track distance past the threshold, lateral offset from the centerline)
    pub fn relative_position(&self, i: usize, point: &GeoPoint) -> (f64, f64) {
        let frame = LocalFrame::new(&self.ends[i].threshold);
        let (east, north) = frame.to_local(point.lat, point.lon);
        let rad = self.landing_heading(i).to_radians();
        let (dir_e, dir_n) = (rad.sin(), rad.cos());
        let along = east * dir_e + north * dir_n;
        let lateral = (east * dir_n - north * dir_e).abs();
        (along, lateral)
    }

    /// Tiles touched by the thresholds; one or two entries
    pub fn tiles(&self) -> Vec<TileKey> {
        let a = TileKey::containing(self.ends[0].threshold.lat, self.ends[0].threshold.lon);
        let b = TileKey::containing(self.ends[1].threshold.lat, self.ends[1].threshold.lon);
        if a == b { vec![a] } else { vec![a, b] }
    }
}

/// A 1x1 degree cell, named by its south-west corner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub lat: i16,
    pub lon: i16,
}

impl TileKey {
    pub fn containing(lat: f64, lon: f64) -> Self {
        let lat = lat.floor().clamp(-90.0, 89.0) as i16;
        let mut lon = lon.floor() as i16;
        if lon >= 180 {
            lon -= 360;
        }
        if lon < -180 {
            lon += 360;
        }
        Self { lat, lon }
    }

    /// All tiles overlapping the bounding box of a circle around a point
    pub fn around(lat: f64, lon: f64, radius: f64) -> Vec<TileKey> {
        const METERS_PER_DEG: f64 = 111_195.0;
        let dlat = radius / METERS_PER_DEG;
        let cos_lat = lat.to_radians().cos().abs().max(0.01);
        let dlon = (radius / (METERS_PER_DEG * cos_lat)).min(180.0);

        let lat_min = (lat - dlat).max(-90.0).floor() as i32;
        let lat_max = (lat + dlat).min(89.999).floor() as i32;
        let lon_min = (lon - dlon).floor() as i32;
        let lon_max = (lon + dlon).floor() as i32;
        let lon_span = (lon_max - lon_min).min(359);

        let mut tiles = Vec::new();
        for la in lat_min..=lat_max {
            for lo in lon_min..=lon_min + lon_span {
                tiles.push(TileKey::containing(la as f64, lo as f64));
            }
        }
        tiles
    }
}
