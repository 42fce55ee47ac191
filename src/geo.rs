//! Geodesy helpers
//!
//!  Short-range math used by interpolation and runway matching. Positions are
//!  projected onto a local tangent plane (east/north meters) around an origin,
//!  which is accurate enough for the few kilometers an aircraft covers between
//!  two reports.

use serde::{Deserialize, Serialize};

/// Mean earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Meters per nautical mile
pub const METERS_PER_NM: f64 = 1852.0;

/// Meters per foot
pub const METERS_PER_FOOT: f64 = 0.3048;

/// A geographic position with altitude (meters MSL)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64, alt: f64) -> Self {
        Self { lat, lon, alt }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite() && self.alt.is_finite()
    }

    /// Great-circle distance to another point, ignoring altitude
    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        distance_m(self.lat, self.lon, other.lat, other.lon)
    }

    /// Initial bearing towards another point
    pub fn bearing_to(&self, other: &GeoPoint) -> f64 {
        bearing_deg(self.lat, self.lon, other.lat, other.lon)
    }

    /// Move `distance` meters along `heading` on the local plane
    pub fn offset(&self, heading: f64, distance: f64) -> GeoPoint {
        let frame = LocalFrame::new(self);
        let rad = heading.to_radians();
        let (lat, lon) = frame.to_geo(distance * rad.sin(), distance * rad.cos());
        GeoPoint::new(lat, lon, self.alt)
    }
}

/// East/north tangent plane anchored at an origin
#[derive(Debug, Clone, Copy)]
pub struct LocalFrame {
    lat0: f64,
    lon0: f64,
    cos_lat0: f64,
}

impl LocalFrame {
    pub fn new(origin: &GeoPoint) -> Self {
        Self {
            lat0: origin.lat,
            lon0: origin.lon,
            cos_lat0: origin.lat.to_radians().cos().max(1e-6),
        }
    }

    /// Project lat/lon into (east, north) meters
    pub fn to_local(&self, lat: f64, lon: f64) -> (f64, f64) {
        let dlon = wrap_lon(lon - self.lon0);
        let east = dlon.to_radians() * EARTH_RADIUS_M * self.cos_lat0;
        let north = (lat - self.lat0).to_radians() * EARTH_RADIUS_M;
        (east, north)
    }

    /// Inverse of `to_local`
    pub fn to_geo(&self, east: f64, north: f64) -> (f64, f64) {
        let lat = self.lat0 + (north / EARTH_RADIUS_M).to_degrees();
        let lon = self.lon0 + (east / (EARTH_RADIUS_M * self.cos_lat0)).to_degrees();
        (lat.clamp(-90.0, 90.0), wrap_lon(lon))
    }
}

/// Calculate distance (meters) between two lat/lon points
/// Uses the Haversine formula
pub fn distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().min(1.0).asin();
    EARTH_RADIUS_M * c
}

/// Initial bearing (degrees, 0-360) from point 1 to point 2
pub fn bearing_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let y = delta_lon.sin() * lat2_rad.cos();
    let x = lat1_rad.cos() * lat2_rad.sin() - lat1_rad.sin() * lat2_rad.cos() * delta_lon.cos();
    normalize_heading(y.atan2(x).to_degrees())
}

/// Bring any angle into [0, 360)
pub fn normalize_heading(deg: f64) -> f64 {
    let h = deg.rem_euclid(360.0);
    if h >= 360.0 { 0.0 } else { h }
}

/// Absolute difference between two headings, wrapped to [0, 180]
pub fn heading_diff(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(360.0);
    if d > 180.0 { 360.0 - d } else { d }
}

/// Interpolate headings along the shortest arc
pub fn lerp_heading(from: f64, to: f64, f: f64) -> f64 {
    let mut delta = (to - from).rem_euclid(360.0);
    if delta > 180.0 {
        delta -= 360.0;
    }
    normalize_heading(from + delta * f)
}

pub fn lerp(a: f64, b: f64, f: f64) -> f64 {
    a + (b - a) * f
}

fn wrap_lon(lon: f64) -> f64 {
    let l = (lon + 180.0).rem_euclid(360.0) - 180.0;
    if l < -180.0 { l + 360.0 } else { l }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heading_diff_wraps() {
        assert_eq!(heading_diff(10.0, 350.0), 20.0);
        assert_eq!(heading_diff(90.0, 270.0), 180.0);
        assert_eq!(heading_diff(88.0, 90.0), 2.0);
        assert_eq!(heading_diff(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_lerp_heading_shortest_arc() {
        assert!((lerp_heading(350.0, 10.0, 0.5) - 0.0).abs() < 1e-9);
        assert!((lerp_heading(10.0, 350.0, 0.25) - 5.0).abs() < 1e-9);
        assert!((lerp_heading(90.0, 180.0, 0.5) - 135.0).abs() < 1e-9);
    }

    #[test]
    fn test_local_frame_roundtrip_and_scale() {
        let origin = GeoPoint::new(47.0, 8.0, 0.0);
        let frame = LocalFrame::new(&origin);
        let (e, n) = frame.to_local(47.01, 8.0);
        assert!(e.abs() < 1e-6);
        assert!((n - 1111.95).abs() < 1.0);

        let (lat, lon) = frame.to_geo(500.0, -300.0);
        let (e2, n2) = frame.to_local(lat, lon);
        assert!((e2 - 500.0).abs() < 1e-6);
        assert!((n2 + 300.0).abs() < 1e-6);
    }

    #[test]
    fn test_offset_matches_distance_and_bearing() {
        let p = GeoPoint::new(50.0, 10.0, 100.0);
        let q = p.offset(90.0, 3704.0);
        assert!((p.distance_to(&q) - 3704.0).abs() < 2.0);
        assert!(heading_diff(p.bearing_to(&q), 90.0) < 0.1);
        assert_eq!(q.alt, 100.0);
    }

    #[test]
    fn test_distance_known_value() {
        // One degree of latitude
        let d = distance_m(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111_195.0).abs() < 10.0);
    }
}
