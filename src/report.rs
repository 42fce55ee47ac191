//! Position reports delivered by the external feeds

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::ReportError;
use crate::geo::{GeoPoint, normalize_heading};

/// UTC time in milliseconds since the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Latest accepted report time, 9999-12-31T23:59:59.999Z
    pub const MAX_VALID: Timestamp = Timestamp(253_402_300_799_999);

    pub fn now() -> Self {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Timestamp(ms)
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Timestamp((secs * 1000.0).round() as i64)
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1000.0
    }

    /// Seconds elapsed from `earlier` to `self` (negative if `earlier` is later)
    pub fn secs_since(self, earlier: Timestamp) -> f64 {
        self.0.saturating_sub(earlier.0) as f64 / 1000.0
    }

    pub fn add_secs(self, secs: f64) -> Self {
        Timestamp(self.0.saturating_add((secs * 1000.0).round() as i64))
    }

    /// Between the Unix epoch and the end of year 9999
    pub fn is_valid(self) -> bool {
        (0..=Self::MAX_VALID.0).contains(&self.0)
    }
}

/// Quality of the channel a report came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedQuality {
    /// Position broadcast by the aircraft itself (ADS-B, FLARM)
    #[default]
    Surveyed,
    /// Derived by the network (MLAT, radar)
    Estimated,
    /// Low-rate or delayed sources
    Coarse,
}

impl FeedQuality {
    /// Multiplier applied to the confidence of samples derived from this report
    pub fn confidence_factor(self) -> f64 {
        match self {
            FeedQuality::Surveyed => 1.0,
            FeedQuality::Estimated => 0.8,
            FeedQuality::Coarse => 0.5,
        }
    }
}

/// One observation of an aircraft. Altitude in meters MSL, speeds in m/s.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionReport {
    pub id: String,
    pub timestamp: Timestamp,
    pub lat: f64,
    pub lon: f64,
    pub altitude: f64,
    pub heading: f64,
    pub ground_speed: f64,
    pub vertical_speed: f64,
    pub quality: FeedQuality,
}

impl PositionReport {
    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon, self.altitude)
    }

    /// Check ranges and normalise the heading. Consumes the report so an
    /// invalid one never reaches the store.
    pub fn validated(mut self) -> Result<Self, ReportError> {
        if self.id.trim().is_empty() {
            return Err(ReportError::EmptyId);
        }
        if !self.timestamp.is_valid() {
            return Err(ReportError::Timestamp(self.timestamp.0));
        }
        for (name, v) in [
            ("lat", self.lat),
            ("lon", self.lon),
            ("altitude", self.altitude),
            ("heading", self.heading),
            ("ground_speed", self.ground_speed),
            ("vertical_speed", self.vertical_speed),
        ] {
            if !v.is_finite() {
                return Err(ReportError::NonFinite(name));
            }
        }
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(ReportError::Latitude(self.lat));
        }
        if !(-180.0..=180.0).contains(&self.lon) {
            return Err(ReportError::Longitude(self.lon));
        }
        if self.ground_speed < 0.0 {
            return Err(ReportError::NegativeSpeed(self.ground_speed));
        }
        self.heading = normalize_heading(self.heading);
        Ok(self)
    }
}

/// Wire form of a report as read from JSON lines (`ts` in seconds)
#[derive(Debug, Clone, Deserialize)]
pub struct FeedRecord {
    pub id: String,
    pub ts: f64,
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    #[serde(default)]
    pub hdg: f64,
    #[serde(default)]
    pub gs: f64,
    #[serde(default)]
    pub vs: f64,
    #[serde(default)]
    pub quality: FeedQuality,
}

impl From<FeedRecord> for PositionReport {
    fn from(r: FeedRecord) -> Self {
        PositionReport {
            id: r.id,
            timestamp: Timestamp::from_secs_f64(r.ts),
            lat: r.lat,
            lon: r.lon,
            altitude: r.alt,
            heading: r.hdg,
            ground_speed: r.gs,
            vertical_speed: r.vs,
            quality: r.quality,
        }
    }
}
