//! Runway matching for auto-landing
//!
//!  Picks the runway a descending aircraft most plausibly lands on and
//!  returns its touchdown point.

use std::cmp::Ordering;

use serde::Serialize;
use tracing::debug;

use crate::airport::{AirportIndex, IndexSnapshot};
use crate::config::MatcherConfig;
use crate::geo::{GeoPoint, heading_diff};
use crate::report::Timestamp;

/// Aircraft state the matcher works from
#[derive(Debug, Clone, Copy)]
pub struct RunwayQuery {
    pub position: GeoPoint,
    pub heading: f64,
    /// m/s, negative when descending
    pub vertical_speed: f64,
    /// m/s, used for the arrival estimate
    pub ground_speed: f64,
    pub timestamp: Timestamp,
}

/// Where and how to touch down
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TouchdownPoint {
    pub airport: String,
    /// Designator of the runway end landed on
    pub runway: String,
    pub position: GeoPoint,
    /// Landing heading
    pub heading: f64,
    /// Trajectory time the match was computed for, same clock as `eta`
    pub computed_at: Timestamp,
    /// Estimated arrival at the touchdown point
    pub eta: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunwayMatch {
    Found(TouchdownPoint),
    NoMatch,
}

impl RunwayMatch {
    pub fn touchdown(&self) -> Option<&TouchdownPoint> {
        match self {
            RunwayMatch::Found(td) => Some(td),
            RunwayMatch::NoMatch => None,
        }
    }
}

/// Scored landing direction
struct Candidate {
    score: f64,
    distance: f64,
    touchdown: TouchdownPoint,
}

/// Find the best runway in the current index snapshot
pub fn find_runway(query: &RunwayQuery, index: &AirportIndex, config: &MatcherConfig) -> RunwayMatch {
    if !index.is_enabled() {
        return RunwayMatch::NoMatch;
    }
    find_runway_in(query, &index.snapshot(), config)
}

/// Find the best runway within one snapshot
pub fn find_runway_in(
    query: &RunwayQuery,
    snapshot: &IndexSnapshot,
    config: &MatcherConfig,
) -> RunwayMatch {
    if query.vertical_speed >= 0.0 || !query.position.is_finite() {
        debug!("Runway search skipped, aircraft not descending");
        return RunwayMatch::NoMatch;
    }

    // Height above the nearest field decides the search radius
    let coarse = snapshot.query(&query.position, config.max_search_radius);
    let field_elevation = coarse.first().map(|r| r.ends[0].threshold.alt).unwrap_or(0.0);
    let agl = (query.position.alt - field_elevation).max(0.0);
    if agl > config.max_agl {
        debug!("Runway search skipped, {:.0} m above the field", agl);
        return RunwayMatch::NoMatch;
    }
    let radius = (agl * config.radius_per_meter_agl)
        .clamp(config.min_search_radius, config.max_search_radius);

    let mut best: Option<Candidate> = None;
    for rwy in coarse.iter().filter(|r| r.distance_to(&query.position) <= radius) {
        for end in 0..2 {
            let landing_heading = rwy.landing_heading(end);
            let hdg_diff = heading_diff(query.heading, landing_heading);
            if hdg_diff > config.max_heading_diff {
                continue;
            }
            let (along, lateral) = rwy.relative_position(end, &query.position);
            if along > rwy.length {
                continue;
            }
            let distance = rwy.ends[end].threshold.distance_to(&query.position);
            let score = config.heading_weight * hdg_diff / 180.0
                + config.lateral_weight * lateral / radius
                + config.distance_weight * distance / radius;

            let threshold = &rwy.ends[end];
            let mut position = threshold
                .threshold
                .offset(landing_heading, threshold.displaced + config.touchdown_margin);
            position.alt = threshold.threshold.alt;
            let to_go = position.distance_to(&query.position);
            let eta = (query.ground_speed > 1.0).then(|| query.timestamp.add_secs(to_go / query.ground_speed));

            let candidate = Candidate {
                score,
                distance,
                touchdown: TouchdownPoint {
                    airport: rwy.airport.clone(),
                    runway: threshold.designator.clone(),
                    position,
                    heading: landing_heading,
                    computed_at: query.timestamp,
                    eta,
                },
            };
            if best.as_ref().is_none_or(|b| better(&candidate, b)) {
                best = Some(candidate);
            }
        }
    }

    match best {
        Some(c) => {
            debug!(
                "Matched runway {} {} (score {:.3})",
                c.touchdown.airport, c.touchdown.runway, c.score
            );
            RunwayMatch::Found(c.touchdown)
        }
        None => RunwayMatch::NoMatch,
    }
}

/// Lower score wins; equal scores go to the nearer threshold
fn better(a: &Candidate, b: &Candidate) -> bool {
    const SCORE_EPSILON: f64 = 1e-9;
    if (a.score - b.score).abs() <= SCORE_EPSILON {
        a.distance.total_cmp(&b.distance) == Ordering::Less
    } else {
        a.score < b.score
    }
}
