//! Trajectory computation
//!
//!  Turns the discrete report history of an aircraft into a continuous
//!  position: interpolation between reports, dead reckoning after the newest
//!  one, and a per-aircraft flight phase derived from the kinematics.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::config::{PhaseThresholds, TrajectoryConfig};
use crate::geo::{GeoPoint, LocalFrame, lerp, lerp_heading};
use crate::report::{PositionReport, Timestamp};
use crate::runway::TouchdownPoint;
use crate::track::TrackSnapshot;

/// Kinematic regime of an aircraft
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FlightPhase {
    Ground,
    TakeOff,
    Flight,
    Approach,
    Landing,
    RollOut,
    Vanished,
}

impl FlightPhase {
    pub fn is_on_ground(self) -> bool {
        matches!(self, FlightPhase::Ground | FlightPhase::RollOut)
    }

    /// A matched touchdown point stays relevant in these phases
    pub fn keeps_touchdown(self) -> bool {
        matches!(self, FlightPhase::Landing | FlightPhase::RollOut)
    }
}

/// How a sample was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SampleKind {
    /// Timestamp matches a report
    Exact,
    /// Between two reports
    Interpolated,
    /// Dead reckoning past the newest report
    Extrapolated,
    /// Before the oldest retained report, held at that report
    BeforeHistory,
    /// Past the extrapolation horizon, held at the horizon
    Vanished,
}

/// Continuous position of one aircraft at one point in time
#[derive(Debug, Clone, Serialize)]
pub struct TrajectorySample {
    pub id: String,
    pub timestamp: Timestamp,
    pub position: GeoPoint,
    pub heading: f64,
    pub ground_speed: f64,
    pub vertical_speed: f64,
    pub phase: FlightPhase,
    /// 1.0 for fresh data from a surveyed feed, decaying to 0.0 at the horizon
    pub confidence: f64,
    pub kind: SampleKind,
}

/// What the engine knows about the terrain and airports around a position
#[derive(Debug, Clone, Copy, Default)]
pub struct Surroundings {
    /// Elevation of the nearest field, meters MSL
    pub field_elevation: f64,
    /// Distance to the nearest runway threshold
    pub airport_distance: Option<f64>,
}

/// Evidence used for a phase decision
#[derive(Debug, Clone, Copy)]
pub struct PhaseInputs {
    pub agl: f64,
    pub vertical_speed: f64,
    pub ground_speed: f64,
    pub airport_distance: Option<f64>,
    /// Distance to the airport shrank since the previous sample
    pub converging: bool,
}

/// Ephemeral per-aircraft state, advanced by queries moving forward in time
#[derive(Debug, Clone)]
pub struct TrajectoryState {
    /// Query time this state was computed for
    pub sampled_at: Timestamp,
    /// Newest report known when this state was computed
    pub newest_report: Timestamp,
    pub phase: FlightPhase,
    pub position: GeoPoint,
    pub heading: f64,
    pub vertical_speed: f64,
    pub confidence: f64,
    pub airport_distance: Option<f64>,
    /// Newest report timestamp at the moment the aircraft vanished
    pub vanished_at: Option<Timestamp>,
    pub touchdown: Option<TouchdownPoint>,
}

/// Decide the next phase from the current one.
/// Enter and leave thresholds differ so noisy input does not flap.
pub fn next_phase(current: Option<FlightPhase>, i: &PhaseInputs, t: &PhaseThresholds) -> FlightPhase {
    use FlightPhase::*;

    let on_ground = i.agl < t.ground_agl;
    let airborne = i.agl > t.liftoff_agl;
    let descending = i.vertical_speed < -t.descent_vs;
    let climbing = i.vertical_speed > t.climb_vs;
    let near_airport = i.airport_distance.is_some_and(|d| d <= t.approach_radius);
    let approaching = descending && near_airport && i.agl < t.approach_agl;

    match current {
        None | Some(Vanished) => {
            if on_ground {
                if i.ground_speed > t.takeoff_roll_speed { TakeOff } else { Ground }
            } else if climbing && i.agl < t.climb_out_agl {
                TakeOff
            } else if approaching {
                if i.agl < t.landing_agl { Landing } else { Approach }
            } else {
                Flight
            }
        }
        Some(Ground) => {
            if i.ground_speed > t.takeoff_roll_speed || airborne { TakeOff } else { Ground }
        }
        Some(TakeOff) => {
            if i.agl > t.climb_out_agl {
                Flight
            } else if !airborne && i.ground_speed < t.taxi_speed {
                Ground
            } else {
                TakeOff
            }
        }
        Some(Flight) => {
            if on_ground {
                if i.ground_speed < t.taxi_speed { Ground } else { RollOut }
            } else if approaching && i.converging {
                if i.agl < t.landing_agl { Landing } else { Approach }
            } else {
                Flight
            }
        }
        Some(Approach) => {
            if on_ground {
                RollOut
            } else if climbing || i.agl > t.approach_agl + t.approach_hysteresis {
                Flight
            } else if i.agl < t.landing_agl && i.vertical_speed < 0.0 {
                Landing
            } else {
                Approach
            }
        }
        Some(Landing) => {
            if on_ground {
                RollOut
            } else if climbing {
                Flight
            } else {
                Landing
            }
        }
        Some(RollOut) => {
            if i.ground_speed < t.taxi_speed {
                Ground
            } else if airborne && climbing {
                TakeOff
            } else {
                RollOut
            }
        }
    }
}

/// Position, velocity and quality of a track at `ts`, before phase logic
#[derive(Debug, Clone, Copy)]
pub struct Kinematics {
    pub position: GeoPoint,
    pub heading: f64,
    pub ground_speed: f64,
    pub vertical_speed: f64,
    pub confidence: f64,
    pub kind: SampleKind,
}

impl Kinematics {
    fn from_report(r: &PositionReport, kind: SampleKind) -> Self {
        Self {
            position: r.position(),
            heading: r.heading,
            ground_speed: r.ground_speed,
            vertical_speed: r.vertical_speed,
            confidence: r.quality.confidence_factor(),
            kind,
        }
    }
}

/// Interpolate or extrapolate a sorted, non-empty report history.
/// With `hold_altitude` dead reckoning keeps the last altitude (aircraft on ground).
pub fn kinematics_at(
    reports: &[PositionReport],
    ts: Timestamp,
    horizon: f64,
    hold_altitude: bool,
) -> Option<Kinematics> {
    let oldest = reports.first()?;
    let newest = reports.last()?;

    if ts <= oldest.timestamp {
        let kind = if ts == oldest.timestamp { SampleKind::Exact } else { SampleKind::BeforeHistory };
        return Some(Kinematics::from_report(oldest, kind));
    }
    if ts >= newest.timestamp {
        if ts == newest.timestamp {
            return Some(Kinematics::from_report(newest, SampleKind::Exact));
        }
        return Some(extrapolate(newest, ts, horizon, hold_altitude));
    }

    let idx = reports.partition_point(|r| r.timestamp <= ts);
    let (a, b) = (&reports[idx - 1], &reports[idx]);
    if a.timestamp == ts {
        return Some(Kinematics::from_report(a, SampleKind::Exact));
    }

    let f = ts.secs_since(a.timestamp) / b.timestamp.secs_since(a.timestamp);
    let frame = LocalFrame::new(&a.position());
    let (east, north) = frame.to_local(b.lat, b.lon);
    let (lat, lon) = frame.to_geo(east * f, north * f);

    Some(Kinematics {
        position: GeoPoint::new(lat, lon, lerp(a.altitude, b.altitude, f)),
        heading: lerp_heading(a.heading, b.heading, f),
        ground_speed: lerp(a.ground_speed, b.ground_speed, f),
        vertical_speed: lerp(a.vertical_speed, b.vertical_speed, f),
        confidence: a
            .quality
            .confidence_factor()
            .min(b.quality.confidence_factor()),
        kind: SampleKind::Interpolated,
    })
}

fn extrapolate(last: &PositionReport, ts: Timestamp, horizon: f64, hold_altitude: bool) -> Kinematics {
    let elapsed = ts.secs_since(last.timestamp);
    let vanished = elapsed > horizon;
    let dt = elapsed.min(horizon);

    let mut position = last.position().offset(last.heading, last.ground_speed * dt);
    let vertical_speed = if hold_altitude { 0.0 } else { last.vertical_speed };
    position.alt = last.altitude + vertical_speed * dt;

    let confidence = if vanished || horizon <= 0.0 {
        0.0
    } else {
        last.quality.confidence_factor() * (1.0 - elapsed / horizon)
    };

    Kinematics {
        position,
        heading: last.heading,
        ground_speed: last.ground_speed,
        vertical_speed,
        confidence,
        kind: if vanished { SampleKind::Vanished } else { SampleKind::Extrapolated },
    }
}

fn phase_inputs(kin: &Kinematics, around: &Surroundings, converging: bool) -> PhaseInputs {
    PhaseInputs {
        agl: kin.position.alt - around.field_elevation,
        vertical_speed: kin.vertical_speed,
        ground_speed: kin.ground_speed,
        airport_distance: around.airport_distance,
        converging,
    }
}

fn sample(snapshot: &TrackSnapshot, ts: Timestamp, kin: &Kinematics, phase: FlightPhase) -> TrajectorySample {
    TrajectorySample {
        id: snapshot.id.clone(),
        timestamp: ts,
        position: kin.position,
        heading: kin.heading,
        ground_speed: kin.ground_speed,
        vertical_speed: kin.vertical_speed,
        phase,
        confidence: kin.confidence,
        kind: kin.kind,
    }
}

/// Computes samples and keeps the per-aircraft phase cache
pub struct TrajectoryEngine {
    config: TrajectoryConfig,
    thresholds: PhaseThresholds,
    states: Mutex<HashMap<String, TrajectoryState>>,
}

impl TrajectoryEngine {
    pub fn new(config: TrajectoryConfig, thresholds: PhaseThresholds) -> Self {
        Self {
            config,
            thresholds,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Continuous position of a track at `ts`. `surroundings` describes the
    /// terrain and airports around a position.
    ///
    /// Only queries at or after the cached sample advance the phase machine.
    /// Earlier queries get a phase classified from their own kinematics and
    /// leave the cache alone.
    pub fn position_at<F>(
        &self,
        snapshot: &TrackSnapshot,
        ts: Timestamp,
        surroundings: F,
    ) -> Option<TrajectorySample>
    where
        F: Fn(&GeoPoint) -> Surroundings,
    {
        let newest = snapshot.reports.last()?.timestamp;
        let horizon = self.config.extrapolation_horizon;

        let mut states = self.states.lock();
        let previous = states.get(&snapshot.id);

        if let Some(prev) = previous {
            let fresh_evidence = newest > prev.newest_report;
            if ts < prev.sampled_at {
                let kin = kinematics_at(&snapshot.reports, ts, horizon, false)?;
                return Some(self.classify_alone(snapshot, ts, kin, &surroundings));
            }
            if ts == prev.sampled_at && !fresh_evidence {
                let hold = prev.phase.is_on_ground();
                let mut kin = kinematics_at(&snapshot.reports, ts, horizon, hold)?;
                kin.position.alt = kin.position.alt.max(surroundings(&kin.position).field_elevation);
                return Some(sample(snapshot, ts, &kin, prev.phase));
            }
        }

        // Vanished sticks until a newer report shows up
        let prior_phase = match previous {
            Some(s) if s.phase == FlightPhase::Vanished && s.vanished_at.is_some_and(|v| v < newest) => None,
            Some(s) => Some(s.phase),
            None => None,
        };
        let hold_altitude = prior_phase.is_some_and(FlightPhase::is_on_ground);

        let mut kin = kinematics_at(&snapshot.reports, ts, horizon, hold_altitude)?;
        let around = surroundings(&kin.position);
        if kin.position.alt < around.field_elevation {
            kin.position.alt = around.field_elevation;
        }

        let phase = if kin.kind == SampleKind::Vanished || prior_phase == Some(FlightPhase::Vanished) {
            FlightPhase::Vanished
        } else {
            let converging = match (previous.and_then(|s| s.airport_distance), around.airport_distance) {
                (Some(before), Some(now)) => now < before,
                _ => true,
            };
            let inputs = phase_inputs(&kin, &around, converging);
            next_phase(prior_phase, &inputs, &self.thresholds)
        };

        if prior_phase != Some(phase) {
            debug!("{} phase {:?} -> {:?}", snapshot.id, prior_phase, phase);
        }

        let touchdown = previous
            .and_then(|s| s.touchdown.clone())
            .filter(|_| phase.keeps_touchdown());
        let state = TrajectoryState {
            sampled_at: ts,
            newest_report: newest,
            phase,
            position: kin.position,
            heading: kin.heading,
            vertical_speed: kin.vertical_speed,
            confidence: kin.confidence,
            airport_distance: around.airport_distance,
            vanished_at: (phase == FlightPhase::Vanished).then_some(newest),
            touchdown,
        };
        states.insert(snapshot.id.clone(), state);

        Some(sample(snapshot, ts, &kin, phase))
    }

    /// Sample for a query behind the cached state, classified without history
    fn classify_alone<F>(
        &self,
        snapshot: &TrackSnapshot,
        ts: Timestamp,
        mut kin: Kinematics,
        surroundings: &F,
    ) -> TrajectorySample
    where
        F: Fn(&GeoPoint) -> Surroundings,
    {
        let around = surroundings(&kin.position);
        kin.position.alt = kin.position.alt.max(around.field_elevation);
        let phase = if kin.kind == SampleKind::Vanished {
            FlightPhase::Vanished
        } else {
            next_phase(None, &phase_inputs(&kin, &around, true), &self.thresholds)
        };
        sample(snapshot, ts, &kin, phase)
    }

    pub fn phase(&self, id: &str) -> Option<FlightPhase> {
        self.states.lock().get(id).map(|s| s.phase)
    }

    pub fn state(&self, id: &str) -> Option<TrajectoryState> {
        self.states.lock().get(id).cloned()
    }

    /// Remember a runway match for an aircraft still approaching
    pub fn set_touchdown(&self, id: &str, touchdown: Option<TouchdownPoint>) {
        if let Some(state) = self.states.lock().get_mut(id) {
            state.touchdown = touchdown;
        }
    }

    /// Drop cached state of evicted tracks
    pub fn forget(&self, ids: &[String]) {
        let mut states = self.states.lock();
        for id in ids {
            states.remove(id);
        }
    }

    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
