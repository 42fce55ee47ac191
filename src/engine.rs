//! Engine context
//!
//!  Owns every component and exposes the query interface. Lifecycle is
//!  explicit: `new`, `enable` (start background threads), `refresh` while
//!  running, `disable` (cancel loads, join threads).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, TryRecvError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::airport::AirportIndex;
use crate::config::EngineConfig;
use crate::error::PoolError;
use crate::geo::GeoPoint;
use crate::report::{PositionReport, Timestamp};
use crate::refresh::RefreshCoordinator;
use crate::runway::{self, RunwayMatch, RunwayQuery, TouchdownPoint};
use crate::track::{IngestOutcome, TrackStore};
use crate::trajectory::{kinematics_at, FlightPhase, Surroundings, TrajectoryEngine, TrajectorySample};
use crate::worker::RunwayWorkerPool;

pub struct Engine {
    config: EngineConfig,
    tracks: TrackStore,
    trajectories: TrajectoryEngine,
    index: Arc<AirportIndex>,
    /// Check the configured datasets on `enable`
    verify_datasets: bool,
    workers: Mutex<Option<RunwayWorkerPool>>,
    refresher: Mutex<Option<RefreshCoordinator>>,
    requests: Mutex<HashMap<String, RunwayRequest>>,
    requests_sent: AtomicU64,
}

/// Runway request of one aircraft: awaiting a reply, or answered at `sent`
struct RunwayRequest {
    reply: Option<Receiver<RunwayMatch>>,
    sent: Instant,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let index = Arc::new(AirportIndex::new(config.index.datasets.clone()));
        let mut engine = Self::with_index(config, index);
        engine.verify_datasets = true;
        engine
    }

    /// Engine over an index prepared by the caller
    pub fn with_index(config: EngineConfig, index: Arc<AirportIndex>) -> Self {
        Self {
            tracks: TrackStore::new(config.track.clone()),
            trajectories: TrajectoryEngine::new(config.trajectory.clone(), config.phases.clone()),
            index,
            verify_datasets: false,
            workers: Mutex::new(None),
            refresher: Mutex::new(None),
            requests: Mutex::new(HashMap::new()),
            requests_sent: AtomicU64::new(0),
            config,
        }
    }

    /// Start the runway workers and the airport loader
    pub fn enable(&self) {
        let mut workers = self.workers.lock();
        if workers.is_some() {
            return;
        }
        if self.verify_datasets {
            self.index.check_datasets();
        }

        *workers = Some(RunwayWorkerPool::new(
            self.config.worker.threads,
            self.config.worker.queue_capacity,
            Arc::clone(&self.index),
            self.config.matcher.clone(),
        ));
        *self.refresher.lock() = Some(RefreshCoordinator::start(
            Arc::clone(&self.index),
            &self.config.index,
            self.config.refresh.clone(),
        ));
        info!(
            "Engine enabled, runway matching {}",
            if self.index.is_enabled() { "on" } else { "off" }
        );
    }

    /// Cancel pending loads and stop all background threads
    pub fn disable(&self) {
        if let Some(refresher) = self.refresher.lock().take() {
            refresher.shutdown();
        }
        if let Some(pool) = self.workers.lock().take() {
            pool.shutdown();
        }
        self.requests.lock().clear();
        info!("Engine disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.workers.lock().is_some()
    }

    /// Move the loaded airport area along with the viewpoint
    pub fn refresh(&self, viewpoint: &GeoPoint) {
        if let Some(refresher) = self.refresher.lock().as_ref() {
            refresher.refresh(viewpoint);
        }
    }

    /// Block until scheduled airport loads are done. False on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        match self.refresher.lock().as_ref() {
            Some(refresher) => refresher.wait_idle(timeout),
            None => true,
        }
    }

    pub fn ingest(&self, report: PositionReport) -> IngestOutcome {
        self.tracks.ingest(report)
    }

    /// Continuous position of an aircraft, `None` for unknown ids.
    /// Asks for a runway match once the aircraft is landing, and again
    /// every `retry_interval` while none is found.
    pub fn position_at(&self, id: &str, ts: Timestamp) -> Option<TrajectorySample> {
        let snapshot = self.tracks.snapshot(id)?;
        self.poll_runway(id);

        let sample = self
            .trajectories
            .position_at(&snapshot, ts, |p| self.surroundings(p))?;

        if sample.phase == FlightPhase::Landing && self.touchdown(id).is_none() {
            let mut requests = self.requests.lock();
            let due = requests.get(id).is_none_or(|r| {
                r.reply.is_none() && r.sent.elapsed().as_secs_f64() >= self.config.worker.retry_interval
            });
            if due {
                let reply = match self.submit(query_from(&sample)) {
                    Ok(rx) => {
                        self.requests_sent.fetch_add(1, Ordering::Relaxed);
                        Some(rx)
                    }
                    Err(e) => {
                        debug!("Runway request for {} not queued: {}", id, e);
                        None
                    }
                };
                requests.insert(id.to_string(), RunwayRequest { reply, sent: Instant::now() });
            }
        }
        Some(sample)
    }

    /// Samples of every live aircraft at `ts`
    pub fn samples(&self, ts: Timestamp) -> Vec<TrajectorySample> {
        let mut samples: Vec<_> = self
            .tracks
            .ids()
            .iter()
            .filter_map(|id| self.position_at(id, ts))
            .collect();
        samples.sort_by(|a, b| a.id.cmp(&b.id));
        samples
    }

    /// Runway match from the newest known state of an aircraft
    pub fn find_runway(&self, id: &str) -> RunwayMatch {
        match self.tracks.newest(id) {
            Some(newest) => self.find_runway_at(id, newest),
            None => RunwayMatch::NoMatch,
        }
    }

    /// Runway match from the trajectory at `ts`, computed on the calling thread
    pub fn find_runway_at(&self, id: &str, ts: Timestamp) -> RunwayMatch {
        match self.runway_query(id, ts) {
            Some(query) => runway::find_runway(&query, &self.index, &self.config.matcher),
            None => RunwayMatch::NoMatch,
        }
    }

    /// Queue a runway match on the worker pool
    pub fn request_runway(&self, id: &str, ts: Timestamp) -> Result<Receiver<RunwayMatch>, PoolError> {
        match self.runway_query(id, ts) {
            Some(query) => self.submit(query),
            None => {
                let (tx, rx) = bounded(1);
                let _ = tx.send(RunwayMatch::NoMatch);
                Ok(rx)
            }
        }
    }

    /// Last touchdown point matched for a landing aircraft
    pub fn touchdown(&self, id: &str) -> Option<TouchdownPoint> {
        self.trajectories.state(id).and_then(|s| s.touchdown)
    }

    pub fn phase(&self, id: &str) -> Option<FlightPhase> {
        self.trajectories.phase(id)
    }

    /// Drop aircraft without a report within the track timeout
    pub fn evict_stale(&self, now: Timestamp) -> Vec<String> {
        let evicted = self.tracks.remove_stale(now);
        if !evicted.is_empty() {
            self.trajectories.forget(&evicted);
            let mut requests = self.requests.lock();
            for id in &evicted {
                requests.remove(id);
            }
        }
        evicted
    }

    pub fn live_ids(&self) -> Vec<String> {
        self.tracks.ids()
    }

    pub fn index(&self) -> &Arc<AirportIndex> {
        &self.index
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn submit(&self, query: RunwayQuery) -> Result<Receiver<RunwayMatch>, PoolError> {
        match self.workers.lock().as_ref() {
            Some(pool) => pool.submit(query),
            None => Err(PoolError::Closed),
        }
    }

    /// Runway requests queued by `position_at` so far
    pub fn runway_requests_sent(&self) -> u64 {
        self.requests_sent.load(Ordering::Relaxed)
    }

    /// Pick up a finished runway request
    fn poll_runway(&self, id: &str) {
        let mut requests = self.requests.lock();
        let Some(request) = requests.get_mut(id) else {
            return;
        };
        let Some(rx) = request.reply.as_ref() else {
            return;
        };
        match rx.try_recv() {
            Ok(found) => {
                if let RunwayMatch::Found(td) = &found {
                    info!("{} landing on {} {}", id, td.airport, td.runway);
                }
                self.trajectories.set_touchdown(id, found.touchdown().cloned());
                request.reply = None;
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                warn!("Runway request for {} lost", id);
                request.reply = None;
            }
        }
    }

    fn runway_query(&self, id: &str, ts: Timestamp) -> Option<RunwayQuery> {
        let snapshot = self.tracks.snapshot(id)?;
        let kin = kinematics_at(&snapshot.reports, ts, self.config.trajectory.extrapolation_horizon, false)?;
        Some(RunwayQuery {
            position: kin.position,
            heading: kin.heading,
            vertical_speed: kin.vertical_speed,
            ground_speed: kin.ground_speed,
            timestamp: ts,
        })
    }

    /// Field elevation and airport distance around a position
    fn surroundings(&self, point: &GeoPoint) -> Surroundings {
        let nearest = self
            .index
            .query(point, self.config.trajectory.field_search_radius)
            .ok()
            .and_then(|hits| hits.into_iter().next());
        match nearest {
            Some(rwy) => Surroundings {
                field_elevation: rwy.ends[0].threshold.alt,
                airport_distance: Some(rwy.distance_to(point)),
            },
            None => Surroundings::default(),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.disable();
    }
}

fn query_from(sample: &TrajectorySample) -> RunwayQuery {
    RunwayQuery {
        position: sample.position,
        heading: sample.heading,
        vertical_speed: sample.vertical_speed,
        ground_speed: sample.ground_speed,
        timestamp: sample.timestamp,
    }
}
