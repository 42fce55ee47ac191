//! Flight track storage
//!
//!  Maintains the recent, time-ordered report history of every live aircraft.
//!  Reports may arrive from several feeds in any order; the store resolves
//!  them by timestamp, never by arrival order.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::config::TrackConfig;
use crate::geo::distance_m;
use crate::report::{PositionReport, Timestamp};

/// What `TrackStore::ingest` did with a report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// First report of a previously unseen aircraft
    Created,
    /// Newer than everything stored
    Appended,
    /// Same timestamp as a stored report, which it corrected
    Replaced,
    /// Older than the newest stored report
    RejectedOutOfOrder,
    /// Implies an impossible jump from the previous report
    RejectedImplausible,
    /// Failed validation
    RejectedMalformed,
}

impl IngestOutcome {
    pub fn is_accepted(self) -> bool {
        matches!(
            self,
            IngestOutcome::Created | IngestOutcome::Appended | IngestOutcome::Replaced
        )
    }
}

/// Ordered report history of one aircraft
#[derive(Debug, Clone)]
pub struct FlightTrack {
    id: String,
    /// Sorted by timestamp, unique timestamps. Copy-on-write so snapshots are cheap.
    reports: Arc<Vec<PositionReport>>,
    /// Accepted report count over the track's lifetime
    messages: u64,
}

impl FlightTrack {
    fn new(report: PositionReport) -> Self {
        Self {
            id: report.id.clone(),
            reports: Arc::new(vec![report]),
            messages: 1,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn newest(&self) -> Option<&PositionReport> {
        self.reports.last()
    }

    pub fn messages(&self) -> u64 {
        self.messages
    }

    fn insert(&mut self, report: PositionReport, config: &TrackConfig) -> IngestOutcome {
        let idx = self
            .reports
            .partition_point(|r| r.timestamp < report.timestamp);

        if let Some(existing) = self.reports.get(idx) {
            if existing.timestamp == report.timestamp {
                Arc::make_mut(&mut self.reports)[idx] = report;
                self.messages += 1;
                return IngestOutcome::Replaced;
            }
            return IngestOutcome::RejectedOutOfOrder;
        }

        if let Some(prev) = self.reports.last() {
            let dt = report.timestamp.secs_since(prev.timestamp);
            let dist = distance_m(prev.lat, prev.lon, report.lat, report.lon);
            if dist / dt > config.max_plausible_speed {
                return IngestOutcome::RejectedImplausible;
            }
        }

        let reports = Arc::make_mut(&mut self.reports);
        reports.push(report);
        self.messages += 1;
        prune(reports, config);
        IngestOutcome::Appended
    }
}

/// Drop history outside the retention window, always keeping the two newest
fn prune(reports: &mut Vec<PositionReport>, config: &TrackConfig) {
    let Some(newest) = reports.last().map(|r| r.timestamp) else {
        return;
    };
    let cutoff = newest.add_secs(-config.retention);
    let keep_from = reports.partition_point(|r| r.timestamp < cutoff);
    let keep_from = keep_from
        .max(reports.len().saturating_sub(config.max_reports.max(2)))
        .min(reports.len().saturating_sub(2));
    if keep_from > 0 {
        reports.drain(..keep_from);
    }
}

/// Immutable view of one aircraft's history at the time it was taken
#[derive(Debug, Clone)]
pub struct TrackSnapshot {
    pub id: String,
    pub reports: Arc<Vec<PositionReport>>,
}

impl TrackSnapshot {
    pub fn oldest(&self) -> &PositionReport {
        &self.reports[0]
    }

    pub fn newest(&self) -> &PositionReport {
        &self.reports[self.reports.len() - 1]
    }
}

/// Concurrent registry of all live flight tracks
pub struct TrackStore {
    tracks: RwLock<HashMap<String, FlightTrack>>,
    config: TrackConfig,
}

impl TrackStore {
    pub fn new(config: TrackConfig) -> Self {
        Self {
            tracks: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Insert a report into its aircraft's track, creating the track if needed
    pub fn ingest(&self, report: PositionReport) -> IngestOutcome {
        let report = match report.validated() {
            Ok(r) => r,
            Err(e) => {
                warn!("Dropping malformed report: {}", e);
                return IngestOutcome::RejectedMalformed;
            }
        };

        let mut tracks = self.tracks.write();
        let outcome = match tracks.get_mut(&report.id) {
            Some(track) => track.insert(report, &self.config),
            None => {
                debug!("New track {}", report.id);
                tracks.insert(report.id.clone(), FlightTrack::new(report));
                IngestOutcome::Created
            }
        };

        if !outcome.is_accepted() {
            debug!("Report rejected: {:?}", outcome);
        }
        outcome
    }

    /// Retained history of one aircraft, `None` if unknown
    pub fn snapshot(&self, id: &str) -> Option<TrackSnapshot> {
        let tracks = self.tracks.read();
        tracks.get(id).map(|t| TrackSnapshot {
            id: t.id.clone(),
            reports: Arc::clone(&t.reports),
        })
    }

    /// Timestamp of the newest report of one aircraft
    pub fn newest(&self, id: &str) -> Option<Timestamp> {
        self.tracks
            .read()
            .get(id)
            .and_then(|t| t.newest().map(|r| r.timestamp))
    }

    /// Remove tracks whose newest report is more than `timeout` seconds old
    pub fn evict_stale(&self, now: Timestamp, timeout: f64) -> Vec<String> {
        let mut evicted = Vec::new();
        self.tracks.write().retain(|id, track| {
            let keep = track
                .newest()
                .is_some_and(|r| now.secs_since(r.timestamp) <= timeout);
            if !keep {
                evicted.push(id.clone());
            }
            keep
        });
        if !evicted.is_empty() {
            debug!("Evicted {} stale tracks", evicted.len());
        }
        evicted
    }

    /// Evict with the configured timeout
    pub fn remove_stale(&self, now: Timestamp) -> Vec<String> {
        self.evict_stale(now, self.config.timeout)
    }

    pub fn ids(&self) -> Vec<String> {
        self.tracks.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tracks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::FeedQuality;

    fn report(id: &str, ts_ms: i64, lat: f64) -> PositionReport {
        PositionReport {
            id: id.into(),
            timestamp: Timestamp(ts_ms),
            lat,
            lon: 8.0,
            altitude: 1000.0,
            heading: 0.0,
            ground_speed: 100.0,
            vertical_speed: 0.0,
            quality: FeedQuality::Surveyed,
        }
    }

    fn timestamps(snap: &TrackSnapshot) -> Vec<i64> {
        snap.reports.iter().map(|r| r.timestamp.0).collect()
    }

    #[test]
    fn test_ingest_creates_and_appends() {
        let store = TrackStore::new(TrackConfig::default());
        assert!(store.is_empty());
        assert_eq!(store.ingest(report("A", 1_000, 47.0)), IngestOutcome::Created);
        assert_eq!(store.ingest(report("A", 2_000, 47.001)), IngestOutcome::Appended);
        assert_eq!(store.len(), 1);
        assert_eq!(timestamps(&store.snapshot("A").unwrap()), vec![1_000, 2_000]);
        assert!(store.snapshot("B").is_none());
    }

    #[test]
    fn test_extreme_timestamp_rejected() {
        let store = TrackStore::new(TrackConfig::default());
        let mut bogus = report("A", 0, 47.0);
        bogus.timestamp = Timestamp::from_secs_f64(-1e300);
        assert_eq!(store.ingest(bogus), IngestOutcome::RejectedMalformed);
        assert_eq!(store.ingest(report("A", 10_000, 47.0)), IngestOutcome::Created);
        assert_eq!(store.ingest(report("A", 11_000, 47.0005)), IngestOutcome::Appended);
        assert!(store.evict_stale(Timestamp(i64::MAX), 90.0).contains(&"A".to_string()));
    }

    #[test]
    fn test_equal_timestamp_replaces() {
        let store = TrackStore::new(TrackConfig::default());
        store.ingest(report("A", 1_000, 47.0));
        store.ingest(report("A", 2_000, 47.001));
        store.ingest(report("A", 3_000, 47.002));

        assert_eq!(store.ingest(report("A", 2_000, 47.0015)), IngestOutcome::Replaced);
        assert_eq!(store.ingest(report("A", 3_000, 47.0025)), IngestOutcome::Replaced);

        let snap = store.snapshot("A").unwrap();
        assert_eq!(timestamps(&snap), vec![1_000, 2_000, 3_000]);
        assert_eq!(snap.reports[1].lat, 47.0015);
        assert_eq!(snap.newest().lat, 47.0025);
    }

    #[test]
    fn test_strictly_older_rejected() {
        let store = TrackStore::new(TrackConfig::default());
        store.ingest(report("A", 1_000, 47.0));
        store.ingest(report("A", 3_000, 47.002));
        assert_eq!(
            store.ingest(report("A", 2_000, 47.001)),
            IngestOutcome::RejectedOutOfOrder
        );
        assert_eq!(timestamps(&store.snapshot("A").unwrap()), vec![1_000, 3_000]);
    }

    #[test]
    fn test_implausible_jump_rejected() {
        let store = TrackStore::new(TrackConfig::default());
        store.ingest(report("A", 1_000, 47.0));
        // ~111 km in one second
        assert_eq!(
            store.ingest(report("A", 2_000, 48.0)),
            IngestOutcome::RejectedImplausible
        );
    }

    #[test]
    fn test_malformed_rejected() {
        let store = TrackStore::new(TrackConfig::default());
        assert_eq!(
            store.ingest(report("A", 1_000, 123.0)),
            IngestOutcome::RejectedMalformed
        );
        assert!(store.is_empty());
    }

    #[test]
    fn test_retention_prunes_but_keeps_two() {
        let config = TrackConfig {
            retention: 10.0,
            max_reports: 4,
            ..TrackConfig::default()
        };
        let store = TrackStore::new(config);
        for i in 0..10 {
            store.ingest(report("A", i * 1_000, 47.0 + i as f64 * 0.001));
        }
        assert_eq!(timestamps(&store.snapshot("A").unwrap()), vec![6_000, 7_000, 8_000, 9_000]);

        // A long gap leaves only reports older than retention, but two remain
        store.ingest(report("A", 100_000, 47.1));
        assert_eq!(timestamps(&store.snapshot("A").unwrap()), vec![9_000, 100_000]);
    }

    #[test]
    fn test_snapshot_unaffected_by_later_ingest() {
        let store = TrackStore::new(TrackConfig::default());
        store.ingest(report("A", 1_000, 47.0));
        let snap = store.snapshot("A").unwrap();
        store.ingest(report("A", 2_000, 47.001));
        assert_eq!(snap.reports.len(), 1);
        assert_eq!(store.snapshot("A").unwrap().reports.len(), 2);
    }

    #[test]
    fn test_evict_stale_boundary() {
        let store = TrackStore::new(TrackConfig::default());
        store.ingest(report("OLD", 0, 47.0));
        store.ingest(report("EDGE", 10_000, 47.0));
        store.ingest(report("NEW", 50_000, 47.0));

        // now - last: OLD 60s, EDGE 50s, NEW 10s
        let mut evicted = store.evict_stale(Timestamp(60_000), 50.0);
        evicted.sort();
        assert_eq!(evicted, vec!["OLD".to_string()]);
        let mut ids = store.ids();
        ids.sort();
        assert_eq!(ids, vec!["EDGE".to_string(), "NEW".to_string()]);

        let evicted = store.evict_stale(Timestamp(60_001), 50.0);
        assert_eq!(evicted, vec!["EDGE".to_string()]);
    }

    #[test]
    fn test_concurrent_ingest_from_feeds() {
        let store = Arc::new(TrackStore::new(TrackConfig::default()));
        let handles: Vec<_> = (0..4)
            .map(|feed| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        // feeds interleave timestamps of the same aircraft
                        let ts = (i * 4 + feed) * 100;
                        store.ingest(report("A", ts, 47.0));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let snap = store.snapshot("A").unwrap();
        assert!(snap.reports.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }
}
