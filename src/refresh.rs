//! Background airport loading around the viewpoint

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::airport::{AirportIndex, LoadOutcome};
use crate::config::{IndexConfig, RefreshConfig};
use crate::geo::GeoPoint;

struct Request {
    center: GeoPoint,
    generation: u64,
}

/// Shared between the coordinator and its loader thread
struct Progress {
    /// Bumped by every accepted refresh and by shutdown
    requested: AtomicU64,
    /// Last generation the loader finished or skipped
    completed: AtomicU64,
}

pub struct RefreshCoordinator {
    config: RefreshConfig,
    progress: Arc<Progress>,
    requests: Mutex<Option<Sender<Request>>>,
    last: Mutex<Option<(GeoPoint, Instant)>>,
    loader: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshCoordinator {
    pub fn start(index: Arc<AirportIndex>, radii: &IndexConfig, config: RefreshConfig) -> Self {
        let (tx, rx) = unbounded();
        let progress = Arc::new(Progress {
            requested: AtomicU64::new(0),
            completed: AtomicU64::new(0),
        });

        let load_radius = radii.load_radius;
        let retain_radius = radii.retain_radius.max(radii.load_radius);
        let shared = Arc::clone(&progress);
        let loader = thread::Builder::new()
            .name("airport-loader".into())
            .spawn(move || run_loader(rx, index, shared, load_radius, retain_radius));
        let loader = match loader {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!("Failed to spawn airport loader: {}", e);
                None
            }
        };

        Self {
            config,
            progress,
            requests: Mutex::new(loader.as_ref().map(|_| tx)),
            last: Mutex::new(None),
            loader: Mutex::new(loader),
        }
    }

    /// Schedule a load/unload around `viewpoint` if it moved far enough and
    /// the last refresh is old enough. Returns whether a load was scheduled.
    pub fn refresh(&self, viewpoint: &GeoPoint) -> bool {
        if !viewpoint.is_finite() {
            warn!("Ignoring refresh at invalid viewpoint {:?}", viewpoint);
            return false;
        }

        let mut last = self.last.lock();
        if let Some((at, when)) = *last {
            if at.distance_to(viewpoint) < self.config.move_threshold {
                return false;
            }
            if when.elapsed() < Duration::from_secs_f64(self.config.min_interval.max(0.0)) {
                debug!("Refresh rate limited");
                return false;
            }
        }

        let requests = self.requests.lock();
        let Some(tx) = requests.as_ref() else {
            return false;
        };
        let generation = self.progress.requested.fetch_add(1, Ordering::AcqRel) + 1;
        if tx.send(Request { center: *viewpoint, generation }).is_err() {
            return false;
        }
        *last = Some((*viewpoint, Instant::now()));
        debug!("Scheduled airport refresh #{} at {:.3},{:.3}", generation, viewpoint.lat, viewpoint.lon);
        true
    }

    /// Wait until every scheduled refresh is done. False on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.progress.completed.load(Ordering::Acquire) >= self.progress.requested.load(Ordering::Acquire) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    /// Cancel the running load and stop the loader thread
    pub fn shutdown(&self) {
        self.progress.requested.fetch_add(1, Ordering::AcqRel);
        drop(self.requests.lock().take());
        if let Some(handle) = self.loader.lock().take() {
            if handle.join().is_err() {
                warn!("Airport loader panicked");
            }
        }
    }
}

impl Drop for RefreshCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_loader(
    rx: Receiver<Request>,
    index: Arc<AirportIndex>,
    progress: Arc<Progress>,
    load_radius: f64,
    retain_radius: f64,
) {
    while let Ok(req) = rx.recv() {
        let superseded = || progress.requested.load(Ordering::Acquire) != req.generation;
        if superseded() {
            debug!("Skipping superseded refresh #{}", req.generation);
            progress.completed.fetch_max(req.generation, Ordering::AcqRel);
            continue;
        }

        match index.load_unless(&req.center, load_radius, superseded) {
            Ok(LoadOutcome::Cancelled) => debug!("Refresh #{} cancelled", req.generation),
            Ok(LoadOutcome::Disabled) => {}
            Ok(outcome) => {
                if let Ok(evicted) = index.unload(&req.center, retain_radius) {
                    if evicted > 0 {
                        info!("Refresh #{}: {:?}, evicted {} tiles", req.generation, outcome, evicted);
                    }
                }
            }
            Err(e) => error!("Airport refresh failed: {}", e),
        }
        progress.completed.fetch_max(req.generation, Ordering::AcqRel);
    }
    debug!("Airport loader stopped");
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn dataset() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "I\n1100 Version\n").unwrap();
        writeln!(file, "1 1000 0 0 AAAA Alpha").unwrap();
        writeln!(
            file,
            "100 45.00 1 0 0.25 1 2 1 09 50.00000000 8.00000000 0 0 3 0 0 0 27 50.00000000 8.04000000 0 0 3 0 0 0"
        )
        .unwrap();
        writeln!(file, "99").unwrap();
        file
    }

    fn coordinator(index: &Arc<AirportIndex>, config: RefreshConfig) -> RefreshCoordinator {
        let radii = IndexConfig {
            load_radius: 50_000.0,
            retain_radius: 80_000.0,
            ..IndexConfig::default()
        };
        RefreshCoordinator::start(Arc::clone(index), &radii, config)
    }

    #[test]
    fn test_refresh_loads_and_moves() {
        let file = dataset();
        let index = Arc::new(AirportIndex::new(vec![file.path().to_path_buf()]));
        let refresher = coordinator(&index, RefreshConfig { move_threshold: 1000.0, min_interval: 0.0 });

        assert!(refresher.refresh(&GeoPoint::new(50.0, 8.0, 0.0)));
        assert!(refresher.wait_idle(Duration::from_secs(5)));
        assert_eq!(index.query(&GeoPoint::new(50.0, 8.0, 0.0), 10_000.0).unwrap().len(), 1);

        // far away: old tiles evicted, new ones present
        assert!(refresher.refresh(&GeoPoint::new(-33.5, 151.5, 0.0)));
        assert!(refresher.wait_idle(Duration::from_secs(5)));
        let snap = index.snapshot();
        assert_eq!(snap.runway_count(), 0);
        assert!(!snap.is_loaded(&crate::airport::TileKey { lat: 50, lon: 8 }));
        assert!(snap.is_loaded(&crate::airport::TileKey { lat: -34, lon: 151 }));
    }

    #[test]
    fn test_small_moves_are_ignored() {
        let index = Arc::new(AirportIndex::with_snapshot(Default::default()));
        let refresher = coordinator(&index, RefreshConfig { move_threshold: 20_000.0, min_interval: 0.0 });
        let p = GeoPoint::new(50.0, 8.0, 0.0);
        assert!(refresher.refresh(&p));
        assert!(!refresher.refresh(&p.offset(0.0, 5_000.0)));
        assert!(refresher.refresh(&p.offset(0.0, 30_000.0)));
    }

    #[test]
    fn test_rate_limit() {
        let index = Arc::new(AirportIndex::with_snapshot(Default::default()));
        let refresher = coordinator(&index, RefreshConfig { move_threshold: 0.0, min_interval: 3600.0 });
        let p = GeoPoint::new(50.0, 8.0, 0.0);
        assert!(refresher.refresh(&p));
        assert!(!refresher.refresh(&p.offset(0.0, 100_000.0)));
    }

    #[test]
    fn test_refresh_after_shutdown() {
        let index = Arc::new(AirportIndex::with_snapshot(Default::default()));
        let refresher = coordinator(&index, RefreshConfig::default());
        refresher.shutdown();
        assert!(!refresher.refresh(&GeoPoint::new(50.0, 8.0, 0.0)));
        assert!(!refresher.refresh(&GeoPoint::new(f64::NAN, 8.0, 0.0)));
    }
}
