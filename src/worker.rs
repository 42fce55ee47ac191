//! Runway search worker pool
//!
//!  Runway matching can touch many tiles, so it runs on a small pool of
//!  threads fed through a bounded queue. Callers get a channel that yields
//!  the result once a worker is done.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::airport::AirportIndex;
use crate::config::MatcherConfig;
use crate::error::PoolError;
use crate::runway::{find_runway, RunwayMatch, RunwayQuery};

struct Job {
    query: RunwayQuery,
    reply: Sender<RunwayMatch>,
}

pub struct RunwayWorkerPool {
    jobs: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl RunwayWorkerPool {
    pub fn new(threads: usize, capacity: usize, index: Arc<AirportIndex>, config: MatcherConfig) -> Self {
        let (tx, rx) = bounded::<Job>(capacity.max(1));
        let config = Arc::new(config);

        let workers = (0..threads.max(1))
            .map(|n| {
                let rx = rx.clone();
                let index = Arc::clone(&index);
                let config = Arc::clone(&config);
                thread::Builder::new()
                    .name(format!("runway-{}", n))
                    .spawn(move || work(rx, index, config))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!("Failed to spawn runway worker: {}", e);
                    None
                }
            })
            .collect::<Vec<_>>();

        info!("Runway worker pool started with {} threads", workers.len());
        Self {
            jobs: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        }
    }

    /// Queue a runway search. Never blocks: a full queue is reported to the caller.
    pub fn submit(&self, query: RunwayQuery) -> Result<Receiver<RunwayMatch>, PoolError> {
        let (reply, result) = bounded(1);
        let jobs = self.jobs.lock();
        let tx = jobs.as_ref().ok_or(PoolError::Closed)?;
        match tx.try_send(Job { query, reply }) {
            Ok(()) => Ok(result),
            Err(TrySendError::Full(_)) => Err(PoolError::QueueFull),
            Err(TrySendError::Disconnected(_)) => Err(PoolError::Closed),
        }
    }

    /// Stop accepting jobs, let queued ones finish, join the threads
    pub fn shutdown(&self) {
        drop(self.jobs.lock().take());
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if handle.join().is_err() {
                warn!("Runway worker panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.jobs.lock().is_some()
    }
}

impl Drop for RunwayWorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn work(rx: Receiver<Job>, index: Arc<AirportIndex>, config: Arc<MatcherConfig>) {
    while let Ok(job) = rx.recv() {
        let result = find_runway(&job.query, &index, &config);
        // The requester may have gone away
        if job.reply.send(result).is_err() {
            debug!("Runway result dropped, requester gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::airport::{IndexSnapshot, RunwayEnd, RunwaySegment, SurfaceType};
    use crate::geo::GeoPoint;
    use crate::report::Timestamp;

    fn index() -> Arc<AirportIndex> {
        let west = GeoPoint::new(50.0, 8.0, 100.0);
        let rwy = RunwaySegment::new(
            "AAAA",
            [
                RunwayEnd { designator: "09".into(), threshold: west, displaced: 0.0 },
                RunwayEnd { designator: "27".into(), threshold: west.offset(90.0, 3000.0), displaced: 0.0 },
            ],
            45.0,
            SurfaceType::Asphalt,
        );
        Arc::new(AirportIndex::with_snapshot(IndexSnapshot::from_segments(vec![rwy])))
    }

    fn query() -> RunwayQuery {
        let mut position = GeoPoint::new(50.0, 8.0, 100.0).offset(270.0, 4000.0);
        position.alt = 350.0;
        RunwayQuery {
            position,
            heading: 90.0,
            vertical_speed: -3.0,
            ground_speed: 70.0,
            timestamp: Timestamp(0),
        }
    }

    #[test]
    fn test_submit_returns_match() {
        let pool = RunwayWorkerPool::new(2, 8, index(), MatcherConfig::default());
        let rx = pool.submit(query()).unwrap();
        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(result.touchdown().unwrap().runway, "09");
        pool.shutdown();
    }

    #[test]
    fn test_many_requests() {
        let pool = RunwayWorkerPool::new(3, 64, index(), MatcherConfig::default());
        let receivers: Vec<_> = (0..32).map(|_| pool.submit(query()).unwrap()).collect();
        for rx in receivers {
            let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert!(matches!(result, RunwayMatch::Found(_)));
        }
    }

    #[test]
    fn test_submit_after_shutdown() {
        let pool = RunwayWorkerPool::new(1, 4, index(), MatcherConfig::default());
        pool.shutdown();
        assert!(!pool.is_running());
        assert_eq!(pool.submit(query()).unwrap_err(), PoolError::Closed);
    }
}
