//! Tiled, proximity-bounded runway index.
//!
//! The index only ever holds the tiles around the current viewpoint. Every
//! load or unload builds a fresh immutable `IndexSnapshot` and swaps it in;
//! readers keep whichever snapshot they grabbed until they drop it, so a query
//! never sees a half-loaded tile.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use flate2::read::GzDecoder;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info};

use super::parser::AptDatParser;
use super::{RunwaySegment, TileKey};
use crate::error::IndexError;
use crate::geo::GeoPoint;

/// Immutable set of loaded tiles
#[derive(Debug, Default)]
pub struct IndexSnapshot {
    tiles: HashMap<TileKey, Arc<Vec<Arc<RunwaySegment>>>>,
}

impl IndexSnapshot {
    /// Build a snapshot directly from runways, marking their tiles loaded
    pub fn from_segments(segments: Vec<RunwaySegment>) -> Self {
        let mut tiles: HashMap<TileKey, Vec<Arc<RunwaySegment>>> = HashMap::new();
        for rwy in segments {
            let rwy = Arc::new(rwy);
            for tile in rwy.tiles() {
                tiles.entry(tile).or_default().push(Arc::clone(&rwy));
            }
        }
        Self {
            tiles: tiles.into_iter().map(|(k, v)| (k, Arc::new(v))).collect(),
        }
    }

    pub fn is_loaded(&self, tile: &TileKey) -> bool {
        self.tiles.contains_key(tile)
    }

    pub fn tiles(&self) -> impl Iterator<Item = &TileKey> {
        self.tiles.keys()
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    /// Number of distinct runways across all tiles
    pub fn runway_count(&self) -> usize {
        let mut seen = HashSet::new();
        for rwy in self.tiles.values().flat_map(|t| t.iter()) {
            seen.insert(runway_key(rwy));
        }
        seen.len()
    }

    /// Runways with a threshold within `max_distance` of `point`, nearest first
    pub fn query(&self, point: &GeoPoint, max_distance: f64) -> Vec<Arc<RunwaySegment>> {
        let mut seen = HashSet::new();
        let mut hits: Vec<(f64, Arc<RunwaySegment>)> = Vec::new();

        for tile in TileKey::around(point.lat, point.lon, max_distance) {
            let Some(runways) = self.tiles.get(&tile) else {
                continue;
            };
            for rwy in runways.iter() {
                let dist = rwy.distance_to(point);
                if dist <= max_distance && seen.insert(runway_key(rwy)) {
                    hits.push((dist, Arc::clone(rwy)));
                }
            }
        }

        hits.sort_by(|a, b| a.0.total_cmp(&b.0));
        hits.into_iter().map(|(_, rwy)| rwy).collect()
    }
}

/// A runway crossing a tile border may be parsed twice, once per tile
fn runway_key(rwy: &RunwaySegment) -> (&str, &str, &str) {
    (&rwy.airport, &rwy.ends[0].designator, &rwy.ends[1].designator)
}

/// Result of a load request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Every requested tile was present already, nothing was read
    AlreadyLoaded,
    /// New tiles were published
    Loaded { tiles: usize, runways: usize },
    /// The result was discarded before publishing
    Cancelled,
    /// The index is disabled for this session
    Disabled,
}

/// Airport index with atomically swapped snapshots
pub struct AirportIndex {
    datasets: Vec<PathBuf>,
    enabled: AtomicBool,
    current: RwLock<Arc<IndexSnapshot>>,
    /// Serialises loaders; readers never take it
    update: Mutex<()>,
}

impl AirportIndex {
    pub fn new(datasets: Vec<PathBuf>) -> Self {
        Self {
            datasets,
            enabled: AtomicBool::new(true),
            current: RwLock::new(Arc::new(IndexSnapshot::default())),
            update: Mutex::new(()),
        }
    }

    /// An index serving a fixed set of runways, without a dataset on disk
    pub fn with_snapshot(snapshot: IndexSnapshot) -> Self {
        let index = Self::new(Vec::new());
        *index.current.write() = Arc::new(snapshot);
        index
    }

    /// Check that every dataset can be opened. Disables the index otherwise.
    pub fn check_datasets(&self) -> bool {
        if self.datasets.is_empty() {
            info!("No airport dataset configured, runway matching disabled");
            self.disable();
            return false;
        }
        for path in &self.datasets {
            if let Err(e) = File::open(path) {
                error!("Cannot open airport dataset {}: {}", path.display(), e);
                self.disable();
                return false;
            }
        }
        true
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
        *self.current.write() = Arc::new(IndexSnapshot::default());
    }

    /// The currently published snapshot
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Load all tiles within `radius` meters of `center`
    pub fn load(&self, center: &GeoPoint, radius: f64) -> Result<LoadOutcome, IndexError> {
        self.load_unless(center, radius, || false)
    }

    /// Like `load`, but drops the result if `cancelled()` returns true before publishing
    pub fn load_unless<F>(
        &self,
        center: &GeoPoint,
        radius: f64,
        cancelled: F,
    ) -> Result<LoadOutcome, IndexError>
    where
        F: Fn() -> bool,
    {
        check_radius(radius)?;
        if !self.is_enabled() {
            return Ok(LoadOutcome::Disabled);
        }

        let _guard = self.update.lock();
        let current = self.snapshot();
        let missing: HashSet<TileKey> = TileKey::around(center.lat, center.lon, radius)
            .into_iter()
            .filter(|t| !current.is_loaded(t))
            .collect();
        if missing.is_empty() {
            return Ok(LoadOutcome::AlreadyLoaded);
        }

        let mut fresh: HashMap<TileKey, Vec<Arc<RunwaySegment>>> =
            missing.iter().map(|t| (*t, Vec::new())).collect();
        let mut runways = 0;
        for path in &self.datasets {
            if cancelled() {
                return Ok(LoadOutcome::Cancelled);
            }
            match read_tiles(path, &missing, &mut fresh) {
                Ok(n) => runways += n,
                Err(source) => {
                    error!("Airport dataset {} unreadable, disabling index: {}", path.display(), source);
                    self.disable();
                    return Err(IndexError::Dataset {
                        path: path.clone(),
                        source,
                    });
                }
            }
        }

        if cancelled() {
            debug!("Discarding cancelled load of {} tiles", missing.len());
            return Ok(LoadOutcome::Cancelled);
        }

        let mut tiles = current.tiles.clone();
        for (key, list) in fresh {
            tiles.insert(key, Arc::new(list));
        }
        *self.current.write() = Arc::new(IndexSnapshot { tiles });

        info!("Loaded {} tiles with {} runways", missing.len(), runways);
        Ok(LoadOutcome::Loaded {
            tiles: missing.len(),
            runways,
        })
    }

    /// Evict every tile outside `radius` meters of `center`, returns evicted tile count
    pub fn unload(&self, center: &GeoPoint, radius: f64) -> Result<usize, IndexError> {
        check_radius(radius)?;
        let _guard = self.update.lock();
        let current = self.snapshot();
        let keep: HashSet<TileKey> = TileKey::around(center.lat, center.lon, radius)
            .into_iter()
            .collect();

        let tiles: HashMap<_, _> = current
            .tiles
            .iter()
            .filter(|(k, _)| keep.contains(k))
            .map(|(k, v)| (*k, Arc::clone(v)))
            .collect();
        let evicted = current.tiles.len() - tiles.len();
        if evicted > 0 {
            *self.current.write() = Arc::new(IndexSnapshot { tiles });
            debug!("Evicted {} tiles", evicted);
        }
        Ok(evicted)
    }

    /// Runways with a threshold within `max_distance` meters, nearest first.
    /// Empty when the index is disabled.
    pub fn query(
        &self,
        point: &GeoPoint,
        max_distance: f64,
    ) -> Result<Vec<Arc<RunwaySegment>>, IndexError> {
        check_radius(max_distance)?;
        if !self.is_enabled() {
            return Ok(Vec::new());
        }
        Ok(self.snapshot().query(point, max_distance))
    }
}

fn check_radius(radius: f64) -> Result<(), IndexError> {
    if radius.is_finite() && radius >= 0.0 {
        Ok(())
    } else {
        Err(IndexError::InvalidRadius(radius))
    }
}

/// Read one dataset, adding runways that touch any of `wanted` into `out`
fn read_tiles(
    path: &Path,
    wanted: &HashSet<TileKey>,
    out: &mut HashMap<TileKey, Vec<Arc<RunwaySegment>>>,
) -> std::io::Result<usize> {
    let file = File::open(path)?;
    let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    let mut parser = AptDatParser::parse(reader);
    let mut count = 0;
    for airport in parser.by_ref() {
        for rwy in airport?.runways {
            let tiles: Vec<TileKey> = rwy.tiles().into_iter().filter(|t| wanted.contains(t)).collect();
            if tiles.is_empty() {
                continue;
            }
            let rwy = Arc::new(rwy);
            for tile in tiles {
                if let Some(list) = out.get_mut(&tile) {
                    list.push(Arc::clone(&rwy));
                }
            }
            count += 1;
        }
    }
    let stats = parser.stats();
    if stats.skipped > 0 {
        debug!("{}: skipped {} malformed records", path.display(), stats.skipped);
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::airport::{RunwayEnd, SurfaceType};

    const APT_DAT: &str = "\
I
1100 Version

1 1000 0 0 EAST East Field
100 45.00 1 0 0.25 0 0 0 09 47.5000 8.5000 0 0 0 0 0 2 27 47.5000 8.5400 0 0 0 0 0 2

1 300 0 0 WEST West Field
100 30.00 2 0 0.25 0 0 0 18 40.5000 -3.5000 0 0 0 0 0 2 36 40.4700 -3.5000 0 0 0 0 0 2
100 30.00 2 0 0.25 0 0 0 04 bad -3.5000 0 0 0 0 0 2 22 40.4700 -3.5000 0 0 0 0 0 2

99
";

    fn dataset() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(APT_DAT.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_is_idempotent() {
        let file = dataset();
        let index = AirportIndex::new(vec![file.path().to_path_buf()]);
        assert!(index.check_datasets());

        let center = GeoPoint::new(47.5, 8.52, 0.0);
        let outcome = index.load(&center, 20_000.0).unwrap();
        assert_eq!(outcome, LoadOutcome::Loaded { tiles: 1, runways: 1 });
        assert_eq!(index.load(&center, 20_000.0).unwrap(), LoadOutcome::AlreadyLoaded);
        assert_eq!(index.snapshot().runway_count(), 1);
    }

    #[test]
    fn test_query_sorted_by_distance() {
        let file = dataset();
        let index = AirportIndex::new(vec![file.path().to_path_buf()]);
        index.load(&GeoPoint::new(47.5, 8.5, 0.0), 50_000.0).unwrap();

        let hits = index.query(&GeoPoint::new(47.5, 8.45, 0.0), 10_000.0).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].airport, "EAST");
        assert!(index.query(&GeoPoint::new(47.5, 8.0, 0.0), 10_000.0).unwrap().is_empty());
    }

    #[test]
    fn test_unload_evicts_far_tiles() {
        let file = dataset();
        let index = AirportIndex::new(vec![file.path().to_path_buf()]);
        let p = GeoPoint::new(47.5, 8.5, 0.0);
        let q = GeoPoint::new(40.5, -3.5, 0.0);
        index.load(&p, 20_000.0).unwrap();
        index.load(&q, 20_000.0).unwrap();
        assert_eq!(index.snapshot().runway_count(), 2);

        let evicted = index.unload(&q, 20_000.0).unwrap();
        assert!(evicted >= 1);
        let snap = index.snapshot();
        assert!(!snap.is_loaded(&TileKey::containing(47.5, 8.5)));
        assert!(snap.is_loaded(&TileKey::containing(40.5, -3.5)));
        assert_eq!(snap.runway_count(), 1);
    }

    #[test]
    fn test_unreadable_dataset_disables() {
        let index = AirportIndex::new(vec![PathBuf::from("/nonexistent/apt.dat")]);
        assert!(!index.check_datasets());
        assert!(!index.is_enabled());
        let p = GeoPoint::new(47.5, 8.5, 0.0);
        assert_eq!(index.load(&p, 10_000.0).unwrap(), LoadOutcome::Disabled);
        assert!(index.query(&p, 10_000.0).unwrap().is_empty());
    }

    #[test]
    fn test_dataset_vanishing_mid_session() {
        let file = dataset();
        let path = file.path().to_path_buf();
        let index = AirportIndex::new(vec![path]);
        drop(file);
        let result = index.load(&GeoPoint::new(47.5, 8.5, 0.0), 10_000.0);
        assert!(matches!(result, Err(IndexError::Dataset { .. })));
        assert!(!index.is_enabled());
    }

    #[test]
    fn test_non_utf8_name_keeps_index_enabled() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"I\n1100 Version\n1 300 0 0 WEST Caf\xe9 Field\n").unwrap();
        file.write_all(APT_DAT.as_bytes()).unwrap();

        let index = AirportIndex::new(vec![file.path().to_path_buf()]);
        let outcome = index.load(&GeoPoint::new(47.5, 8.5, 0.0), 20_000.0).unwrap();
        assert_eq!(outcome, LoadOutcome::Loaded { tiles: 1, runways: 1 });
        assert!(index.is_enabled());
    }

    #[test]
    fn test_negative_radius_is_misuse() {
        let index = AirportIndex::new(Vec::new());
        let p = GeoPoint::new(47.5, 8.5, 0.0);
        assert!(matches!(index.query(&p, -1.0), Err(IndexError::InvalidRadius(_))));
        assert!(matches!(index.load(&p, f64::NAN), Err(IndexError::InvalidRadius(_))));
    }

    #[test]
    fn test_cancelled_load_is_not_published() {
        let file = dataset();
        let index = AirportIndex::new(vec![file.path().to_path_buf()]);
        let p = GeoPoint::new(47.5, 8.5, 0.0);
        assert_eq!(index.load_unless(&p, 10_000.0, || true).unwrap(), LoadOutcome::Cancelled);
        assert_eq!(index.snapshot().tile_count(), 0);
    }

    #[test]
    fn test_gzip_dataset() {
        use flate2::Compression;
        use flate2::write::GzEncoder;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apt.dat.gz");
        let mut enc = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        enc.write_all(APT_DAT.as_bytes()).unwrap();
        enc.finish().unwrap();

        let index = AirportIndex::new(vec![path]);
        let outcome = index.load(&GeoPoint::new(40.5, -3.5, 0.0), 10_000.0).unwrap();
        assert_eq!(outcome, LoadOutcome::Loaded { tiles: 1, runways: 1 });
    }

    #[test]
    fn test_runway_across_tile_border_not_duplicated() {
        let a = GeoPoint::new(47.999, 8.5, 0.0);
        let b = GeoPoint::new(48.01, 8.5, 0.0);
        let rwy = RunwaySegment::new(
            "EDGE",
            [
                RunwayEnd { designator: "36".into(), threshold: a, displaced: 0.0 },
                RunwayEnd { designator: "18".into(), threshold: b, displaced: 0.0 },
            ],
            30.0,
            SurfaceType::Grass,
        );
        let snap = IndexSnapshot::from_segments(vec![rwy]);
        assert_eq!(snap.tile_count(), 2);
        assert_eq!(snap.query(&a, 5_000.0).len(), 1);
    }
}
