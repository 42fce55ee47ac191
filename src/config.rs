//! Configuration and command-line argument parsing

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Command-line configuration of the `trafficfuse` binary
#[derive(Debug, Clone)]
pub struct Config {
    // Input
    /// Airport datasets (apt.dat, optionally gzip compressed)
    pub datasets: Vec<PathBuf>,
    /// JSON-lines report file, '-' for stdin
    pub feed_file: Option<String>,
    /// Optional JSON file overriding engine tunables
    pub engine_config: Option<PathBuf>,

    // Viewpoint used for airport loading
    pub view_lat: Option<f64>,
    pub view_lon: Option<f64>,

    // Output
    pub interactive: bool,
    pub interactive_rows: usize,
    /// Render this many seconds behind wall clock so reports bracket the frame
    pub render_delay: f64,
    pub tick_ms: u64,

    // Networking
    pub net: bool,
    pub net_feed_port: u16,
    pub net_http_port: u16,

    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            datasets: Vec::new(),
            feed_file: None,
            engine_config: None,
            view_lat: None,
            view_lon: None,
            interactive: false,
            interactive_rows: 15,
            render_delay: 5.0,
            tick_ms: 250,
            net: false,
            net_feed_port: 30010,
            net_http_port: 8080,
            verbose: false,
        }
    }
}

impl Config {
    pub fn from_args() -> Self {
        let args: Vec<String> = env::args().collect();
        Self::parse(&args[1..])
    }

    pub fn parse(args: &[String]) -> Self {
        let mut config = Config::default();

        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--apt" => {
                    i += 1;
                    if let Some(path) = args.get(i) {
                        config.datasets.push(PathBuf::from(path));
                    }
                }
                "--feed" => {
                    i += 1;
                    config.feed_file = args.get(i).cloned();
                }
                "--engine-config" => {
                    i += 1;
                    config.engine_config = args.get(i).map(PathBuf::from);
                }
                "--lat" => {
                    i += 1;
                    config.view_lat = args.get(i).and_then(|s| s.parse().ok());
                }
                "--lon" => {
                    i += 1;
                    config.view_lon = args.get(i).and_then(|s| s.parse().ok());
                }
                "--interactive" => config.interactive = true,
                "--interactive-rows" => {
                    i += 1;
                    config.interactive_rows =
                        args.get(i).and_then(|s| s.parse().ok()).unwrap_or(15);
                }
                "--render-delay" => {
                    i += 1;
                    config.render_delay = args.get(i).and_then(|s| s.parse().ok()).unwrap_or(5.0);
                }
                "--tick-ms" => {
                    i += 1;
                    config.tick_ms = args.get(i).and_then(|s| s.parse().ok()).unwrap_or(250);
                }
                "--net" => config.net = true,
                "--net-feed-port" => {
                    i += 1;
                    config.net_feed_port =
                        args.get(i).and_then(|s| s.parse().ok()).unwrap_or(30010);
                }
                "--net-http-port" => {
                    i += 1;
                    config.net_http_port = args.get(i).and_then(|s| s.parse().ok()).unwrap_or(8080);
                }
                "--verbose" => config.verbose = true,
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown option: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
            i += 1;
        }

        config
    }

    /// Viewpoint if both coordinates were given
    pub fn viewpoint(&self) -> Option<(f64, f64)> {
        Some((self.view_lat?, self.view_lon?))
    }

    /// Engine tunables, from `--engine-config` or defaults
    pub fn engine(&self) -> Result<EngineConfig, ConfigError> {
        let mut engine = match self.engine_config {
            Some(ref path) => EngineConfig::from_file(path)?,
            None => EngineConfig::default(),
        };
        if !self.datasets.is_empty() {
            engine.index.datasets = self.datasets.clone();
        }
        Ok(engine)
    }
}

fn print_help() {
    println!(
        r#"trafficfuse - live traffic trajectory fusion and runway matching

Usage: trafficfuse [OPTIONS]

Options:
  --apt <path>             Airport dataset (apt.dat or apt.dat.gz), repeatable
  --feed <file>            Read JSON-lines position reports ('-' for stdin)
  --engine-config <file>   JSON file with engine tunables
  --lat <degrees>          Viewpoint latitude for airport loading
  --lon <degrees>          Viewpoint longitude for airport loading
  --interactive            Interactive mode refreshing traffic on screen
  --interactive-rows <N>   Max rows in interactive mode (default: 15)
  --render-delay <s>       Render this far behind real time (default: 5)
  --tick-ms <ms>           Render tick interval (default: 250)
  --net                    Enable networking
  --net-feed-port <port>   TCP port for JSON-lines report input (default: 30010)
  --net-http-port <port>   HTTP server port (default: 8080)
  --verbose                Debug logging
  --help                   Show this help
"#
    );
}

/// All tunables of the library, grouped per component
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub track: TrackConfig,
    pub phases: PhaseThresholds,
    pub trajectory: TrajectoryConfig,
    pub index: IndexConfig,
    pub matcher: MatcherConfig,
    pub worker: WorkerConfig,
    pub refresh: RefreshConfig,
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackConfig {
    /// History older than this (relative to the newest report) is pruned, seconds
    pub retention: f64,
    /// Hard cap on reports kept per aircraft
    pub max_reports: usize,
    /// Tracks silent for longer than this are evicted, seconds
    pub timeout: f64,
    /// Reports implying a faster jump from the previous one are refused, m/s
    pub max_plausible_speed: f64,
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self {
            retention: 300.0,
            max_reports: 64,
            timeout: 90.0,
            max_plausible_speed: 400.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrajectoryConfig {
    /// Dead reckoning stops after this many seconds past the newest report
    pub extrapolation_horizon: f64,
    /// Runways within this distance provide the field elevation, meters
    pub field_search_radius: f64,
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        Self {
            extrapolation_horizon: 60.0,
            field_search_radius: 15_000.0,
        }
    }
}

/// Flight phase thresholds. Separate enter/leave values give hysteresis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseThresholds {
    /// Below this height above the field the aircraft is on the ground, meters
    pub ground_agl: f64,
    /// Ground phases are left only above this height, meters
    pub liftoff_agl: f64,
    /// Take-off ends above this height, meters
    pub climb_out_agl: f64,
    /// Approach starts below this height, meters
    pub approach_agl: f64,
    /// Extra height needed to leave Approach again, meters
    pub approach_hysteresis: f64,
    /// Landing starts below this height, meters
    pub landing_agl: f64,
    /// Descent rate that counts as descending, m/s (positive number)
    pub descent_vs: f64,
    /// Climb rate that aborts an approach or landing, m/s
    pub climb_vs: f64,
    /// Ground speed that starts a take-off roll, m/s
    pub takeoff_roll_speed: f64,
    /// Ground speed below which the aircraft is taxiing, m/s
    pub taxi_speed: f64,
    /// Airports farther than this do not count for an approach, meters
    pub approach_radius: f64,
}

impl Default for PhaseThresholds {
    fn default() -> Self {
        Self {
            ground_agl: 10.0,
            liftoff_agl: 30.0,
            climb_out_agl: 300.0,
            approach_agl: 1000.0,
            approach_hysteresis: 150.0,
            landing_agl: 100.0,
            descent_vs: 1.5,
            climb_vs: 2.5,
            takeoff_roll_speed: 25.0,
            taxi_speed: 15.0,
            approach_radius: 25_000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub datasets: Vec<PathBuf>,
    /// Tiles within this distance of the viewpoint are loaded, meters
    pub load_radius: f64,
    /// Tiles beyond this distance are evicted, meters
    pub retain_radius: f64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            datasets: Vec::new(),
            load_radius: 100_000.0,
            retain_radius: 150_000.0,
        }
    }
}

/// Runway scoring weights and geometry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub heading_weight: f64,
    pub lateral_weight: f64,
    pub distance_weight: f64,
    /// Landing directions further off the aircraft heading are ignored, degrees
    pub max_heading_diff: f64,
    /// Search radius per meter of height above the field
    pub radius_per_meter_agl: f64,
    pub min_search_radius: f64,
    pub max_search_radius: f64,
    /// No runway is searched for above this height over the field, meters
    pub max_agl: f64,
    /// Touchdown point distance past the (displaced) threshold, meters
    pub touchdown_margin: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            heading_weight: 3.0,
            lateral_weight: 2.0,
            distance_weight: 1.0,
            max_heading_diff: 90.0,
            radius_per_meter_agl: 25.0,
            min_search_radius: 5_000.0,
            max_search_radius: 50_000.0,
            max_agl: 1_500.0,
            touchdown_margin: 300.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub threads: usize,
    pub queue_capacity: usize,
    /// Seconds before a landing aircraft without a runway is matched again
    pub retry_interval: f64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            threads: 2,
            queue_capacity: 64,
            retry_interval: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Viewpoint movement that triggers a reload, meters
    pub move_threshold: f64,
    /// Minimum seconds between two reloads
    pub min_interval: f64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            move_threshold: 20_000.0,
            min_interval: 5.0,
        }
    }
}
