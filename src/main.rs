//!   trafficfuse:   live traffic trajectory fusion
//!
//!  Replays or receives position reports and renders every aircraft as a
//!  smoothly moving object, slightly behind real time.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use trafficfuse::config::Config;
use trafficfuse::engine::Engine;
use trafficfuse::geo::GeoPoint;
use trafficfuse::network;
use trafficfuse::report::Timestamp;
use trafficfuse::trajectory::{FlightPhase, TrajectorySample};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_args();

    // Initialize logging only if not in interactive mode
    if !config.interactive {
        let default = if config.verbose { "debug" } else { "info" };
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
        let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
        tracing::subscriber::set_global_default(subscriber).ok();
        info!("trafficfuse starting...");
        info!("Configuration: {:?}", config);
    }

    let engine = Arc::new(Engine::new(config.engine()?));
    engine.enable();
    if let Some((lat, lon)) = config.viewpoint() {
        engine.refresh(&GeoPoint::new(lat, lon, 0.0));
    }

    let rt = tokio::runtime::Runtime::new()?;

    rt.block_on(async {
        let net_handle = if config.net {
            let engine = Arc::clone(&engine);
            let cfg = config.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = network::run_servers(cfg, engine).await {
                    error!("Network error: {}", e);
                }
            }))
        } else {
            None
        };

        let render_handle = {
            let engine = Arc::clone(&engine);
            let cfg = config.clone();
            tokio::spawn(async move {
                render_loop(engine, cfg).await;
            })
        };

        // Stale aircraft removal task
        let cleanup_handle = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(1));
                loop {
                    interval.tick().await;
                    let evicted = engine.evict_stale(Timestamp::now());
                    if !evicted.is_empty() {
                        info!("Removed {} stale aircraft", evicted.len());
                    }
                }
            })
        };

        if let Some(ref path) = config.feed_file {
            let engine = Arc::clone(&engine);
            let path = path.clone();
            let result = tokio::task::spawn_blocking(move || read_feed(&engine, &path)).await;
            match result {
                Ok(Ok(count)) => info!("Feed complete, {} reports accepted", count),
                Ok(Err(e)) => error!("Error reading feed: {}", e),
                Err(e) => error!("Feed reader failed: {}", e),
            }
        }

        if config.interactive {
            println!("\nPress Ctrl+C to exit...");
        }
        tokio::signal::ctrl_c().await.ok();

        cleanup_handle.abort();
        render_handle.abort();
        if let Some(h) = net_handle {
            h.abort();
        }
    });

    engine.disable();
    Ok(())
}

/// Ingest a JSON-lines report file, '-' reads stdin
fn read_feed(engine: &Engine, path: &str) -> io::Result<u64> {
    let reader: Box<dyn BufRead> = if path == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        info!("Reading reports from file: {}", path);
        Box::new(BufReader::new(File::open(path)?))
    };

    let mut accepted = 0;
    for line in reader.lines() {
        if network::ingest_line(engine, &line?).is_some_and(|o| o.is_accepted()) {
            accepted += 1;
        }
    }
    Ok(accepted)
}

async fn render_loop(engine: Arc<Engine>, config: Config) {
    let mut interval = tokio::time::interval(Duration::from_millis(config.tick_ms.max(10)));
    let mut ticks = 0u64;

    loop {
        interval.tick().await;
        ticks += 1;

        let ts = Timestamp::now().add_secs(-config.render_delay);
        let samples = engine.samples(ts);

        // Airports follow the viewpoint, or the traffic centroid without one
        if let Some(center) = viewpoint(&config, &samples) {
            engine.refresh(&center);
        }

        if config.interactive {
            draw_table(&samples, config.interactive_rows);
        } else if ticks % 40 == 0 {
            let visible = samples.iter().filter(|s| s.phase != FlightPhase::Vanished).count();
            info!("{} aircraft tracked, {} visible", samples.len(), visible);
            for s in samples.iter().filter(|s| s.phase == FlightPhase::Landing) {
                match engine.touchdown(&s.id) {
                    Some(td) => info!("{} landing {} runway {}", s.id, td.airport, td.runway),
                    None => warn!("{} landing, no runway found yet", s.id),
                }
            }
        }
    }
}

fn viewpoint(config: &Config, samples: &[TrajectorySample]) -> Option<GeoPoint> {
    if let Some((lat, lon)) = config.viewpoint() {
        return Some(GeoPoint::new(lat, lon, 0.0));
    }
    let live: Vec<_> = samples.iter().filter(|s| s.phase != FlightPhase::Vanished).collect();
    if live.is_empty() {
        return None;
    }
    let n = live.len() as f64;
    let lat = live.iter().map(|s| s.position.lat).sum::<f64>() / n;
    let lon = live.iter().map(|s| s.position.lon).sum::<f64>() / n;
    Some(GeoPoint::new(lat, lon, 0.0))
}

fn draw_table(samples: &[TrajectorySample], max_rows: usize) {
    // Clear screen and move cursor to top
    print!("\x1B[2J\x1B[H");

    const YELLOW: &str = "\x1B[93m";
    const GREEN: &str = "\x1B[92m";
    const BOLD: &str = "\x1B[1m";
    const RESET: &str = "\x1B[0m";

    println!(
        "{BOLD}{:<8} {:>9} {:>10} {:>6} {:>5} {:>5} {:>6} {:<9} {:>4}{RESET}",
        "Id", "Lat", "Lon", "Alt", "Spd", "Hdg", "VRate", "Phase", "Conf"
    );
    println!("{}", "-".repeat(75));

    for s in samples.iter().take(max_rows) {
        let vrate = if s.vertical_speed > 1.0 {
            format!("{GREEN}▲{:+.0}{RESET}", s.vertical_speed)
        } else if s.vertical_speed < -1.0 {
            format!("{YELLOW}▼{:+.0}{RESET}", s.vertical_speed)
        } else {
            format!("{:+.0}", s.vertical_speed)
        };
        println!(
            "{:<8} {:>9.4} {:>10.4} {:>6.0} {:>5.0} {:>5.0} {:>6} {:<9} {:>4.2}",
            s.id,
            s.position.lat,
            s.position.lon,
            s.position.alt,
            s.ground_speed,
            s.heading,
            vrate,
            format!("{:?}", s.phase),
            s.confidence
        );
    }

    println!("{}", "-".repeat(75));
    println!("Aircraft: {} | Ctrl+C to exit", samples.len());
    io::stdout().flush().ok();
}
