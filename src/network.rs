//! Network services for trafficfuse
//!
//!  A TCP port accepting JSON-lines position reports and a small HTTP
//!  server publishing the current trajectory samples as JSON.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

use crate::config::Config;
use crate::engine::Engine;
use crate::report::{FeedRecord, PositionReport, Timestamp};
use crate::track::IngestOutcome;

pub async fn run_servers(
    config: Config,
    engine: Arc<Engine>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let feed_handle = {
        let port = config.net_feed_port;
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            if let Err(e) = run_feed_input_server(port, engine).await {
                error!("Feed input server error: {}", e);
            }
        })
    };

    let http_handle = {
        let port = config.net_http_port;
        let delay = config.render_delay;
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            if let Err(e) = run_http_server(port, engine, delay).await {
                error!("HTTP server error: {}", e);
            }
        })
    };

    tokio::select! {
        _ = feed_handle => {}
        _ = http_handle => {}
    }

    Ok(())
}

/// Parse one JSON-lines record and ingest it. `None` for blank or garbled lines.
pub fn ingest_line(engine: &Engine, line: &str) -> Option<IngestOutcome> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<FeedRecord>(line) {
        Ok(record) => Some(engine.ingest(PositionReport::from(record))),
        Err(e) => {
            debug!("Skipping unparsable feed line: {}", e);
            None
        }
    }
}

async fn run_feed_input_server(
    port: u16,
    engine: Arc<Engine>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("Feed input server listening on port {}", port);

    loop {
        let (socket, addr) = listener.accept().await?;
        debug!("Feed client connected: {}", addr);
        let engine = Arc::clone(&engine);

        tokio::spawn(async move {
            let reader = BufReader::new(socket);
            let mut lines = reader.lines();
            let mut accepted = 0u64;

            while let Ok(Some(line)) = lines.next_line().await {
                if ingest_line(&engine, &line).is_some_and(IngestOutcome::is_accepted) {
                    accepted += 1;
                }
            }
            debug!("Feed client disconnected: {} ({} reports)", addr, accepted);
        });
    }
}

async fn run_http_server(
    port: u16,
    engine: Arc<Engine>,
    render_delay: f64,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("HTTP server listening on port {}", port);

    loop {
        let (socket, addr) = listener.accept().await?;
        debug!("HTTP client connected: {}", addr);

        let engine = Arc::clone(&engine);

        tokio::spawn(async move {
            if let Err(e) = handle_http_request(socket, engine, render_delay).await {
                debug!("HTTP error: {}", e);
            }
        });
    }
}

async fn handle_http_request(
    mut socket: TcpStream,
    engine: Arc<Engine>,
    render_delay: f64,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut buffer = vec![0u8; 8192];
    let n = socket.read(&mut buffer).await?;

    if n == 0 {
        return Ok(());
    }

    let request = String::from_utf8_lossy(&buffer[..n]);
    let first_line = request.lines().next().unwrap_or("");
    let parts: Vec<&str> = first_line.split_whitespace().collect();

    if parts.len() < 2 {
        return Ok(());
    }

    let url = parts[1];
    let keepalive = if first_line.contains("HTTP/1.1") {
        !request.to_lowercase().contains("connection: close")
    } else {
        request.to_lowercase().contains("connection: keep-alive")
    };

    let (status, content) = if url.starts_with("/data.json") {
        let ts = Timestamp::now().add_secs(-render_delay);
        ("200 OK", samples_json(&engine, ts)?)
    } else {
        ("404 Not Found", String::from("{\"error\":\"not found\"}"))
    };

    let header = format!(
        "HTTP/1.1 {}\r\n\
         Server: trafficfuse\r\n\
         Content-Type: application/json;charset=utf-8\r\n\
         Connection: {}\r\n\
         Content-Length: {}\r\n\
         Access-Control-Allow-Origin: *\r\n\
         \r\n",
        status,
        if keepalive { "keep-alive" } else { "close" },
        content.len()
    );

    socket.write_all(header.as_bytes()).await?;
    socket.write_all(content.as_bytes()).await?;

    Ok(())
}

/// Samples of every visible aircraft at `ts`, vanished ones left out
pub fn samples_json(engine: &Engine, ts: Timestamp) -> Result<String, serde_json::Error> {
    let samples: Vec<_> = engine
        .samples(ts)
        .into_iter()
        .filter(|s| s.phase != crate::trajectory::FlightPhase::Vanished)
        .collect();
    serde_json::to_string(&samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn engine() -> Engine {
        Engine::new(EngineConfig::default())
    }

    #[test]
    fn test_ingest_line() {
        let engine = engine();
        let line = r#"{"id":"4CA123","ts":100.0,"lat":53.4,"lon":-6.2,"alt":3000,"hdg":280,"gs":120,"vs":-4}"#;
        assert_eq!(ingest_line(&engine, line), Some(IngestOutcome::Created));
        assert_eq!(ingest_line(&engine, line), Some(IngestOutcome::Replaced));
        assert_eq!(ingest_line(&engine, "   "), None);
        assert_eq!(ingest_line(&engine, "{not json"), None);

        let bad = r#"{"id":"4CA124","ts":100.0,"lat":95.0,"lon":-6.2,"alt":3000}"#;
        assert_eq!(ingest_line(&engine, bad), Some(IngestOutcome::RejectedMalformed));
        assert_eq!(engine.live_ids(), vec!["4CA123".to_string()]);
    }

    #[test]
    fn test_samples_json() {
        let engine = engine();
        ingest_line(&engine, r#"{"id":"A","ts":100.0,"lat":53.4,"lon":-6.2,"alt":3000,"hdg":90,"gs":100}"#);
        ingest_line(&engine, r#"{"id":"B","ts":100.0,"lat":53.5,"lon":-6.3,"alt":2000,"hdg":90,"gs":100}"#);

        let json = samples_json(&engine, Timestamp::from_secs_f64(110.0)).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        let list = parsed.as_array().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0]["id"], "A");
        assert_eq!(list[0]["kind"], "Extrapolated");

        // far beyond the horizon every aircraft has vanished
        let json = samples_json(&engine, Timestamp::from_secs_f64(1000.0)).unwrap();
        assert_eq!(json, "[]");
    }
}
