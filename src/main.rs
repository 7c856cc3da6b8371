//! Chunkahead demo and operator binary
//!
//! Replays a simulated listening session against the buffer using the
//! synthetic processor and sample source, reporting how often playback was
//! served from the cache. Optionally exposes the management surface over
//! HTTP while it runs.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          chunkahead                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │   Session    │───▶│    Buffer    │───▶│    Buffer    │       │
//! │  │  simulator   │    │   Manager    │    │    Worker    │       │
//! │  └──────────────┘    └──────┬───────┘    └──────────────┘       │
//! │                             │                                    │
//! │         /healthz  /metrics  /stats  /predictions  /entries       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use chunkahead::config::parse_duration;
use chunkahead::processor::{SyntheticProcessor, SyntheticSource};
use chunkahead::{
    BufferConfig, BufferManager, BufferWorker, ChunkProcessor, Error, MetricsExporter, Preset,
    Result, TierLevel,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Chunkahead - predictive pre-buffering of processed audio chunks
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "CHUNKAHEAD_CONFIG")]
    config: Option<PathBuf>,

    /// Chunk duration override (e.g. "30s")
    #[arg(long, env = "CHUNKAHEAD_CHUNK_DURATION")]
    chunk_duration: Option<String>,

    /// Tracks to play, in order
    #[arg(
        long,
        env = "CHUNKAHEAD_TRACKS",
        value_delimiter = ',',
        default_value = "track-a,track-b"
    )]
    tracks: Vec<String>,

    /// Audio time played per track (e.g. "4m")
    #[arg(long, env = "CHUNKAHEAD_PLAYBACK", default_value = "4m")]
    playback: String,

    /// Audio time between simulated preset switches
    #[arg(long, env = "CHUNKAHEAD_SWITCH_EVERY", default_value = "45s")]
    switch_every: String,

    /// Wall-clock time between position reports
    #[arg(long, env = "CHUNKAHEAD_TICK", default_value = "50ms")]
    tick: String,

    /// Audio seconds advanced per wall-clock second
    #[arg(long, env = "CHUNKAHEAD_SPEED", default_value = "60")]
    speed: f64,

    /// Bytes produced per processed chunk
    #[arg(long, env = "CHUNKAHEAD_CHUNK_BYTES", default_value = "262144")]
    chunk_bytes: usize,

    /// Simulated processing latency per chunk
    #[arg(long, env = "CHUNKAHEAD_PROCESSING_LATENCY", default_value = "20ms")]
    processing_latency: String,

    /// Serve the management surface on this address and keep running until Ctrl-C
    #[arg(long, env = "CHUNKAHEAD_HTTP_ADDR")]
    http_addr: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = load_config(&args)?;
    info!("Starting chunkahead");
    info!("  Chunk duration: {:?}", config.chunk_duration);
    info!(
        "  Tier budgets: hot={}B warm={}B cold={}B",
        config.hot_capacity_bytes, config.warm_capacity_bytes, config.cold_capacity_bytes
    );
    info!("  Tracks: {}", args.tracks.join(", "));

    let source = SyntheticSource::new(11_025, Duration::from_secs(2));
    let manager = Arc::new(BufferManager::new(config)?.with_sample_source(Arc::new(source)));

    let latency = parse_duration(&args.processing_latency)?;
    let processor: Arc<dyn ChunkProcessor> =
        Arc::new(SyntheticProcessor::new(args.chunk_bytes).with_latency(latency));
    let worker = BufferWorker::new(Arc::clone(&manager), Arc::clone(&processor));
    worker.start()?;

    if let Some(addr) = args.http_addr.clone() {
        let state = Arc::new(AppState {
            manager: Arc::clone(&manager),
            exporter: MetricsExporter::new()?,
        });
        tokio::spawn(async move {
            if let Err(e) = run_http_server(&addr, state).await {
                error!("HTTP server error: {}", e);
            }
        });
    }

    let session = SessionPlan {
        playback: parse_duration(&args.playback)?,
        switch_every: parse_duration(&args.switch_every)?,
        tick: parse_duration(&args.tick)?,
        speed: args.speed,
    };
    let report = simulate(&manager, processor.as_ref(), &args.tracks, &session).await?;

    info!(
        served = report.served,
        misses = report.misses,
        hot = report.hot_hits,
        hit_ratio = report.hit_ratio(),
        "Session complete"
    );
    match serde_json::to_string(&manager.stats()) {
        Ok(json) => info!("Buffer stats: {}", json),
        Err(e) => warn!("Failed to serialize stats: {}", e),
    }

    if args.http_addr.is_some() {
        info!("Serving management endpoints, press Ctrl-C to exit");
        tokio::signal::ctrl_c().await?;
    }

    worker.stop().await?;
    info!("Shutdown complete");
    Ok(())
}

fn load_config(args: &Args) -> Result<BufferConfig> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            BufferConfig::from_yaml_file(path)?
        }
        None => BufferConfig::default(),
    };
    if let Some(raw) = &args.chunk_duration {
        config.chunk_duration = parse_duration(raw)?;
    }
    config.validate()?;
    Ok(config)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    if let Ok(directive) = "hyper=warn".parse() {
        filter = filter.add_directive(directive);
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Session Simulation
// =============================================================================

/// Preset sequence the simulated listener cycles through
const PRESET_CYCLE: [Preset; 5] = [
    Preset::Adaptive,
    Preset::Punchy,
    Preset::Adaptive,
    Preset::Warm,
    Preset::Punchy,
];

struct SessionPlan {
    playback: Duration,
    switch_every: Duration,
    tick: Duration,
    speed: f64,
}

#[derive(Debug, Default)]
struct SessionReport {
    served: u64,
    hot_hits: u64,
    misses: u64,
}

impl SessionReport {
    fn hit_ratio(&self) -> f64 {
        let total = self.served + self.misses;
        if total == 0 {
            0.0
        } else {
            self.served as f64 / total as f64
        }
    }
}

async fn simulate(
    manager: &BufferManager,
    processor: &dyn ChunkProcessor,
    tracks: &[String],
    plan: &SessionPlan,
) -> Result<SessionReport> {
    let mut report = SessionReport::default();
    let step = plan.tick.as_secs_f64() * plan.speed;
    if step <= 0.0 {
        return Err(Error::Config("tick and speed must be positive".to_string()));
    }
    let switch_every = plan.switch_every.as_secs_f64().max(step);
    let mut ticker = tokio::time::interval(plan.tick);

    for track in tracks {
        info!(track = %track, "Playing track");
        let mut position = 0.0;
        while position < plan.playback.as_secs_f64() {
            ticker.tick().await;

            let preset = PRESET_CYCLE[(position / switch_every) as usize % PRESET_CYCLE.len()];
            manager.update_position(track, position, preset, 1.0)?;

            let chunk = manager.config().chunk_index(position);
            match manager.get(track, chunk, preset) {
                Some(hit) => {
                    report.served += 1;
                    if hit.tier == TierLevel::Hot {
                        report.hot_hits += 1;
                    }
                }
                None => {
                    report.misses += 1;
                    // Render in the request path and keep the result
                    match processor.process(track, chunk, preset, 1.0).await {
                        Ok(data) => {
                            let key = chunkahead::ChunkKey::new(track.as_str(), chunk, preset, 1.0);
                            if let Err(e) = manager.insert(key, data, TierLevel::Hot, 1.0) {
                                warn!(error = %e, "Could not cache synchronously processed chunk");
                            }
                        }
                        Err(e) => warn!(
                            track = %track,
                            chunk,
                            error = %e,
                            "Synchronous processing failed"
                        ),
                    }
                }
            }

            position += step;
        }
    }

    Ok(report)
}

// =============================================================================
// HTTP Management Surface
// =============================================================================

struct AppState {
    manager: Arc<BufferManager>,
    exporter: MetricsExporter,
}

async fn run_http_server(addr: &str, state: Arc<AppState>) -> Result<()> {
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Internal(format!("Invalid HTTP server address: {}", e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind HTTP server: {}", e)))?;

    info!("HTTP server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| Error::Internal(format!("HTTP server accept error: {}", e)))?;

        let io = TokioIo::new(stream);
        let state = Arc::clone(&state);

        tokio::spawn(async move {
            let service = service_fn(move |req| route(req, Arc::clone(&state)));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("HTTP connection error: {}", e);
            }
        });
    }
}

type HttpResponse = hyper::Response<http_body_util::Full<bytes::Bytes>>;

async fn route(
    req: hyper::Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> std::result::Result<HttpResponse, std::convert::Infallible> {
    use hyper::StatusCode;

    let manager = &state.manager;
    let response = match req.uri().path() {
        "/healthz" => {
            let health = manager.health();
            let status = if health.status.is_operational() {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            json_response(status, &health)
        }
        "/metrics" => {
            state.exporter.update(&manager.stats(), &manager.health());
            match state.exporter.encode() {
                Ok(text) => respond(StatusCode::OK, state.exporter.format_type(), text),
                Err(e) => respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", e.to_string()),
            }
        }
        "/stats" => json_response(StatusCode::OK, &manager.stats()),
        "/predictions" => json_response(StatusCode::OK, &manager.predictions(3)),
        "/entries" => {
            let track = req
                .uri()
                .query()
                .and_then(|q| q.split('&').find_map(|kv| kv.strip_prefix("track=")));
            match track {
                Some(track) => json_response(StatusCode::OK, &manager.entries_for_track(track)),
                None => respond(StatusCode::BAD_REQUEST, "text/plain", "missing track parameter"),
            }
        }
        _ => respond(StatusCode::NOT_FOUND, "text/plain", "not found"),
    };
    Ok(response)
}

fn json_response<T: serde::Serialize>(status: hyper::StatusCode, value: &T) -> HttpResponse {
    match serde_json::to_vec(value) {
        Ok(body) => respond(status, "application/json", body),
        Err(e) => respond(
            hyper::StatusCode::INTERNAL_SERVER_ERROR,
            "text/plain",
            e.to_string(),
        ),
    }
}

fn respond(
    status: hyper::StatusCode,
    content_type: &'static str,
    body: impl Into<bytes::Bytes>,
) -> HttpResponse {
    let mut response = hyper::Response::new(http_body_util::Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static(content_type),
    );
    response
}
