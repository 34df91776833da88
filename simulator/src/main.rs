mod reading;

use axum::{extract::State, routing::get, Json, Router};
use clap::Parser;
use reading::EngineReading;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

/// Serves random engine readings over HTTP, one per request.
#[derive(Debug, Parser)]
#[command(name = "engine-simulator")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "SIMULATOR_ADDR", default_value = "0.0.0.0:8080")]
    addr: String,

    /// Share of readings with an outlier value in [0, 1]
    #[arg(long, env = "OUTLIER_RATE", default_value_t = 0.05)]
    outlier_rate: f64,
}

#[derive(Clone)]
struct AppState {
    outlier_rate: f64,
    served: Arc<AtomicU64>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting engine simulator");
    info!("Listening on {}, outlier rate {}", args.addr, args.outlier_rate);

    let state = AppState {
        outlier_rate: args.outlier_rate.clamp(0.0, 1.0),
        served: Arc::new(AtomicU64::new(0)),
    };

    let app = Router::new()
        .route("/api/engine", get(engine_reading))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&args.addr)
        .await
        .unwrap_or_else(|e| {
            error!("Failed to bind to {}: {}", args.addr, e);
            std::process::exit(1);
        });

    if let Err(e) = axum::serve(listener, app).await {
        error!("HTTP server error: {}", e);
    }
}

async fn engine_reading(State(state): State<AppState>) -> Json<EngineReading> {
    let reading = reading::generate(&mut rand::thread_rng(), state.outlier_rate);

    let served = state.served.fetch_add(1, Ordering::Relaxed) + 1;
    if served % 1000 == 0 {
        info!("Served {} readings", served);
    }
    debug!("Serving {:?}", reading);

    Json(reading)
}
