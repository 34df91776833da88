use axum::{routing::get, Router};
use engine_pipeline::config::Config;
use engine_pipeline::db::{self, PgStore};
use engine_pipeline::metrics;
use engine_pipeline::mqtt::MqttBus;
use engine_pipeline::pipeline::Pipeline;
use engine_pipeline::queue::RedisQueue;
use engine_pipeline::rest;
use engine_pipeline::source::HttpSource;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    if let Err(e) = config.validate() {
        error!("{}", e);
        std::process::exit(1);
    }

    info!("Starting engine pipeline");
    info!("Source: {}", config.source_url);
    info!("MQTT broker: {}:{}, topic: {}", config.mqtt_broker, config.mqtt_port, config.bus_topic);
    info!("Redis: {}, key: {}", config.redis_url, config.queue_key);
    info!("Database: {}", config.database_url.split('@').last().unwrap_or("***"));
    info!("HTTP server: {}", config.http_addr);

    // Initialize metrics
    metrics::init_metrics();

    let pool = match db::make_pool(&config.database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };
    let store = PgStore::new(pool);

    let queue = match RedisQueue::connect(&config.redis_url, &config.queue_key, config.timeouts.queue).await {
        Ok(queue) => queue,
        Err(e) => {
            error!("Failed to connect to durable queue: {}", e);
            std::process::exit(1);
        }
    };

    let source = match HttpSource::new(&config.source_url, config.timeouts.fetch) {
        Ok(source) => source,
        Err(e) => {
            error!("Failed to build upstream client: {}", e);
            std::process::exit(1);
        }
    };

    let client_id = format!("engine-pipeline-{}", uuid::Uuid::new_v4());
    let bus = MqttBus::connect(config.mqtt_broker.clone(), config.mqtt_port, client_id);

    let pipeline = Pipeline::build(
        &config,
        Arc::new(source),
        Arc::new(bus),
        Arc::new(queue),
        Arc::new(store.clone()),
    );
    let tasks = pipeline.spawn();

    // Build HTTP app with REST API and metrics endpoint
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(store));

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .unwrap_or_else(|e| {
            error!("Failed to bind to {}: {}", config.http_addr, e);
            std::process::exit(1);
        });

    info!("HTTP server listening on {}", config.http_addr);

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap_or_else(|e| {
            error!("HTTP server error: {}", e);
        });
    });

    tokio::select! {
        _ = tasks.poller => {
            error!("Poller task terminated");
        }
        _ = tasks.flusher => {
            error!("Flusher task terminated");
        }
        _ = server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    // readings in the worker pool or still queued are not drained
    info!("Shutting down");
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
