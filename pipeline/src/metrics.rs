use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref READINGS_FETCHED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "pipeline_readings_fetched_total",
        "Total readings fetched from the upstream source"
    ))
    .unwrap();
    pub static ref FETCH_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "pipeline_fetch_failures_total",
        "Total poll ticks that produced no reading"
    ))
    .unwrap();
    pub static ref DELIVERIES_REJECTED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "pipeline_deliveries_rejected_total",
        "Total subscriber deliveries dropped because the worker pool was saturated"
    ))
    .unwrap();
    pub static ref FORWARDED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "pipeline_forwarded_total",
        "Total readings acknowledged by the message bus"
    ))
    .unwrap();
    pub static ref FORWARD_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "pipeline_forward_failures_total",
        "Total readings the message bus did not acknowledge"
    ))
    .unwrap();
    pub static ref ENQUEUED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "pipeline_enqueued_total",
        "Total readings appended to the durable queue"
    ))
    .unwrap();
    pub static ref ENQUEUE_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "pipeline_enqueue_failures_total",
        "Total readings dropped because the durable queue append failed"
    ))
    .unwrap();
    pub static ref QUEUE_LENGTH: Gauge = Gauge::with_opts(Opts::new(
        "pipeline_queue_length",
        "Durable queue length reported by the last append"
    ))
    .unwrap();
    pub static ref EXTRACTION_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "pipeline_extraction_failures_total",
        "Total queue range/trim failures and undecodable queue entries"
    ))
    .unwrap();
    pub static ref COMMITTED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "pipeline_committed_total",
        "Total records committed to the permanent store"
    ))
    .unwrap();
    pub static ref COMMIT_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "pipeline_commit_failures_total",
        "Total batches lost to a failed or timed-out commit"
    ))
    .unwrap();
    pub static ref BATCH_SIZE: Gauge = Gauge::with_opts(Opts::new(
        "pipeline_batch_size",
        "Size of the last extracted batch"
    ))
    .unwrap();
    pub static ref FLUSH_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "pipeline_flush_latency_seconds",
            "Time taken to extract and commit one batch"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0
        ])
    )
    .unwrap();
}

pub fn init_metrics() {
    REGISTRY
        .register(Box::new(READINGS_FETCHED_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(FETCH_FAILURES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(DELIVERIES_REJECTED_TOTAL.clone()))
        .unwrap();
    REGISTRY.register(Box::new(FORWARDED_TOTAL.clone())).unwrap();
    REGISTRY
        .register(Box::new(FORWARD_FAILURES_TOTAL.clone()))
        .unwrap();
    REGISTRY.register(Box::new(ENQUEUED_TOTAL.clone())).unwrap();
    REGISTRY
        .register(Box::new(ENQUEUE_FAILURES_TOTAL.clone()))
        .unwrap();
    REGISTRY.register(Box::new(QUEUE_LENGTH.clone())).unwrap();
    REGISTRY
        .register(Box::new(EXTRACTION_FAILURES_TOTAL.clone()))
        .unwrap();
    REGISTRY.register(Box::new(COMMITTED_TOTAL.clone())).unwrap();
    REGISTRY
        .register(Box::new(COMMIT_FAILURES_TOTAL.clone()))
        .unwrap();
    REGISTRY.register(Box::new(BATCH_SIZE.clone())).unwrap();
    REGISTRY
        .register(Box::new(FLUSH_LATENCY_SECONDS.clone()))
        .unwrap();
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
