use prometheus::{Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;

pub mod outcome {
    pub const SUCCESS: &str = "success";
    pub const FAILURE: &str = "failure";
    pub const CANCELED: &str = "canceled";
    pub const INSUFFICIENT_FUNDS: &str = "insufficient_funds";
}

pub struct Metrics {
    pub registry: Registry,
    pub upload: Arc<UploadWorkerMetrics>,
    pub challenge: Arc<ChallengeWorkerMetrics>,
}

pub struct UploadWorkerMetrics {
    pub ticks: IntCounter,
    pub tick_outcome: IntCounterVec,
    pub bundles_uploaded: IntCounter,
    pub bundles_retried: IntCounter,
    pub entities_bundled: Gauge,
    pub tick_duration_seconds: Histogram,
}

pub struct ChallengeWorkerMetrics {
    pub ticks: IntCounter,
    pub challenges_seen: IntCounter,
    pub challenges_resolved: IntCounter,
    pub challenges_failed: IntCounter,
}

fn register_int_counter(registry: &Registry, namespace: &str, name: &str, help: &str) -> IntCounter {
    let opts = Opts::new(name, help).namespace(namespace.to_string());
    let counter = IntCounter::with_opts(opts).unwrap();
    registry.register(Box::new(counter.clone())).unwrap();
    counter
}

fn register_int_counter_vec(
    registry: &Registry,
    namespace: &str,
    name: &str,
    help: &str,
    labels: &[&str],
) -> IntCounterVec {
    let opts = Opts::new(name, help).namespace(namespace.to_string());
    let counter = IntCounterVec::new(opts, labels).unwrap();
    registry.register(Box::new(counter.clone())).unwrap();
    counter
}

fn register_gauge(registry: &Registry, namespace: &str, name: &str, help: &str) -> Gauge {
    let opts = Opts::new(name, help).namespace(namespace.to_string());
    let gauge = Gauge::with_opts(opts).unwrap();
    registry.register(Box::new(gauge.clone())).unwrap();
    gauge
}

fn register_histogram(registry: &Registry, namespace: &str, name: &str, help: &str) -> Histogram {
    let opts = HistogramOpts::new(name, help).namespace(namespace.to_string());
    let histogram = Histogram::with_opts(opts).unwrap();
    registry.register(Box::new(histogram.clone())).unwrap();
    histogram
}

impl Metrics {
    pub fn new(namespace: &str) -> Self {
        let registry = Registry::new();

        let upload = UploadWorkerMetrics {
            ticks: register_int_counter(
                &registry,
                namespace,
                "upload_worker_ticks_total",
                "Upload worker ticks",
            ),
            tick_outcome: register_int_counter_vec(
                &registry,
                namespace,
                "upload_worker_tick_outcome_total",
                "Upload worker tick outcomes",
                &["outcome"],
            ),
            bundles_uploaded: register_int_counter(
                &registry,
                namespace,
                "bundles_uploaded_total",
                "Bundles committed on-chain",
            ),
            bundles_retried: register_int_counter(
                &registry,
                namespace,
                "bundles_retried_total",
                "Bundles re-uploaded by the retry sweep",
            ),
            entities_bundled: register_gauge(
                &registry,
                namespace,
                "entities_in_last_bundle",
                "Entities packed into the last bundle",
            ),
            tick_duration_seconds: register_histogram(
                &registry,
                namespace,
                "upload_worker_tick_duration_seconds",
                "Upload worker tick duration",
            ),
        };

        let challenge = ChallengeWorkerMetrics {
            ticks: register_int_counter(
                &registry,
                namespace,
                "challenge_worker_ticks_total",
                "Challenge worker ticks",
            ),
            challenges_seen: register_int_counter(
                &registry,
                namespace,
                "challenges_seen_total",
                "Challenges observed in the on-chain feed",
            ),
            challenges_resolved: register_int_counter(
                &registry,
                namespace,
                "challenges_resolved_total",
                "Challenges resolved by this node",
            ),
            challenges_failed: register_int_counter(
                &registry,
                namespace,
                "challenges_failed_total",
                "Challenge attempts that failed and were negatively cached",
            ),
        };

        Metrics {
            registry,
            upload: Arc::new(upload),
            challenge: Arc::new(challenge),
        }
    }
}
