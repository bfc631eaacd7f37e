pub mod bundle_download;
pub mod chain;
pub mod challenges;
pub mod engine;
pub mod env;
pub mod failed_challenges;
pub mod prometheus_metrics;
pub mod repository;
pub mod runtime;
pub mod store;
pub mod tracing;
pub mod uploads;
pub mod utils;
pub mod worker_logs;
pub mod workers;
