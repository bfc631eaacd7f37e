use ambrosus_node_core::chain::wait_for_chain_sync;
use ambrosus_node_core::runtime::{EnvVars, NodeRuntime};
use ambrosus_node_core::tracing as tracing_config;
use ambrosus_node_service_lib::common::AppState;
use ambrosus_node_service_lib::server::launch_server;
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let env_vars = EnvVars::init_from_env_or_crash();
    tracing_config::setup_logger(
        tracing_config::LoggingConfig::default()
            .use_format(env_vars.log_format.value.clone())
            .with_thread_names(true),
    );

    let runtime = NodeRuntime::init(&env_vars).expect("Failed to initialize node runtime");
    let state = Arc::new(AppState { env_vars, runtime });
    state.log_config_full();

    wait_for_chain_sync(
        &state.runtime.eth_infra.chain_status,
        state.runtime.settings.chain_sync_poll,
        |status| tracing::info!(status = ?status, "Waiting for chain to sync"),
    )
    .await
    .expect("Chain sync check failed");

    state
        .runtime
        .engine
        .release_orphaned_claims()
        .await
        .expect("Failed to release orphaned bundle claims");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = if ambrosus_node_core::utils::read_env("WORKERS_ENABLED", true) {
        state.runtime.spawn_workers(shutdown_rx)
    } else {
        tracing::info!("Workers disabled");
        vec![]
    };

    let bind_to = state.env_vars.service_bind_to_addr.value.clone();
    if let Err(e) = launch_server(Arc::clone(&state), &bind_to).await {
        tracing::error!("Server terminated with error: {e:?}");
    }

    tracing::info!("Stopping workers");
    let _ = shutdown_tx.send(true);
    for worker in workers {
        let _ = worker.await;
    }
}
