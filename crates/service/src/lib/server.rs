use crate::common::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/bundles/{bundle_id}", get(get_bundle))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn launch_server(state: Arc<AppState>, bind_to: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = bind_to.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Starting service at {:?}", addr);

    let app = build_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let families = state.runtime.metrics.registry.gather();
    encoder.encode(&families, &mut buffer).unwrap();
    Response::builder()
        .header("Content-Type", encoder.format_type())
        .body(buffer.into())
        .unwrap()
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

/// Peer-facing bundle endpoint: shelterers serve their bundles here so other
/// nodes can resolve challenges against them.
async fn get_bundle(
    State(state): State<Arc<AppState>>,
    Path(bundle_id): Path<String>,
) -> Result<Json<ambrosus_node_shared::entities::Bundle>, (StatusCode, Json<ErrorBody>)> {
    match state.runtime.engine.get_bundle(&bundle_id).await {
        Ok(Some(bundle)) => Ok(Json(bundle)),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                message: format!("No bundle with id {bundle_id}"),
            }),
        )),
        Err(e) => {
            tracing::error!("Failed to read bundle {bundle_id}: {e:?}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    message: e.to_string(),
                }),
            ))
        }
    }
}
