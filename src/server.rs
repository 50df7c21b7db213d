// src/server.rs
use std::{future::Future, sync::Arc};

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

use crate::handlers::*;
use crate::state::AppState;

/// Room for multipart boundaries and headers around the firmware part.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = usize::try_from(state.config.max_artifact_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);
    let request_timeout = state.config.request_timeout;

    Router::new()
        .route("/health", get(health))
        // device-facing
        .route("/device-ping", get(device_ping))
        .route("/trigger-update", get(trigger_update))
        // operator-facing
        .route("/check-device", get(check_device))
        .route("/update-link/:device", post(update_link))
        .route("/upload/:device", post(upload))
        .route("/all-updates", get(all_updates))
        .route("/devices", get(list_devices))
        // firmware_<device>.bin
        .route("/:file", get(download))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    info!("OTA server listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
