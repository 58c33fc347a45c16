//! HTTP endpoint serving the metric registry to Prometheus

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use log::{error, info};
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, sync::watch};

use crate::metrics::StreamMetrics;

const TEXT_FORMAT: &str = "text/plain; version=0.0.4; charset=utf-8";

pub fn router(metrics: Arc<StreamMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(handle_metrics))
        .route("/health", get(handle_health))
        .with_state(metrics)
}

/// Serve `/metrics` on `listen` until `shutdown` flips to `true`.
pub async fn serve(
    listen: SocketAddr,
    metrics: Arc<StreamMetrics>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(listen).await?;
    info!("Prometheus metrics available at http://{listen}/metrics");

    axum::serve(listener, router(metrics))
        .with_graceful_shutdown(async move {
            // Err means the sender is gone, which is a shutdown too
            let _ = shutdown.wait_for(|stop| *stop).await;
            info!("Metrics server received shutdown signal, stopping...");
        })
        .await?;

    info!("Metrics server stopped");
    Ok(())
}

async fn handle_metrics(State(metrics): State<Arc<StreamMetrics>>) -> Response {
    match metrics.encode() {
        Ok(text) => ([(header::CONTENT_TYPE, TEXT_FORMAT)], text).into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Encoding error: {e}")).into_response()
        }
    }
}

async fn handle_health() -> &'static str {
    "ok"
}
