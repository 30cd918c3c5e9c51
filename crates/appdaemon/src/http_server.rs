//! HTTP server for the Prometheus metrics and service status endpoints.

use crate::metrics::MetricsRegistry;
use crate::registry::Registry;
use crate::types::ServiceRecord;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Clone)]
struct AppState {
    metrics: Arc<MetricsRegistry>,
    registry: Arc<Registry>,
}

/// HTTP server for `/metrics` and `/services`
pub struct MetricsServer {
    listener: TcpListener,
    state: AppState,
}

impl MetricsServer {
    /// Bind the listen address
    pub async fn bind(
        addr: impl ToSocketAddrs,
        metrics: Arc<MetricsRegistry>,
        registry: Arc<Registry>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            state: AppState { metrics, registry },
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) -> io::Result<()> {
        let addr = self.listener.local_addr()?;
        info!(listen_addr = %addr, "Metrics server listening");

        let app = router(self.state);
        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await?;

        info!("Metrics server stopped");
        Ok(())
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/services", get(services_handler))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Handler for /metrics endpoint
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics.encode() {
        Ok(buffer) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            buffer,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
                .into_response()
        }
    }
}

/// Handler for /services: the registry snapshot as JSON
async fn services_handler(State(state): State<AppState>) -> Json<Vec<ServiceRecord>> {
    Json(state.registry.snapshot().await)
}
