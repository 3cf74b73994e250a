//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::handler::{rate_limited, RequestHandler};
use crate::error::{QuotaMockError, Result};
use crate::metrics::InMemoryMetrics;

/// Router for the rate-limited API: every GET path goes to the handler.
pub fn build_router(handler: RequestHandler) -> Router {
    Router::new()
        .route("/{*path}", get(rate_limited))
        .layer(TraceLayer::new_for_http())
        .with_state(handler)
}

/// Router for the management listener.
pub fn build_management_router(metrics: Arc<InMemoryMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_snapshot))
        .route("/health", get(health))
        .with_state(metrics)
}

async fn metrics_snapshot(State(metrics): State<Arc<InMemoryMetrics>>) -> Json<Value> {
    Json(metrics.snapshot())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// An HTTP listener bound to one address.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    router: Router,
    /// Label used in logs
    name: &'static str,
}

impl HttpServer {
    /// Create a server for the rate-limited API.
    pub fn new(addr: SocketAddr, handler: RequestHandler) -> Self {
        Self {
            addr,
            router: build_router(handler),
            name: "api",
        }
    }

    /// Create a server for metrics and health checks.
    pub fn management(addr: SocketAddr, metrics: Arc<InMemoryMetrics>) -> Self {
        Self {
            addr,
            router: build_management_router(metrics),
            name: "management",
        }
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;

        info!(
            server = self.name,
            addr = %self.addr,
            "Starting HTTP server with graceful shutdown"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(server = self.name, error = %e, "HTTP server failed");
                QuotaMockError::Http(e.to_string())
            })
    }
}
