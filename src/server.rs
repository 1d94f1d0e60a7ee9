//! HTTP server hosting routes behind the rate limiter.

use std::future::Future;
use std::net::SocketAddr;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::{Result, TollgateError};
use crate::middleware::RateLimitLayer;

/// Path of the liveness route. Deployments usually skip limiting here.
pub const HEALTH_PATH: &str = "/health";

/// Build the application router with the rate limiter applied to every route.
pub fn router(rate_limit: RateLimitLayer) -> Router {
    Router::new()
        .route("/", get(index))
        .route(HEALTH_PATH, get(health))
        .layer(rate_limit)
}

async fn index() -> Json<Value> {
    Json(json!({ "message": "ok" }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

/// HTTP server for the rate limited service.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The application routes
    router: Router,
}

impl HttpServer {
    /// Create a new server with the default routes.
    pub fn new(addr: SocketAddr, rate_limit: RateLimitLayer) -> Self {
        Self::with_router(addr, router(rate_limit))
    }

    /// Create a new server around a caller-built router.
    pub fn with_router(addr: SocketAddr, router: Router) -> Self {
        Self { addr, router }
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server stops accepting connections when `signal` resolves and
    /// returns once in-flight requests finish.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;

        info!(addr = %local_addr, "Starting HTTP server");

        // Peer addresses feed the default identifier extractor.
        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            TollgateError::Io(e)
        })
    }
}
