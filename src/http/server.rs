//! HTTP server for the JSON API

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tracing::info;

use super::handler::{clean_handler, extract_handler, query_handler, status_handler};
use super::AppState;

/// Router with every API route mounted
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/clean", post(clean_handler))
        .route("/api/query", post(query_handler))
        .route("/api/extract", post(extract_handler))
        .route("/api/status", get(status_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub struct HttpServer {
    state: AppState,
    port: u16,
}

impl HttpServer {
    pub fn new(state: AppState, port: u16) -> Self {
        Self { state, port }
    }

    /// Bind and serve until the process stops
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error>> {
        let app = build_router(self.state.clone());

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        info!("API available at http://localhost:{}/api/status", self.port);

        axum::serve(listener, app).await?;

        Ok(())
    }
}
