mod errors;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::catalog::ProcessCatalog;
use crate::engine::Engine;
use crate::handlers::HandlerRegistry;
use crate::storage::StateStore;

/// Shared application state accessible by all handlers.
pub struct AppState {
    pub engine: Arc<Engine>,
    pub catalog: Arc<ProcessCatalog>,
    pub store: Arc<dyn StateStore>,
    pub handlers: Arc<HandlerRegistry>,
}

/// Build the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/processes", get(handlers::list_processes))
        .route("/processes/{name}/run", post(handlers::run_process))
        .route(
            "/processes/{name}/runs/{id}/cancel",
            post(handlers::cancel_run),
        )
        .route("/runs/{id}", get(handlers::get_run))
        .route("/handlers", get(handlers::list_handlers))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the REST API server.
pub async fn serve(
    host: &str,
    port: u16,
    engine: Arc<Engine>,
    catalog: Arc<ProcessCatalog>,
    store: Arc<dyn StateStore>,
) -> Result<()> {
    let state = Arc::new(AppState {
        engine,
        catalog,
        store,
        handlers: Arc::new(HandlerRegistry::with_builtins()),
    });

    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("procflow API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
