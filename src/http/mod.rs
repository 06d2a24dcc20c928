//! HTTP API.
//!
//! An `axum::Router<SharedState>` built from an `AppState` wrapped in
//! `Arc`, one handler per verb/path, over a collection-generic shape
//! (`/api/collections/<C>/records`) plus the explicit workflow verbs. The
//! router is the sole ingress for network clients and for the CLI hybrid
//! router's network path: it implements no transactional logic of its
//! own — every handler here calls straight into
//! `workflow.rs`/`store::*`/`session.rs`, the same functions the CLI's
//! direct path calls.

mod collections;
mod realtime;
mod workflow_routes;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;

use crate::broadcast::Bus;
use crate::store::Store;

/// Configuration for `egenskriven serve`.
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    /// Relaxes CORS for a locally-run UI dev server talking cross-origin.
    pub dev_mode: bool,
}

/// Shared application state threaded through every handler. This crate's
/// ambient state is exactly the Store and the Broadcast bus, passed
/// explicitly to constructors rather than relied on as ambient globals.
pub struct AppState {
    pub store: Arc<Store>,
    pub bus: Bus,
}

pub type SharedState = Arc<AppState>;

/// Build the full application router: collection CRUD, workflow verbs,
/// realtime SSE, health probe. The CLI's reachability probe hits
/// `GET /api/health`.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route(
            "/api/collections/{collection}/records",
            get(collections::list_records).post(collections::create_record),
        )
        .route(
            "/api/collections/{collection}/records/{id}",
            get(collections::get_record)
                .patch(collections::update_record)
                .delete(collections::delete_record),
        )
        .route("/api/realtime", get(realtime::realtime_handler))
        .route("/api/workflow/move", post(workflow_routes::move_task))
        .route("/api/workflow/block", post(workflow_routes::block))
        .route("/api/workflow/comment", post(workflow_routes::comment))
        .route("/api/workflow/resume", post(workflow_routes::resume))
        .route("/api/workflow/session/link", post(workflow_routes::session_link))
        .route(
            "/api/workflow/session/unlink",
            post(workflow_routes::session_unlink),
        )
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

/// Start the HTTP API: open the store, spawn the auto-resume watcher,
/// bind the router, and run until `ctrl_c`.
pub async fn serve(config: ServerConfig, bus: Bus) -> Result<()> {
    let store = Arc::new(Store::open(&config.db_path, bus.clone()).context("failed to open store")?);
    let _watcher = crate::watcher::spawn(store.clone(), bus.clone());

    let state: SharedState = Arc::new(AppState { store, bus });
    let mut app = build_router(state);
    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "egenskriven serve listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_state() -> SharedState {
        let bus = Bus::new();
        let store = Arc::new(Store::open_in_memory(bus.clone()).unwrap());
        Arc::new(AppState { store, bus })
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = build_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_collection_returns_not_found() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/collections/widgets/records")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
