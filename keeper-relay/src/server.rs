//! Axum router setup.

use crate::auth::{auth_middleware, connection_middleware};
use crate::config::RelayConfig;
use crate::handlers::{auth, secrets, updates};
use crate::service::RelayService;
use axum::middleware;
use axum::routing::{get, post, put};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RelayService>,
}

impl AppState {
    pub fn new(service: RelayService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}

pub fn build_router(state: AppState, config: &RelayConfig) -> Router {
    // Authenticated routes
    let authenticated = Router::new()
        .route(
            "/api/v1/secrets",
            put(secrets::set_secret).get(secrets::list_secrets),
        )
        .route("/api/v1/sync", post(secrets::sync_secrets))
        .route("/api/v1/updates", get(updates::updates))
        .route(
            "/api/v1/secrets/{name}",
            get(secrets::get_secret).delete(secrets::delete_secret),
        )
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(middleware::from_fn(connection_middleware));

    // Numbered but unauthenticated
    let numbered = Router::new()
        .route("/api/v1/auth/register", post(auth::register))
        .route("/api/v1/auth/login", post(auth::login))
        .layer(middleware::from_fn(connection_middleware));

    let public = Router::new()
        .route("/api/v1/connection", post(auth::connection))
        .route("/health", get(health));

    Router::new()
        .merge(authenticated)
        .merge(numbered)
        .merge(public)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(config.max_payload_size))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
