//! API Routes for memos
//!
//! This module combines all API routes into a single router.
//! Routes are organized by domain and apply appropriate middleware.

mod auth;
mod memos;
mod resources;
pub mod status;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::middleware::require_session;
use crate::AppState;

/// Build the complete API router.
///
/// Route structure:
/// - /auth/* - Authentication (public + session-protected)
/// - /memos/* - Memo CRUD (session-protected)
/// - /uploads/* - Attachment downloads (session-protected)
/// - /resources/* - Attachment management (session-protected)
/// - /health - Health check (public)
pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        // Health endpoint (public)
        .merge(status::routes())
        // Authentication routes (mixed public/protected)
        .nest("/auth", auth::routes(state.clone()))
        // Everything else needs a session
        .merge(protected_routes(state))
}

/// Protected routes that require a session.
fn protected_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .nest("/memos", memos::routes())
        .nest("/uploads", resources::upload_routes())
        .nest("/resources", resources::routes())
        .layer(axum::middleware::from_fn_with_state(state, require_session))
}

/// Build the application with its HTTP layers applied.
///
/// Multipart bodies are buffered per file, so the extractor's default cap is
/// replaced by one limit on the whole request body.
pub fn app(state: AppState, server: &ServerConfig) -> Router {
    Router::new()
        .merge(routes(state.clone()))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(server.max_request_size))
        .layer(TimeoutLayer::new(server.request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
