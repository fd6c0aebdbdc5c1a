//! HTTP router
//!
//! Defines the axum router with the user search endpoints.

use axum::{Router, http::HeaderName, routing::get};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::cursor::CursorPool;
use crate::engine::Executor;
use crate::handler::{REQUEST_ID_HEADER, health_check, new_user_search, next_user_page};

/// Create the main router
pub fn create_router<E: Executor>(pool: CursorPool<E>) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    Router::new()
        .route("/health", get(health_check::<E>))
        .route("/users", get(new_user_search::<E>))
        .route("/users/{cursor}", get(next_user_page::<E>))
        // Middleware layers; the last one added runs first
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .with_state(pool)
}
