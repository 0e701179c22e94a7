//! Data-plane router wiring.
//!
//! Two demo routes (`/test`, `/hello`), instrumented per route template.
//! Unmatched requests answer 404 without being instrumented.

use std::any::Any;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tower_http::catch_panic::CatchPanicLayer;

use crate::app_state::AppState;

pub fn build_router(state: &AppState) -> Router {
    Router::new()
        .route("/test", get(test))
        .route("/hello", get(hello))
        .route_layer(state.metrics_layer())
        .layer(CatchPanicLayer::custom(recover_panic))
}

async fn test() -> &'static str {
    "ok"
}

async fn hello() -> &'static str {
    "hello,world"
}

/// Handler panics become a logged 500; the connection stays up.
pub fn recover_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic payload"
    };
    tracing::error!(panic = detail, "handler panicked");

    (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
}
