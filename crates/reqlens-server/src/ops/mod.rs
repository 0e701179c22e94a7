//! Administrative HTTP endpoints.
//!
//! - `/metrics`        : registry export, Prometheus text format
//! - `/check`, `/health`: liveness
//! - `/debug/pprof/*`  : profiling (see [`profiling`])

pub mod profiling;

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio_metrics::TaskMonitor;
use tower_http::catch_panic::CatchPanicLayer;

use reqlens_core::metrics::MetricRegistry;

use crate::config::AdminConfig;
use crate::router::recover_panic;

/// State of the administrative router. Shares nothing with the data plane
/// except the registry (and the read side of the task monitor).
#[derive(Clone)]
pub struct AdminState {
    inner: Arc<AdminStateInner>,
}

struct AdminStateInner {
    cfg: AdminConfig,
    registry: Arc<MetricRegistry>,
    monitor: Option<TaskMonitor>,
    cpu_profile: Arc<tokio::sync::Mutex<()>>,
}

impl AdminState {
    pub fn new(cfg: AdminConfig, registry: Arc<MetricRegistry>, monitor: Option<TaskMonitor>) -> Self {
        Self {
            inner: Arc::new(AdminStateInner {
                cfg,
                registry,
                monitor,
                cpu_profile: Arc::new(tokio::sync::Mutex::new(())),
            }),
        }
    }

    pub fn cfg(&self) -> &AdminConfig {
        &self.inner.cfg
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.inner.registry
    }

    pub fn task_monitor(&self) -> Option<&TaskMonitor> {
        self.inner.monitor.as_ref()
    }

    /// Held for the duration of one CPU profile.
    pub(crate) fn cpu_profile_lock(&self) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(&self.inner.cpu_profile)
    }
}

pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/check", get(check))
        .route("/health", get(check))
        .route("/debug/pprof/", get(profiling::index))
        .route("/debug/pprof/cmdline", get(profiling::cmdline))
        .route("/debug/pprof/profile", get(profiling::profile))
        .route("/debug/pprof/heap", get(profiling::heap))
        .route("/debug/pprof/symbol", get(profiling::symbol).post(profiling::symbol))
        .route("/debug/pprof/trace", get(profiling::trace))
        .route("/debug/pprof/tasks", get(profiling::tasks))
        .layer(CatchPanicLayer::custom(recover_panic))
        .with_state(state)
}

pub async fn check() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        r#"{"alive": true}"#,
    )
}

pub async fn metrics(State(state): State<AdminState>) -> Response {
    let body = state.registry().render();

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}
