//! Shared application state.
//!
//! Owns the metric registry and the request instruments. Startup errors are
//! explicit: a registration conflict on the request instruments fails the
//! process instead of serving uninstrumented traffic.

use std::sync::Arc;

use tokio_metrics::TaskMonitor;

use reqlens_core::error::Result;
use reqlens_core::metrics::MetricRegistry;

use crate::config::{AdminConfig, ReqlensConfig};
use crate::middleware::MetricsLayer;
use crate::obs::HttpMetrics;
use crate::ops::AdminState;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    cfg: ReqlensConfig,
    registry: Arc<MetricRegistry>,
    http: HttpMetrics,
    monitor: TaskMonitor,
}

impl AppState {
    pub fn new(cfg: ReqlensConfig) -> Result<Self> {
        Self::with_registry(cfg, Arc::new(MetricRegistry::new()))
    }

    /// Build on an existing registry (e.g. one that already holds
    /// application instruments).
    pub fn with_registry(cfg: ReqlensConfig, registry: Arc<MetricRegistry>) -> Result<Self> {
        let http = HttpMetrics::register(Arc::clone(&registry))?;
        tracing::debug!(instruments = registry.len(), "request instruments registered");

        Ok(Self {
            inner: Arc::new(AppStateInner {
                cfg,
                registry,
                http,
                monitor: TaskMonitor::new(),
            }),
        })
    }

    pub fn cfg(&self) -> &ReqlensConfig {
        &self.inner.cfg
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.inner.registry
    }

    pub fn http_metrics(&self) -> &HttpMetrics {
        &self.inner.http
    }

    pub fn task_monitor(&self) -> &TaskMonitor {
        &self.inner.monitor
    }

    /// Instrumentation layer for data-plane routes.
    pub fn metrics_layer(&self) -> MetricsLayer {
        MetricsLayer::new(self.inner.http.clone()).with_task_monitor(self.inner.monitor.clone())
    }

    /// State for the administrative router, sharing this registry.
    pub fn admin_state(&self, cfg: AdminConfig) -> AdminState {
        AdminState::new(
            cfg,
            Arc::clone(&self.inner.registry),
            Some(self.task_monitor().clone()),
        )
    }
}
