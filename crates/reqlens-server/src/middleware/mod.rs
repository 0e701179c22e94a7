//! Request instrumentation middleware.
//!
//! [`MetricsLayer`] wraps any `Service<Request<_>, Response = Response<_>>`
//! and leaves its behavior untouched: same status, headers, body and errors.
//! On the side it counts the request and records its duration, labeled by
//! route template, method and status class.
//!
//! - A [`RequestTimer`] is started when the request enters the service.
//! - Once the inner service answers, the timer moves into the response body
//!   ([`InstrumentedBody`]), so the duration covers the last byte written.
//! - Dropping the timer records the request. Errors are labeled `5xx`,
//!   requests dropped before a response exists are labeled `aborted`.
//! - Panics from the inner service are labeled `5xx`, recorded, and then
//!   resumed so the outer recovery layer still sees and logs them.
//! - When an outer write timeout drops the request, the [`WriteDeadline`]
//!   it left in the request extensions lets the timer record the `408` the
//!   client receives instead of `aborted`.
//!
//! Recording never fails the request: registry errors are logged and dropped.

pub mod body;
pub mod timer;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::extract::MatchedPath;
use axum::http::{Request, Response};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio_metrics::TaskMonitor;
use tower::{Layer, Service};

use crate::obs::{method_label, HttpMetrics};

pub use body::InstrumentedBody;
pub use timer::RequestTimer;

/// Route label for requests that did not match a route template.
pub const UNMATCHED_ROUTE: &str = "unmatched";

/// Request extension: the instant at which an outer timeout answers `408`.
#[derive(Debug, Clone, Copy)]
pub struct WriteDeadline(pub Instant);

#[derive(Clone)]
pub struct MetricsLayer {
    metrics: HttpMetrics,
    route: Option<Arc<str>>,
    monitor: Option<TaskMonitor>,
}

impl MetricsLayer {
    pub fn new(metrics: HttpMetrics) -> Self {
        Self {
            metrics,
            route: None,
            monitor: None,
        }
    }

    /// Use a fixed route label instead of the matched route template.
    pub fn with_route(mut self, route: impl Into<Arc<str>>) -> Self {
        self.route = Some(route.into());
        self
    }

    /// Also instrument each request future with a tokio task monitor.
    pub fn with_task_monitor(mut self, monitor: TaskMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = Instrumented<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Instrumented {
            inner,
            layer: self.clone(),
        }
    }
}

/// Service produced by [`MetricsLayer`].
#[derive(Clone)]
pub struct Instrumented<S> {
    inner: S,
    layer: MetricsLayer,
}

impl<S> Instrumented<S> {
    fn route_label<B>(&self, req: &Request<B>) -> String {
        if let Some(route) = &self.layer.route {
            return route.to_string();
        }
        req.extensions()
            .get::<MatchedPath>()
            .map(|p| p.as_str().to_owned())
            .unwrap_or_else(|| UNMATCHED_ROUTE.to_owned())
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for Instrumented<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = Response<InstrumentedBody<ResBody>>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let mut timer = RequestTimer::start(
            self.layer.metrics.clone(),
            self.route_label(&req),
            method_label(req.method()),
        );
        if let Some(WriteDeadline(at)) = req.extensions().get::<WriteDeadline>().copied() {
            timer.expire_at(at);
        }

        // Keep the instance that was driven to readiness.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let monitor = self.layer.monitor.clone();

        Box::pin(async move {
            let call = async move { inner.call(req).await };
            let outcome = match monitor {
                Some(monitor) => AssertUnwindSafe(monitor.instrument(call)).catch_unwind().await,
                None => AssertUnwindSafe(call).catch_unwind().await,
            };

            match outcome {
                Ok(Ok(res)) => {
                    timer.set_status(res.status());
                    Ok(res.map(|body| InstrumentedBody::new(body, timer)))
                }
                Ok(Err(err)) => {
                    timer.mark_failed();
                    Err(err)
                }
                Err(panic) => {
                    timer.mark_failed();
                    drop(timer);
                    std::panic::resume_unwind(panic)
                }
            }
        })
    }
}
