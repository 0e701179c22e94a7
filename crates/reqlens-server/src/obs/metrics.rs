//! HTTP request instruments.
//!
//! Two instruments share the label names `route`, `method` and `status`:
//! a request counter and a duration histogram in microseconds. Every label
//! value comes from a fixed vocabulary (route templates, standard methods,
//! status classes) so the series count stays bounded.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{Method, StatusCode};
use reqlens_core::error::Result;
use reqlens_core::metrics::{
    Instrument, InstrumentHandle, LabelSet, MetricRegistry, DURATION_BUCKETS_MICROS,
};

pub const REQUESTS_TOTAL: &str = "reqlens_http_requests_total";
pub const REQUEST_DURATION_MICROS: &str = "reqlens_http_request_duration_micros";
pub const LABEL_NAMES: [&str; 3] = ["route", "method", "status"];

/// Coarse grouping of status codes used as the `status` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Informational,
    Success,
    Redirection,
    ClientError,
    ServerError,
    /// Request dropped before any response existed.
    Aborted,
}

impl StatusClass {
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            100..=199 => StatusClass::Informational,
            200..=299 => StatusClass::Success,
            300..=399 => StatusClass::Redirection,
            400..=499 => StatusClass::ClientError,
            _ => StatusClass::ServerError,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StatusClass::Informational => "1xx",
            StatusClass::Success => "2xx",
            StatusClass::Redirection => "3xx",
            StatusClass::ClientError => "4xx",
            StatusClass::ServerError => "5xx",
            StatusClass::Aborted => "aborted",
        }
    }
}

/// `method` label value. Extension methods collapse into `OTHER`.
pub fn method_label(method: &Method) -> &'static str {
    match *method {
        Method::GET => "GET",
        Method::HEAD => "HEAD",
        Method::POST => "POST",
        Method::PUT => "PUT",
        Method::DELETE => "DELETE",
        Method::CONNECT => "CONNECT",
        Method::OPTIONS => "OPTIONS",
        Method::TRACE => "TRACE",
        Method::PATCH => "PATCH",
        _ => "OTHER",
    }
}

/// Handles to the request instruments of one registry.
#[derive(Clone)]
pub struct HttpMetrics {
    registry: Arc<MetricRegistry>,
    requests: InstrumentHandle,
    duration: InstrumentHandle,
}

impl HttpMetrics {
    /// Register (or reuse) the request instruments on `registry`.
    ///
    /// Fails with `RegistrationConflict` when the names are already taken by
    /// instruments of another shape.
    pub fn register(registry: Arc<MetricRegistry>) -> Result<Self> {
        let requests = registry.register(
            Instrument::counter(REQUESTS_TOTAL, "HTTP requests completed.")
                .with_labels(&LABEL_NAMES),
        )?;
        let duration = registry.register(
            Instrument::histogram(
                REQUEST_DURATION_MICROS,
                "HTTP request duration from first byte read to last byte written, in microseconds.",
                &DURATION_BUCKETS_MICROS,
            )
            .with_labels(&LABEL_NAMES),
        )?;
        Ok(Self {
            registry,
            requests,
            duration,
        })
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    pub fn requests(&self) -> &InstrumentHandle {
        &self.requests
    }

    pub fn duration(&self) -> &InstrumentHandle {
        &self.duration
    }

    /// Count one request and record its duration under the same labels.
    pub fn record(
        &self,
        route: &str,
        method: &str,
        status: StatusClass,
        elapsed: Duration,
    ) -> Result<()> {
        let labels = Self::labels(route, method, status);
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.registry.observe(&self.requests, 1, &labels)?;
        self.registry.observe(&self.duration, micros, &labels)
    }

    pub fn labels(route: &str, method: &str, status: StatusClass) -> LabelSet {
        LabelSet::from([("route", route), ("method", method), ("status", status.as_str())])
    }
}
