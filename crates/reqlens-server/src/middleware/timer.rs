//! Per-request timing guard.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use axum::http::StatusCode;
use reqlens_core::error::ReqlensError;

use crate::obs::{HttpMetrics, StatusClass};

/// Acquired when a request enters the middleware; records the request when
/// dropped.
///
/// Whatever path ends the request (body finished, body dropped, handler
/// error, panic, cancelled future), dropping the guard is the only place
/// metrics get written, so each request is recorded exactly once.
pub struct RequestTimer {
    metrics: HttpMetrics,
    route: String,
    method: &'static str,
    started: Instant,
    status: Option<StatusClass>,
    deadline: Option<Instant>,
    bytes: u64,
}

impl RequestTimer {
    pub fn start(metrics: HttpMetrics, route: String, method: &'static str) -> Self {
        Self {
            metrics,
            route,
            method,
            started: Instant::now(),
            status: None,
            deadline: None,
            bytes: 0,
        }
    }

    /// Response head is known. The first status wins.
    pub fn set_status(&mut self, status: StatusCode) {
        if self.status.is_none() {
            self.status = Some(StatusClass::from_status(status));
        }
    }

    /// The handler failed (error or panic) before producing a response.
    pub fn mark_failed(&mut self) {
        if self.status.is_none() {
            self.status = Some(StatusClass::ServerError);
        }
    }

    /// An outer timeout answers `408` at `at` and drops the request future.
    /// A request still without status past that point is recorded as timed out.
    pub fn expire_at(&mut self, at: Instant) {
        self.deadline = Some(at);
    }

    pub fn add_bytes(&mut self, n: u64) {
        self.bytes = self.bytes.saturating_add(n);
    }

    fn final_status(&self, now: Instant) -> StatusClass {
        match (self.status, self.deadline) {
            (Some(status), _) => status,
            (None, Some(at)) if now >= at => StatusClass::from_status(StatusCode::REQUEST_TIMEOUT),
            (None, _) => StatusClass::Aborted,
        }
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.started);
        let status = self.final_status(now);

        let recorded = catch_unwind(AssertUnwindSafe(|| {
            self.metrics
                .record(&self.route, self.method, status, elapsed)
        }));

        match recorded {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(
                    code = e.code().as_str(),
                    error = %e,
                    route = %self.route,
                    "request metrics dropped"
                );
            }
            Err(_) => {
                let e = ReqlensError::InstrumentationFailure("panic while recording request".into());
                tracing::error!(code = e.code().as_str(), route = %self.route, "{e}");
            }
        }

        tracing::trace!(
            route = %self.route,
            method = self.method,
            status = status.as_str(),
            bytes = self.bytes,
            elapsed_us = elapsed.as_micros() as u64,
            "request finished"
        );
    }
}
