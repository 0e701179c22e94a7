//! On-demand profiling routes under `/debug/pprof/`.
//!
//! Every dump is bounded: the caller picks the sampling window with
//! `?seconds=N`, which is clamped to the configured maximum. CPU sampling
//! and symbol resolution run on the blocking pool so they never occupy an
//! async worker that request handling could use.

use std::fmt::Write;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Query, RawQuery, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tokio_metrics::TaskMetrics;

use reqlens_core::error::{ReqlensError, Result};

use super::AdminState;
use crate::obs::HeapStats;

const CPU_SAMPLE_HZ: i32 = 100;
const TRACE_DEFAULT: Duration = Duration::from_secs(1);
const MAX_SYMBOLS: usize = 256;

const INDEX: &str = "\
profiles:
  cmdline  the command line invocation of the current program
  profile  CPU profile (pprof protobuf); ?seconds=N sets the sampling window
  heap     heap allocation counters as JSON; ?seconds=N adds the activity over that window
  symbol   resolve program counters (GET ?0xADDR+0xADDR or POST body) to function names
  trace    data-plane task poll/schedule statistics over ?seconds=N, as JSON
  tasks    current runtime workers and alive tasks, as JSON
";

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    seconds: Option<String>,
}

/// Sampling window from `?seconds=N`: default when absent, capped at `max`.
pub fn window(seconds: Option<&str>, default: Duration, max: Duration) -> std::result::Result<Duration, &'static str> {
    let Some(raw) = seconds else {
        return Ok(default.min(max));
    };
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => Err("seconds must be a positive integer"),
        Ok(secs) => Ok(Duration::from_secs(secs).min(max)),
    }
}

fn json_response(value: serde_json::Value) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        value.to_string(),
    )
        .into_response()
}

fn failure(e: ReqlensError) -> Response {
    tracing::error!(code = e.code().as_str(), error = %e, "profiling request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
}

pub async fn index() -> impl IntoResponse {
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; charset=utf-8")], INDEX)
}

pub async fn cmdline() -> impl IntoResponse {
    let args: Vec<String> = std::env::args_os()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        args.join("\0"),
    )
}

pub async fn profile(State(state): State<AdminState>, Query(q): Query<WindowQuery>) -> Response {
    let cfg = state.cfg();
    let window = match window(q.seconds.as_deref(), cfg.default_profile, cfg.max_profile) {
        Ok(w) => w,
        Err(msg) => return (StatusCode::BAD_REQUEST, msg).into_response(),
    };

    let Ok(busy) = state.cpu_profile_lock().try_lock_owned() else {
        return (StatusCode::CONFLICT, "cpu profiling already in use").into_response();
    };

    tracing::info!(seconds = window.as_secs(), "cpu profile started");
    let sampled = tokio::task::spawn_blocking(move || {
        let _busy = busy;
        cpu_profile(window)
    })
    .await;

    match sampled {
        Ok(Ok(body)) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/octet-stream"),
                (header::CONTENT_DISPOSITION, "attachment; filename=\"profile\""),
            ],
            body,
        )
            .into_response(),
        Ok(Err(e)) => failure(e),
        Err(e) => failure(ReqlensError::Profiling(format!("profiler task failed: {e}"))),
    }
}

fn profiling_error(e: impl std::fmt::Display) -> ReqlensError {
    ReqlensError::Profiling(e.to_string())
}

fn cpu_profile(window: Duration) -> Result<Vec<u8>> {
    use pprof::protos::Message;

    let guard = pprof::ProfilerGuardBuilder::default()
        .frequency(CPU_SAMPLE_HZ)
        .blocklist(&["libc", "libgcc", "pthread", "vdso"])
        .build()
        .map_err(profiling_error)?;

    std::thread::sleep(window);

    let profile = guard
        .report()
        .build()
        .map_err(profiling_error)?
        .pprof()
        .map_err(profiling_error)?;

    let mut body = Vec::new();
    profile.encode(&mut body).map_err(profiling_error)?;
    Ok(body)
}

pub async fn symbol(RawQuery(query): RawQuery, body: Bytes) -> Response {
    let input = if body.is_empty() {
        query.unwrap_or_default()
    } else {
        String::from_utf8_lossy(&body).into_owned()
    };

    if input.trim().is_empty() {
        return (StatusCode::OK, "num_symbols: 1\n").into_response();
    }

    let addrs: Vec<String> = input
        .split('+')
        .take(MAX_SYMBOLS)
        .map(|a| a.trim().to_string())
        .collect();

    match tokio::task::spawn_blocking(move || resolve_symbols(&addrs)).await {
        Ok(out) => (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; charset=utf-8")], out)
            .into_response(),
        Err(e) => failure(ReqlensError::Profiling(format!("symbol task failed: {e}"))),
    }
}

fn parse_addr(raw: &str) -> Option<usize> {
    let hex = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    usize::from_str_radix(hex, 16).ok()
}

/// One `0xADDR name` line per resolvable address; unknown ones are skipped.
fn resolve_symbols(addrs: &[String]) -> String {
    let mut out = String::from("num_symbols: 1\n");
    for addr in addrs.iter().filter_map(|a| parse_addr(a)) {
        let mut name = None;
        backtrace::resolve(addr as *mut std::ffi::c_void, |sym| {
            if name.is_none() {
                name = sym.name().map(|n| n.to_string());
            }
        });
        if let Some(name) = name {
            let _ = writeln!(out, "{:#x} {}", addr, name);
        }
    }
    out
}

/// Current heap counters; with `?seconds=N`, also the activity over N
/// seconds (capped like the trace window).
pub async fn heap(State(state): State<AdminState>, Query(q): Query<WindowQuery>) -> Response {
    let Some(raw) = q.seconds.as_deref() else {
        return json_response(json!({ "heap": HeapStats::snapshot() }));
    };
    let window = match window(Some(raw), TRACE_DEFAULT, state.cfg().max_trace) {
        Ok(w) => w,
        Err(msg) => return (StatusCode::BAD_REQUEST, msg).into_response(),
    };

    let before = HeapStats::snapshot();
    tokio::time::sleep(window).await;
    let after = HeapStats::snapshot();
    if !after.installed {
        tracing::debug!("heap profile requested without the counting allocator");
    }

    json_response(json!({
        "window_ms": window.as_millis() as u64,
        "heap": after,
        "delta": after.since(&before),
    }))
}

fn runtime_json() -> serde_json::Value {
    let metrics = tokio::runtime::Handle::current().metrics();
    json!({
        "workers": metrics.num_workers(),
        "alive_tasks": metrics.num_alive_tasks(),
    })
}

fn task_json(m: &TaskMetrics) -> serde_json::Value {
    json!({
        "instrumented": m.instrumented_count,
        "dropped": m.dropped_count,
        "first_polls": m.first_poll_count,
        "polls": m.total_poll_count,
        "slow_polls": m.total_slow_poll_count,
        "idles": m.total_idled_count,
        "slow_poll_ratio": m.slow_poll_ratio(),
        "mean_poll_us": m.mean_poll_duration().as_micros() as u64,
        "mean_scheduled_us": m.mean_scheduled_duration().as_micros() as u64,
        "mean_first_poll_delay_us": m.mean_first_poll_delay().as_micros() as u64,
    })
}

pub async fn trace(State(state): State<AdminState>, Query(q): Query<WindowQuery>) -> Response {
    let window = match window(q.seconds.as_deref(), TRACE_DEFAULT, state.cfg().max_trace) {
        Ok(w) => w,
        Err(msg) => return (StatusCode::BAD_REQUEST, msg).into_response(),
    };

    let tasks = match state.task_monitor() {
        Some(monitor) => {
            let mut intervals = monitor.intervals();
            // first interval only sets the baseline
            let _ = intervals.next();
            tokio::time::sleep(window).await;
            intervals.next().map(|m| task_json(&m))
        }
        None => {
            tokio::time::sleep(window).await;
            None
        }
    };

    json_response(json!({
        "window_ms": window.as_millis() as u64,
        "requests": tasks,
        "runtime": runtime_json(),
    }))
}

pub async fn tasks() -> Response {
    json_response(runtime_json())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT: Duration = Duration::from_secs(30);
    const MAX: Duration = Duration::from_secs(60);

    #[test]
    fn window_defaults_and_caps() {
        assert_eq!(window(None, DEFAULT, MAX), Ok(DEFAULT));
        assert_eq!(window(Some("5"), DEFAULT, MAX), Ok(Duration::from_secs(5)));
        assert_eq!(window(Some("3600"), DEFAULT, MAX), Ok(MAX));
        assert_eq!(window(None, Duration::from_secs(90), MAX), Ok(MAX));
    }

    #[test]
    fn window_rejects_zero_and_garbage() {
        assert!(window(Some("0"), DEFAULT, MAX).is_err());
        assert!(window(Some("-1"), DEFAULT, MAX).is_err());
        assert!(window(Some("ten"), DEFAULT, MAX).is_err());
    }

    #[test]
    fn addresses_parse_with_or_without_prefix() {
        assert_eq!(parse_addr("0x10"), Some(16));
        assert_eq!(parse_addr("0Xff"), Some(255));
        assert_eq!(parse_addr("ff"), Some(255));
        assert_eq!(parse_addr("zz"), None);
    }

    #[tokio::test]
    async fn concurrent_cpu_profile_is_refused() {
        use std::sync::Arc;

        use reqlens_core::metrics::MetricRegistry;

        use crate::config::AdminConfig;

        let addr = ([127, 0, 0, 1], 0).into();
        let state = AdminState::new(
            AdminConfig::with_addr(addr),
            Arc::new(MetricRegistry::new()),
            None,
        );
        let lock = state.cpu_profile_lock();
        let _held = lock.lock().await;

        let res = profile(
            State(state),
            Query(WindowQuery {
                seconds: Some("1".into()),
            }),
        )
        .await;
        assert_eq!(res.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn resolving_skips_unknown_addresses() {
        let out = resolve_symbols(&["zz".into(), "".into()]);
        assert_eq!(out, "num_symbols: 1\n");
    }
}
