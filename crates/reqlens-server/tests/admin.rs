#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_metrics::TaskMonitor;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use reqlens_core::metrics::{Instrument, LabelSet, MetricRegistry};
use reqlens_server::{
    admin::AdminServer,
    config::AdminConfig,
    obs::CountingAlloc,
    ops::{build_admin_router, AdminState},
};

#[global_allocator]
static ALLOC: CountingAlloc = CountingAlloc::new();

fn state() -> AdminState {
    let registry = Arc::new(MetricRegistry::new());
    AdminState::new(
        AdminConfig::with_addr("127.0.0.1:0".parse().unwrap()),
        registry,
        Some(TaskMonitor::new()),
    )
}

async fn call(app: &Router, method: Method, uri: &str, body: &str) -> (StatusCode, String) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::from(body.to_owned()))
        .unwrap();
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

async fn get(app: &Router, uri: &str) -> (StatusCode, String) {
    call(app, Method::GET, uri, "").await
}

#[tokio::test]
async fn metrics_route_renders_the_registry() {
    let state = state();
    let jobs = state
        .registry()
        .register(Instrument::counter("jobs_total", "Jobs run.").with_labels(&["queue"]))
        .unwrap();
    jobs.observe(3, &LabelSet::from([("queue", "mail")])).unwrap();
    let app = build_admin_router(state);

    let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let res = app.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));

    let (_, text) = get(&app, "/metrics").await;
    assert_eq!(
        text,
        "# HELP jobs_total Jobs run.\n# TYPE jobs_total counter\njobs_total{queue=\"mail\"} 3\n"
    );
}

#[tokio::test]
async fn liveness_routes() {
    let app = build_admin_router(state());
    for uri in ["/check", "/health"] {
        let (status, body) = get(&app, uri).await;
        assert_eq!(status, StatusCode::OK);
        let v: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(v["alive"], true);
    }
}

#[tokio::test]
async fn profiling_index_and_cmdline() {
    let app = build_admin_router(state());

    let (status, index) = get(&app, "/debug/pprof/").await;
    assert_eq!(status, StatusCode::OK);
    for name in ["cmdline", "profile", "heap", "symbol", "trace", "tasks"] {
        assert!(index.contains(name), "index lists {name}");
    }

    let (status, cmdline) = get(&app, "/debug/pprof/cmdline").await;
    assert_eq!(status, StatusCode::OK);
    assert!(!cmdline.is_empty());
}

#[tokio::test]
async fn profile_rejects_bad_windows() {
    let app = build_admin_router(state());
    for uri in [
        "/debug/pprof/profile?seconds=0",
        "/debug/pprof/profile?seconds=abc",
        "/debug/pprof/trace?seconds=-3",
        "/debug/pprof/heap?seconds=0",
    ] {
        let (status, _) = get(&app, uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn cpu_profile_returns_pprof_bytes() {
    let app = build_admin_router(state());

    let req = Request::builder()
        .uri("/debug/pprof/profile?seconds=1")
        .body(Body::empty())
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()[header::CONTENT_TYPE], "application/octet-stream");

    let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    assert!(!body.is_empty());
}

#[tokio::test]
async fn heap_counters_come_from_the_global_allocator() {
    let app = build_admin_router(state());

    let (status, body) = get(&app, "/debug/pprof/heap").await;
    assert_eq!(status, StatusCode::OK);
    let v: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["heap"]["installed"], true);
    assert!(v["heap"]["live_bytes"].as_u64().unwrap() > 0);
    assert!(v["heap"]["allocations"].as_u64().unwrap() >= v["heap"]["deallocations"].as_u64().unwrap());
    assert!(v.get("delta").is_none());
}

#[tokio::test]
async fn heap_window_reports_activity() {
    let app = build_admin_router(state());
    let churn = tokio::spawn(async {
        for _ in 0..20 {
            let buf = vec![0u8; 64 * 1024];
            std::hint::black_box(&buf);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });

    let (status, body) = get(&app, "/debug/pprof/heap?seconds=1").await;
    churn.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    let v: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["window_ms"], 1000);
    assert!(v["delta"]["allocated_bytes"].as_u64().unwrap() >= 64 * 1024);
    assert!(v["delta"]["live_bytes"].is_i64());
}

#[tokio::test]
async fn symbol_lookup() {
    let app = build_admin_router(state());

    let (status, body) = get(&app, "/debug/pprof/symbol").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "num_symbols: 1\n");

    let (status, body) = call(&app, Method::POST, "/debug/pprof/symbol", "0x0+0x1").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with("num_symbols: 1\n"));

    let (status, body) = get(&app, "/debug/pprof/symbol?0x0").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with("num_symbols: 1\n"));
}

#[tokio::test]
async fn tasks_and_trace_report_json() {
    let app = build_admin_router(state());

    let (status, body) = get(&app, "/debug/pprof/tasks").await;
    assert_eq!(status, StatusCode::OK);
    let v: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert!(v["workers"].as_u64().unwrap() >= 1);

    let (status, body) = get(&app, "/debug/pprof/trace?seconds=1").await;
    assert_eq!(status, StatusCode::OK);
    let v: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["window_ms"], 1000);
    assert!(v["requests"].is_object());
    assert!(v["runtime"].is_object());
}

#[tokio::test]
async fn trace_window_is_capped() {
    let registry = Arc::new(MetricRegistry::new());
    let mut cfg = AdminConfig::with_addr("127.0.0.1:0".parse().unwrap());
    cfg.max_trace = Duration::from_millis(50);
    let app = build_admin_router(AdminState::new(cfg, registry, None));

    let (status, body) = get(&app, "/debug/pprof/trace?seconds=60").await;
    assert_eq!(status, StatusCode::OK);
    let v: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["window_ms"], 50);
    assert!(v["requests"].is_null());
}

#[tokio::test]
async fn admin_listener_serves_and_stops() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(AdminServer::new(state()).serve_on(listener, shutdown.clone()));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /check HTTP/1.1\r\nHost: admin\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut raw = String::new();
    stream.read_to_string(&mut raw).await.unwrap();
    assert!(raw.starts_with("HTTP/1.1 200"));
    assert!(raw.contains("\"alive\""));

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("admin server stops")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn admin_bind_failure_is_reported() {
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = taken.local_addr().unwrap();

    let registry = Arc::new(MetricRegistry::new());
    let admin = AdminServer::new(AdminState::new(AdminConfig::with_addr(addr), registry, None));
    let err = admin
        .run(CancellationToken::new())
        .await
        .expect_err("address in use");
    assert_eq!(err.code().as_str(), "LISTENER_BIND");
}
