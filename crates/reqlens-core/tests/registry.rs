#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;
use std::thread;

use reqlens_core::metrics::{AggregatedValue, Instrument, LabelSet, MetricRegistry};

fn requests() -> Instrument {
    Instrument::counter("http_requests_total", "Requests served.")
        .with_labels(&["route", "method", "status"])
}

#[test]
fn reregistering_same_shape_returns_same_accumulator() {
    let registry = MetricRegistry::new();
    let a = registry.register(requests()).expect("first registration");
    let b = registry.register(requests()).expect("idempotent registration");
    assert_eq!(registry.len(), 1);

    let labels = LabelSet::from([("route", "/test"), ("method", "GET"), ("status", "2xx")]);
    a.observe(1, &labels).unwrap();
    b.observe(1, &labels).unwrap();
    assert_eq!(a.value(&labels), Some(AggregatedValue::Counter(2)));
}

#[test]
fn conflicting_redefinition_is_rejected() {
    let registry = MetricRegistry::new();
    registry.register(requests()).unwrap();

    let err = registry
        .register(Instrument::histogram("http_requests_total", "", &[1, 2]))
        .expect_err("kind differs");
    assert_eq!(err.code().as_str(), "REGISTRATION_CONFLICT");

    let err = registry
        .register(Instrument::counter("http_requests_total", "").with_labels(&["route"]))
        .expect_err("labels differ");
    assert_eq!(err.code().as_str(), "REGISTRATION_CONFLICT");
    assert_eq!(registry.len(), 1);
}

#[test]
fn label_mismatch_is_rejected_and_nothing_recorded() {
    let registry = MetricRegistry::new();
    let c = registry.register(requests()).unwrap();

    let err = registry
        .observe(&c, 1, &LabelSet::from([("route", "/test"), ("method", "GET")]))
        .expect_err("status missing");
    assert_eq!(err.code().as_str(), "LABEL_MISMATCH");
    assert_eq!(c.series_count(), 0);
    assert!(registry.snapshot().is_empty());
}

#[test]
fn concurrent_observations_are_not_lost() {
    let registry = Arc::new(MetricRegistry::new());
    let c = registry.register(requests()).unwrap();
    let h = registry
        .register(
            Instrument::histogram("http_request_duration_micros", "", &[10, 100])
                .with_labels(&["route", "method", "status"]),
        )
        .unwrap();

    thread::scope(|s| {
        for t in 0..8u64 {
            let (c, h) = (c.clone(), h.clone());
            s.spawn(move || {
                let status = if t % 2 == 0 { "2xx" } else { "5xx" };
                let labels = LabelSet::from([("route", "/test"), ("method", "GET"), ("status", status)]);
                for i in 0..1_000 {
                    c.observe(1, &labels).unwrap();
                    h.observe(i % 200, &labels).unwrap();
                }
            });
        }
        // export while writers run
        s.spawn(|| {
            for _ in 0..50 {
                let _ = registry.render();
            }
        });
    });

    for status in ["2xx", "5xx"] {
        let labels = LabelSet::from([("route", "/test"), ("method", "GET"), ("status", status)]);
        assert_eq!(c.value(&labels), Some(AggregatedValue::Counter(4_000)));
        let Some(AggregatedValue::Histogram(v)) = h.value(&labels) else {
            panic!("histogram series missing for {status}");
        };
        assert_eq!(v.count, 4_000);
        assert!(v.buckets.windows(2).all(|w| w[0].1 <= w[1].1));
    }
}

#[test]
fn render_uses_declared_label_order_and_sorted_series() {
    let registry = MetricRegistry::new();
    let c = registry.register(requests()).unwrap();
    let h = registry
        .register(
            Instrument::histogram("http_request_duration_micros", "Latency.", &[100, 1_000])
                .with_labels(&["route", "method", "status"]),
        )
        .unwrap();

    let ok = LabelSet::new()
        .with("status", "2xx")
        .with("method", "GET")
        .with("route", "/test");
    let err = LabelSet::from([("route", "/test"), ("method", "GET"), ("status", "5xx")]);
    c.observe(1, &err).unwrap();
    c.observe(2, &ok).unwrap();
    h.observe(250, &ok).unwrap();

    let text = registry.render();
    let expected = "\
# HELP http_requests_total Requests served.
# TYPE http_requests_total counter
http_requests_total{route=\"/test\",method=\"GET\",status=\"2xx\"} 2
http_requests_total{route=\"/test\",method=\"GET\",status=\"5xx\"} 1
# HELP http_request_duration_micros Latency.
# TYPE http_request_duration_micros histogram
http_request_duration_micros_bucket{route=\"/test\",method=\"GET\",status=\"2xx\",le=\"100\"} 0
http_request_duration_micros_bucket{route=\"/test\",method=\"GET\",status=\"2xx\",le=\"1000\"} 1
http_request_duration_micros_bucket{route=\"/test\",method=\"GET\",status=\"2xx\",le=\"+Inf\"} 1
http_request_duration_micros_sum{route=\"/test\",method=\"GET\",status=\"2xx\"} 250
http_request_duration_micros_count{route=\"/test\",method=\"GET\",status=\"2xx\"} 1
";
    assert_eq!(text, expected);
}

#[test]
fn snapshot_carries_instrument_and_labels() {
    let registry = MetricRegistry::new();
    let c = registry.register(requests()).unwrap();
    c.observe(7, &LabelSet::from([("route", "/hello"), ("method", "POST"), ("status", "4xx")]))
        .unwrap();

    let snap = registry.snapshot();
    assert_eq!(snap.len(), 1);
    assert_eq!(snap[0].instrument.name(), "http_requests_total");
    assert_eq!(snap[0].labels.get("method"), Some("POST"));
    assert_eq!(snap[0].value, AggregatedValue::Counter(7));
}
