//! Tests for the adapter server.

use std::{
    net::Ipv4Addr,
    str,
    sync::atomic::{AtomicBool, AtomicU32, Ordering},
};

use async_trait::async_trait;
use http_body_util::BodyExt as _;
use hyper::Uri;
use hyper_util::{client::legacy::Client, rt::TokioExecutor};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::subscriber::Subscriber;
use tracing_capture::{CaptureLayer, SharedStorage};
use tracing_subscriber::layer::SubscriberExt;

use super::*;
use crate::{adapter::HealthStatus, clock::ManualClock};

const TTL: Duration = Duration::from_secs(30);
const TEST_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Default)]
struct TestAdapter {
    refreshes: AtomicU32,
    failing: AtomicBool,
    panicking: AtomicBool,
    reports_health: bool,
}

impl TestAdapter {
    fn with_health() -> Self {
        Self {
            reports_health: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl Adapter for TestAdapter {
    type Snapshot = u32;

    fn name(&self) -> &'static str {
        "test"
    }

    fn upstream_url(&self) -> &str {
        "http://upstream.test"
    }

    async fn refresh(&self) -> Result<u32> {
        assert!(!self.panicking.load(Ordering::SeqCst), "adapter panicked");
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::bad_response(
                "http://upstream.test/api",
                "HTTP status 503 Service Unavailable",
            ));
        }
        Ok(self.refreshes.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn summary(&self, snapshot: &u32) -> Value {
        json!({ "refreshes": snapshot })
    }

    fn render(&self, snapshot: &u32, exposition: &mut Exposition) {
        exposition
            .gauge("test_refreshes", "Number of snapshot refreshes")
            .set(*snapshot);
        exposition
            .gauge("test_labeled", "Gauge with a label")
            .sample(&[("name", "a\"b")], 1);
    }

    fn health(&self, cached: Option<&u32>) -> Option<HealthStatus> {
        self.reports_health.then_some(if cached.is_some() {
            HealthStatus::Ok
        } else {
            HealthStatus::NoData
        })
    }
}

fn test_server<'a>(adapter: TestAdapter) -> (AdapterServer<'a, TestAdapter>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let cache = SnapshotCache::with_clock(TTL, clock.clone());
    (AdapterServer::with_cache(adapter, cache), clock)
}

async fn get(server: &AdapterServer<'_, TestAdapter>, path: &str) -> (StatusCode, String, String) {
    let response = server.inner.handle(&Method::GET, path).await;
    let content_type = response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .to_owned();
    (response.status(), content_type, response.into_body())
}

#[tokio::test]
async fn serving_summary_and_metrics() {
    let (server, _) = test_server(TestAdapter::default());

    let (status, content_type, body) = get(&server, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type, "application/json");
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body, json!({ "refreshes": 1 }));

    let (status, content_type, body) = get(&server, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type, "text/plain; version=0.0.4; charset=utf-8");
    let expected = "\
        # HELP test_refreshes Number of snapshot refreshes\n\
        # TYPE test_refreshes gauge\n\
        test_refreshes 1\n\
        # HELP test_labeled Gauge with a label\n\
        # TYPE test_labeled gauge\n\
        test_labeled{name=\"ab\"} 1\n";
    assert_eq!(body, expected);

    // Both routes share the cached snapshot.
    assert_eq!(server.inner.adapter.refreshes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stale_snapshot_is_refreshed() {
    let (server, clock) = test_server(TestAdapter::default());

    get(&server, "/").await;
    clock.advance(TTL - Duration::from_secs(1));
    let (_, _, body) = get(&server, "/").await;
    assert_eq!(body, r#"{"refreshes":1}"#);

    clock.advance(Duration::from_secs(2));
    let (_, _, body) = get(&server, "/").await;
    assert_eq!(body, r#"{"refreshes":2}"#);
}

fn tracing_subscriber(storage: &SharedStorage) -> impl Subscriber {
    tracing_subscriber::fmt()
        .pretty()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .finish()
        .with(CaptureLayer::new(storage))
}

#[tokio::test]
async fn refresh_errors_are_reported() {
    let tracing_storage = SharedStorage::default();
    let _subscriber_guard = tracing::subscriber::set_default(tracing_subscriber(&tracing_storage));
    // ^ **NB.** `set_default()` only works because tests use a single-threaded Tokio runtime

    let adapter = TestAdapter::default();
    adapter.failing.store(true, Ordering::SeqCst);
    let (server, _) = test_server(adapter);

    let (status, content_type, body) = get(&server, "/").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(content_type, "application/json");
    let body: Value = serde_json::from_str(&body).unwrap();
    let message = body["error"].as_str().unwrap();
    assert!(message.contains("http://upstream.test/api"), "{message}");
    assert!(message.contains("503"), "{message}");

    let (status, content_type, body) = get(&server, "/metrics").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(content_type, "text/plain");
    assert!(body.starts_with("# error: bad response from upstream"), "{body}");
    assert!(body.ends_with('\n'));

    let storage = tracing_storage.lock();
    let errors: Vec<_> = storage
        .all_events()
        .filter(|event| *event.metadata().level() == tracing::Level::ERROR)
        .collect();
    assert_eq!(errors.len(), 2);
    let error: &tracing_capture::CapturedEvent = &errors[0];
    assert_eq!(error.message(), Some("Failed serving request"));
    assert_eq!(error["adapter"].as_str(), Some("test"));
    assert_eq!(error["kind"].as_str(), Some("bad_upstream_response"));
}

#[tokio::test]
async fn failed_refresh_does_not_poison_server() {
    let (server, clock) = test_server(TestAdapter::default());
    get(&server, "/").await;

    server.inner.adapter.failing.store(true, Ordering::SeqCst);
    clock.advance(TTL);
    let (status, ..) = get(&server, "/").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    server.inner.adapter.failing.store(false, Ordering::SeqCst);
    let (status, _, body) = get(&server, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, r#"{"refreshes":2}"#);
}

#[tokio::test]
async fn panic_in_refresh_is_internal_error() {
    let (server, _) = test_server(TestAdapter::default());
    server.inner.adapter.panicking.store(true, Ordering::SeqCst);

    let (status, _, body) = get(&server, "/").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert!(
        body["error"].as_str().unwrap().starts_with("internal error: snapshot refresh panicked"),
        "{body}"
    );

    server.inner.adapter.panicking.store(false, Ordering::SeqCst);
    let (status, ..) = get(&server, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn unknown_routes_and_methods() {
    let (server, _) = test_server(TestAdapter::default());

    let (status, ..) = get(&server, "/api/unknown").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    // Adapter does not report health, so there's no such route.
    let (status, ..) = get(&server, "/health").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    for path in ["/", "/metrics"] {
        let response = server.inner.handle(&Method::POST, path).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
    assert_eq!(server.inner.adapter.refreshes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn health_is_judged_by_cached_snapshot() {
    let (server, clock) = test_server(TestAdapter::with_health());

    let (status, content_type, body) = get(&server, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type, "application/json");
    assert_eq!(body, r#"{"status":"no_data"}"#);
    // Health never triggers a refresh.
    assert_eq!(server.inner.adapter.refreshes.load(Ordering::SeqCst), 0);

    get(&server, "/").await;
    clock.advance(TTL * 10);
    let (_, _, body) = get(&server, "/health").await;
    assert_eq!(body, r#"{"status":"ok"}"#);
    assert_eq!(server.inner.adapter.refreshes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn self_metrics_are_appended_if_enabled() {
    let (server, _) = test_server(TestAdapter::default());
    let (_, _, body) = get(&server, "/metrics").await;
    assert!(!body.contains("tapline_"), "{body}");

    let (server, _) = test_server(TestAdapter::default());
    let server = server.with_self_metrics(true);
    let (status, _, body) = get(&server, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with("# HELP test_refreshes"), "{body}");
    assert!(body.contains("tapline_cache"), "{body}");
    assert!(body.contains("tapline_refresh_latency_seconds"), "{body}");
}

#[tokio::test]
async fn serving_over_http_with_graceful_shutdown() {
    let (server, _) = test_server(TestAdapter::with_health());
    let (shutdown_sender, shutdown_receiver) = oneshot::channel::<()>();
    let server = server.with_graceful_shutdown(async {
        shutdown_receiver.await.ok();
    });
    let bind_address: SocketAddr = (Ipv4Addr::LOCALHOST, 0).into();
    let server = server.bind(bind_address).await.unwrap();
    let local_addr = server.local_addr();
    let server_task = tokio::spawn(server.start());

    let client = Client::builder(TokioExecutor::new()).build_http::<String>();
    for (path, expected_status) in [
        ("/health", StatusCode::OK),
        ("/", StatusCode::OK),
        ("/metrics", StatusCode::OK),
        ("/favicon.ico", StatusCode::NOT_FOUND),
    ] {
        let uri: Uri = format!("http://{local_addr}{path}").parse().unwrap();
        let response = tokio::time::timeout(TEST_TIMEOUT, client.get(uri))
            .await
            .expect("timed out waiting for response")
            .unwrap();
        assert_eq!(response.status(), expected_status, "{path}");

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body = str::from_utf8(&body).unwrap();
        if path == "/" {
            assert_eq!(body, r#"{"refreshes":1}"#);
        }
    }
    drop(client);

    shutdown_sender.send(()).unwrap();
    tokio::time::timeout(TEST_TIMEOUT, server_task)
        .await
        .expect("server did not shut down")
        .unwrap()
        .unwrap();
}
