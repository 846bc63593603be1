//! [`AdapterServer`] and closely related types.

use std::{
    convert::Infallible,
    fmt,
    future::{self, Future},
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    time::Duration,
};

use hyper::{
    body::Incoming, header, server::conn::http1, service::service_fn, Method, Request, Response,
    StatusCode,
};
use hyper_util::rt::TokioIo;
use serde_json::json;
use tokio::{io, net::TcpListener, sync::watch};
use vise::{Format, MetricsCollection, Registry};

use crate::{
    adapter::Adapter,
    cache::SnapshotCache,
    exposition::{self, Exposition},
    metrics::{Route, METRICS},
    Error, Result,
};

#[cfg(test)]
mod tests;

const JSON_CONTENT_TYPE: &str = "application/json";
const ERROR_CONTENT_TYPE: &str = "text/plain";

struct ServerInner<A: Adapter> {
    adapter: A,
    cache: SnapshotCache<A::Snapshot>,
    self_metrics: Option<Registry>,
}

impl<A: Adapter> ServerInner<A> {
    async fn snapshot(self: &Arc<Self>) -> Result<Arc<A::Snapshot>> {
        let this = Arc::clone(self);
        // The refresh is spawned so that a panic in adapter code fails only the current request.
        let refresh = || async move {
            tokio::spawn(async move { this.adapter.refresh().await })
                .await
                .map_err(|err| Error::Internal(format!("snapshot refresh panicked: {err}")))?
        };
        self.cache.get_or_refresh(refresh).await
    }

    async fn handle(self: &Arc<Self>, method: &Method, path: &str) -> Response<String> {
        let route = match path {
            "/" => Route::Summary,
            "/metrics" => Route::Metrics,
            "/health" if self.adapter.health(None).is_some() => Route::Health,
            _ => Route::NotFound,
        };
        METRICS.requests[&route].inc();

        if route != Route::NotFound && method != Method::GET {
            return plain_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed\n");
        }
        match route {
            Route::Summary => self.summary().await,
            Route::Metrics => self.metrics().await,
            Route::Health => self.health(),
            Route::NotFound => plain_response(StatusCode::NOT_FOUND, "Not Found\n"),
        }
    }

    async fn summary(self: &Arc<Self>) -> Response<String> {
        let body = self.snapshot().await.and_then(|snapshot| {
            let summary = self.adapter.summary(&snapshot);
            serde_json::to_string(&summary)
                .map_err(|err| Error::Internal(format!("cannot serialize summary: {err}")))
        });
        match body {
            Ok(body) => json_response(StatusCode::OK, body),
            Err(err) => {
                self.report_error(Route::Summary, &err);
                let body = json!({ "error": err.to_string() }).to_string();
                json_response(StatusCode::INTERNAL_SERVER_ERROR, body)
            }
        }
    }

    async fn metrics(self: &Arc<Self>) -> Response<String> {
        let body = self.snapshot().await.and_then(|snapshot| {
            let mut exposition = Exposition::new(self.adapter.label_sanitizer());
            self.adapter.render(&snapshot, &mut exposition);
            let mut body = exposition.finish();
            if let Some(registry) = &self.self_metrics {
                registry
                    .encode(&mut body, Format::Prometheus)
                    .map_err(|err| Error::Internal(format!("cannot encode adapter metrics: {err}")))?;
            }
            Ok(body)
        });

        match body {
            Ok(body) => Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, exposition::CONTENT_TYPE)
                .body(body)
                .unwrap(),
            Err(err) => {
                self.report_error(Route::Metrics, &err);
                let body = format!("# error: {err}\n");
                Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .header(header::CONTENT_TYPE, ERROR_CONTENT_TYPE)
                    .body(body)
                    .unwrap()
            }
        }
    }

    fn health(&self) -> Response<String> {
        let cached = self.cache.peek();
        // `handle()` only routes here if the adapter reports health.
        let status = self.adapter.health(cached.as_deref());
        let body = json!({ "status": status }).to_string();
        json_response(StatusCode::OK, body)
    }

    fn report_error(&self, route: Route, err: &Error) {
        METRICS.request_errors[&route].inc();
        tracing::error!(
            %err,
            adapter = self.adapter.name(),
            kind = err.kind(),
            ?route,
            "Failed serving request"
        );
    }
}

// `unwrap()`s in response builders are safe: status codes and header values are static.
fn json_response(status: StatusCode, body: String) -> Response<String> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, JSON_CONTENT_TYPE)
        .body(body)
        .unwrap()
}

fn plain_response(status: StatusCode, body: &str) -> Response<String> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, ERROR_CONTENT_TYPE)
        .body(body.to_owned())
        .unwrap()
}

/// HTTP server exposing an [`Adapter`].
///
/// The server exposes the following endpoints:
///
/// - `GET /`: JSON summary of the current snapshot
/// - `GET /metrics`: the snapshot in the Prometheus text format
/// - `GET /health`: `{"status": "ok" | "no_data"}`, only for adapters that report health
///
/// Snapshots are cached for the TTL of the [`SnapshotCache`] the server is created with.
pub struct AdapterServer<'a, A: Adapter> {
    inner: Arc<ServerInner<A>>,
    shutdown_future: Pin<Box<dyn Future<Output = ()> + Send + 'a>>,
}

impl<A: Adapter> fmt::Debug for AdapterServer<'_, A> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AdapterServer")
            .field("adapter", &self.inner.adapter.name())
            .field("cache", &self.inner.cache)
            .field("self_metrics", &self.inner.self_metrics.is_some())
            .finish_non_exhaustive()
    }
}

impl<'a, A: Adapter> AdapterServer<'a, A> {
    /// Creates a server caching adapter snapshots for `cache_ttl`.
    pub fn new(adapter: A, cache_ttl: Duration) -> Self {
        Self::with_cache(adapter, SnapshotCache::new(cache_ttl))
    }

    /// Creates a server with the provided snapshot cache.
    pub fn with_cache(adapter: A, cache: SnapshotCache<A::Snapshot>) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                adapter,
                cache,
                self_metrics: None,
            }),
            shutdown_future: Box::pin(future::pending()),
        }
    }

    /// Appends internal adapter metrics (cache hits, refresh latency etc.) to the `/metrics` output.
    ///
    /// # Panics
    ///
    /// Panics if called after the server was shared, which cannot happen before [`Self::bind()`].
    #[must_use]
    pub fn with_self_metrics(mut self, enabled: bool) -> Self {
        let registry = enabled.then(|| MetricsCollection::default().collect());
        Arc::get_mut(&mut self.inner)
            .expect("server inner state is not shared before binding")
            .self_metrics = registry;
        self
    }

    /// Configures graceful shutdown for the server.
    #[must_use]
    pub fn with_graceful_shutdown<F>(mut self, shutdown: F) -> Self
    where
        F: Future<Output = ()> + Send + 'a,
    {
        self.shutdown_future = Box::pin(shutdown);
        self
    }

    /// Starts the server on the specified address. This future resolves when the server is shut down.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the specified address fails.
    pub async fn start(self, bind_address: SocketAddr) -> io::Result<()> {
        let adapter = self.inner.adapter.name();
        tracing::info!(
            adapter,
            upstream = self.inner.adapter.upstream_url(),
            cache_ttl_sec = self.inner.cache.ttl().as_secs(),
            "Starting {adapter} adapter web server on {bind_address}"
        );
        self.bind(bind_address).await?.start().await?;
        tracing::info!(adapter, "Adapter server shut down");
        Ok(())
    }

    /// Creates an HTTP server and binds it to the specified address.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the specified address fails.
    pub async fn bind(mut self, bind_address: SocketAddr) -> io::Result<BoundServer<'a>> {
        let listener = TcpListener::bind(bind_address).await?;
        let local_addr = listener.local_addr()?;
        let server = async move {
            let (started_shutdown_sender, started_shutdown) = watch::channel(());
            loop {
                let stream = tokio::select! {
                    res = listener.accept() => res?.0,
                    () = &mut self.shutdown_future => break,
                };

                let io = TokioIo::new(stream);
                let inner = Arc::clone(&self.inner);
                let mut started_shutdown = started_shutdown.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let inner = Arc::clone(&inner);
                        async move {
                            Ok::<_, Infallible>(inner.handle(req.method(), req.uri().path()).await)
                        }
                    });
                    let conn = http1::Builder::new().serve_connection(io, service);
                    tokio::pin!(conn);

                    let res = tokio::select! {
                        _ = started_shutdown.changed() => {
                            conn.as_mut().graceful_shutdown();
                            conn.await
                        }
                        res = conn.as_mut() => res,
                    };
                    if let Err(err) = res {
                        tracing::warn!(%err, "Error serving connection");
                    }
                });
            }

            tracing::info!("Stop signal received, adapter server is shutting down");
            // Send the graceful shutdown signal to all alive connections.
            drop(started_shutdown);
            started_shutdown_sender.send_replace(());
            // Wait until all connections are dropped.
            started_shutdown_sender.closed().await;

            Ok(())
        };

        Ok(BoundServer {
            server: Box::pin(server),
            local_addr,
        })
    }
}

/// Server bound to a certain local address returned by [`AdapterServer::bind()`].
///
/// Useful e.g. if you need to find out which port the server was bound to if the 0th port was specified.
#[must_use = "Server should be `start()`ed"]
pub struct BoundServer<'a> {
    server: Pin<Box<dyn Future<Output = io::Result<()>> + Send + 'a>>,
    local_addr: SocketAddr,
}

impl fmt::Debug for BoundServer<'_> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("BoundServer")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl BoundServer<'_> {
    /// Returns the local address this server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts this server. Resolves once the server is shut down.
    ///
    /// # Errors
    ///
    /// Returns an error if accepting connections fails.
    pub async fn start(self) -> io::Result<()> {
        self.server.await
    }
}
