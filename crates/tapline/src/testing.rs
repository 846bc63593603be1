//! Test support: a mock upstream HTTP server that serves canned responses and records requests.

use std::{
    collections::HashMap,
    convert::Infallible,
    fmt,
    net::{Ipv4Addr, SocketAddr},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use http_body_util::BodyExt as _;
use hyper::{
    body::Incoming, header, server::conn::http1, service::service_fn, HeaderMap, Request,
    Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use tokio::{net::TcpListener, task::JoinHandle};

/// Canned response of a [`MockUpstream`].
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: StatusCode,
    headers: Vec<(header::HeaderName, String)>,
    body: String,
    delay: Duration,
}

impl MockResponse {
    /// 200 OK response with a JSON body.
    pub fn json(value: &serde_json::Value) -> Self {
        Self {
            status: StatusCode::OK,
            headers: vec![(header::CONTENT_TYPE, "application/json".to_owned())],
            body: value.to_string(),
            delay: Duration::ZERO,
        }
    }

    /// Response with the specified status and a plain-text body.
    ///
    /// # Panics
    ///
    /// Panics if `status` is not a valid HTTP status code.
    pub fn text(status: u16, body: &str) -> Self {
        Self {
            status: StatusCode::from_u16(status).expect("invalid status code"),
            headers: vec![(header::CONTENT_TYPE, "text/plain".to_owned())],
            body: body.to_owned(),
            delay: Duration::ZERO,
        }
    }

    /// 200 OK response with a body of `len` bytes and the matching `Content-Length`.
    pub fn sized(len: usize) -> Self {
        Self {
            status: StatusCode::OK,
            headers: vec![(header::CONTENT_LENGTH, len.to_string())],
            body: "x".repeat(len),
            delay: Duration::ZERO,
        }
    }

    /// Delays the response by the specified duration.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn into_response(self) -> Response<String> {
        let mut builder = Response::builder().status(self.status);
        for (name, value) in self.headers {
            builder = builder.header(name, value);
        }
        builder.body(self.body).expect("invalid mock response")
    }
}

/// Request received by a [`MockUpstream`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// HTTP method, e.g. `GET`.
    pub method: String,
    /// Path and query of the request.
    pub path: String,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body decoded as UTF-8 (lossily).
    pub body: String,
}

impl RecordedRequest {
    /// Returns the value of the specified header if it is present and is valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }
}

type Routes = Arc<Mutex<HashMap<String, MockResponse>>>;

/// Builder for [`MockUpstream`].
#[derive(Debug, Default)]
pub struct MockUpstreamBuilder {
    routes: HashMap<String, MockResponse>,
}

impl MockUpstreamBuilder {
    /// Serves `response` for requests with the specified path and query (matched exactly).
    #[must_use]
    pub fn route(mut self, path_and_query: &str, response: MockResponse) -> Self {
        self.routes.insert(path_and_query.to_owned(), response);
        self
    }

    /// Binds the server to a random local port and starts serving requests.
    ///
    /// # Panics
    ///
    /// Panics if binding fails.
    pub async fn start(self) -> MockUpstream {
        let bind_address: SocketAddr = (Ipv4Addr::LOCALHOST, 0).into();
        let listener = TcpListener::bind(bind_address)
            .await
            .expect("cannot bind mock upstream");
        let local_addr = listener.local_addr().expect("cannot get local address");

        let routes: Routes = Arc::new(Mutex::new(self.routes));
        let requests = Arc::<Mutex<Vec<RecordedRequest>>>::default();
        let server_routes = routes.clone();
        let server_requests = requests.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let routes = server_routes.clone();
                let requests = server_requests.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req| {
                        let routes = routes.clone();
                        let requests = requests.clone();
                        async move { Ok::<_, Infallible>(respond(req, &routes, &requests).await) }
                    });
                    if let Err(err) = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        tracing::debug!(%err, "Mock upstream connection failed");
                    }
                });
            }
        });

        MockUpstream {
            local_addr,
            routes,
            requests,
            task,
        }
    }
}

async fn respond(
    req: Request<Incoming>,
    routes: &Routes,
    requests: &Mutex<Vec<RecordedRequest>>,
) -> Response<String> {
    let (parts, body) = req.into_parts();
    let body = body
        .collect()
        .await
        .map(|body| String::from_utf8_lossy(&body.to_bytes()).into_owned())
        .unwrap_or_default();
    let path = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path().to_owned(), |pq| pq.as_str().to_owned());

    let response = routes
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&path)
        .cloned();
    requests
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(RecordedRequest {
            method: parts.method.to_string(),
            path,
            headers: parts.headers,
            body,
        });

    let response = response.unwrap_or_else(|| MockResponse::text(404, "not found"));
    if !response.delay.is_zero() {
        tokio::time::sleep(response.delay).await;
    }
    response.into_response()
}

/// Mock upstream HTTP server. The server is stopped when this handle is dropped.
pub struct MockUpstream {
    local_addr: SocketAddr,
    routes: Routes,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    task: JoinHandle<()>,
}

impl fmt::Debug for MockUpstream {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("MockUpstream")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl MockUpstream {
    /// Starts building a mock upstream.
    pub fn builder() -> MockUpstreamBuilder {
        MockUpstreamBuilder::default()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the base URL of the server, e.g. `http://127.0.0.1:12345`.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    /// Replaces (or adds) the response for the specified path and query.
    pub fn set_route(&self, path_and_query: &str, response: MockResponse) {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path_and_query.to_owned(), response);
    }

    /// Returns all requests received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the number of received requests with the specified path and query.
    pub fn request_count(&self, path_and_query: &str) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|req| req.path == path_and_query)
            .count()
    }
}
