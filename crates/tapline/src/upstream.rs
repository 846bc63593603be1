//! HTTP client for a single upstream API.

use std::{fmt, time::Duration};

use reqwest::{header, Method, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize};

use crate::{metrics::METRICS, Error, Result};

/// Default connect + read timeout for upstream requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on the number of pages fetched by [`UpstreamClient::get_paginated()`].
const MAX_PAGES: u32 = 10_000;

/// Authentication attached to every request of an [`UpstreamClient`].
#[derive(Clone, Default)]
pub enum Auth {
    /// No authentication.
    #[default]
    None,
    /// Static header, e.g. `x-api-key: ...` or `Authorization: Token ...`.
    Header {
        /// Header name.
        name: header::HeaderName,
        /// Header value (marked as sensitive).
        value: header::HeaderValue,
    },
    /// `Authorization: Bearer ...` with a static token.
    Bearer(String),
}

impl fmt::Debug for Auth {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => formatter.write_str("None"),
            Self::Header { name, .. } => formatter
                .debug_struct("Header")
                .field("name", name)
                .finish_non_exhaustive(),
            Self::Bearer(_) => formatter.write_str("Bearer(_)"),
        }
    }
}

impl Auth {
    /// Creates header-based authentication.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` or `value` are not valid for an HTTP header.
    pub fn header(name: &str, value: &str) -> Result<Self> {
        let name = header::HeaderName::try_from(name)
            .map_err(|err| Error::Internal(format!("invalid auth header name `{name}`: {err}")))?;
        let mut value = header::HeaderValue::try_from(value)
            .map_err(|err| Error::Internal(format!("invalid value for auth header `{name}`: {err}")))?;
        value.set_sensitive(true);
        Ok(Self::Header { name, value })
    }
}

/// Page of a paginated list endpoint.
#[derive(Debug, Deserialize)]
pub struct Page<T> {
    /// Items on this page.
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
    /// Indicator of the next page; `null` or an empty string if this is the last page.
    #[serde(default)]
    pub next: Option<String>,
}

impl<T> Page<T> {
    fn has_next(&self) -> bool {
        self.next.as_deref().is_some_and(|next| !next.is_empty())
    }
}

/// Client issuing authenticated requests to one upstream base URL with a bounded timeout.
///
/// Clients are cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    inner: reqwest::Client,
    base_url: String,
    auth: Auth,
}

impl UpstreamClient {
    /// Creates a client for `base_url` (without a trailing slash) with the specified timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized (e.g., TLS backend failure).
    pub fn new(base_url: &str, auth: Auth, timeout: Duration) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|err| Error::Internal(format!("cannot build HTTP client: {err}")))?;
        Ok(Self {
            inner,
            base_url: base_url.trim_end_matches('/').to_owned(),
            auth,
        })
    }

    /// Returns a client for the same upstream that authenticates differently.
    #[must_use]
    pub fn with_auth(&self, auth: Auth) -> Self {
        Self {
            inner: self.inner.clone(),
            base_url: self.base_url.clone(),
            auth,
        }
    }

    /// Returns the base URL of this client.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL for `path` (which must start with `/`).
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .inner
            .request(method, self.url(path))
            .header(header::ACCEPT, "application/json");
        match &self.auth {
            Auth::None => builder,
            Auth::Header { name, value } => builder.header(name, value),
            Auth::Bearer(token) => builder.bearer_auth(token),
        }
    }

    /// Issues a GET request and decodes the JSON response.
    ///
    /// # Errors
    ///
    /// - [`Error::UpstreamUnavailable`] on network errors or timeout.
    /// - [`Error::BadUpstreamResponse`] on a non-2xx status or if the body cannot be decoded.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        decode_json(send(self.request(Method::GET, path)).await?).await
    }

    /// Same as [`Self::get_json()`], but authenticates with the provided bearer token
    /// instead of the client-wide auth.
    ///
    /// # Errors
    ///
    /// See [`Self::get_json()`].
    pub async fn get_json_with_bearer<T: DeserializeOwned>(&self, path: &str, token: &str) -> Result<T> {
        let builder = self
            .inner
            .get(self.url(path))
            .header(header::ACCEPT, "application/json")
            .bearer_auth(token);
        decode_json(send(builder).await?).await
    }

    /// Fetches all pages of a paginated list endpoint, following the `next` indicator.
    /// `page_path` maps a 1-based page number to the request path.
    ///
    /// # Errors
    ///
    /// Fails if fetching any page fails, or if the upstream keeps announcing new pages
    /// for an unreasonable number of pages.
    pub async fn get_paginated<T, F>(&self, page_path: F) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
        F: Fn(u32) -> String,
    {
        let mut items = vec![];
        for page_number in 1..=MAX_PAGES {
            let path = page_path(page_number);
            let page: Page<T> = self.get_json(&path).await?;
            let has_next = page.has_next();
            items.extend(page.results);
            if !has_next {
                return Ok(items);
            }
        }
        Err(Error::bad_response(
            self.url(&page_path(MAX_PAGES)),
            format_args!("pagination did not terminate after {MAX_PAGES} pages"),
        ))
    }

    /// Issues a HEAD request and returns the `Content-Length` of the response.
    ///
    /// Any failure (network error, error status, missing or malformed header) yields 0;
    /// callers use this for approximate size totals.
    pub async fn content_length(&self, path: &str) -> u64 {
        match send(self.request(Method::HEAD, path)).await {
            Ok(response) => response
                .headers()
                .get(header::CONTENT_LENGTH)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse().ok())
                .unwrap_or(0),
            Err(err) => {
                tracing::debug!(%err, path, "HEAD request failed; counting its size as 0");
                0
            }
        }
    }
}

/// Sends a request and checks the response status.
pub(crate) async fn send(builder: RequestBuilder) -> Result<Response> {
    METRICS.upstream_requests.inc();
    let response = builder.send().await.map_err(|err| Error::UpstreamUnavailable {
        url: err.url().map(ToString::to_string).unwrap_or_default(),
        source: err.without_url(),
    })?;

    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(Error::bad_response(
            response.url().as_str(),
            format_args!("HTTP status {status}"),
        ))
    }
}

pub(crate) async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let url = response.url().to_string();
    let body = response
        .bytes()
        .await
        .map_err(|err| Error::UpstreamUnavailable {
            url: url.clone(),
            source: err.without_url(),
        })?;
    serde_json::from_slice(&body).map_err(|err| Error::bad_response(url, format_args!("malformed JSON: {err}")))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::{json, Value};

    use super::*;
    use crate::testing::{MockResponse, MockUpstream};

    #[tokio::test]
    async fn decoding_json_with_auth_header() {
        let upstream = MockUpstream::builder()
            .route("/api/jobs", MockResponse::json(&json!({ "ok": true })))
            .start()
            .await;
        let auth = Auth::header("x-api-key", "secret").unwrap();
        let client = UpstreamClient::new(&upstream.base_url(), auth, DEFAULT_TIMEOUT).unwrap();

        let value: Value = client.get_json("/api/jobs").await.unwrap();
        assert_eq!(value, json!({ "ok": true }));

        let requests = upstream.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "GET");
        assert_eq!(requests[0].header("x-api-key"), Some("secret"));
        assert_eq!(requests[0].header("accept"), Some("application/json"));
    }

    #[tokio::test]
    async fn bearer_token_per_request() {
        let upstream = MockUpstream::builder()
            .route("/devices", MockResponse::json(&json!({ "devices": [] })))
            .start()
            .await;
        let client = UpstreamClient::new(&upstream.base_url(), Auth::None, DEFAULT_TIMEOUT).unwrap();

        let _: Value = client.get_json_with_bearer("/devices", "t0ken").await.unwrap();
        assert_eq!(upstream.requests()[0].header("authorization"), Some("Bearer t0ken"));
    }

    #[tokio::test]
    async fn malformed_json_is_bad_response() {
        let upstream = MockUpstream::builder()
            .route("/broken", MockResponse::text(200, "{ not json"))
            .start()
            .await;
        let client = UpstreamClient::new(&upstream.base_url(), Auth::None, DEFAULT_TIMEOUT).unwrap();

        let err = client.get_json::<Value>("/broken").await.unwrap_err();
        assert_matches!(err, Error::BadUpstreamResponse { message, .. } if message.contains("malformed JSON"));
    }

    #[tokio::test]
    async fn error_status_is_bad_response() {
        let upstream = MockUpstream::builder().start().await;
        let client = UpstreamClient::new(&upstream.base_url(), Auth::None, DEFAULT_TIMEOUT).unwrap();

        let err = client.get_json::<Value>("/missing").await.unwrap_err();
        assert_matches!(err, Error::BadUpstreamResponse { message, .. } if message.contains("404"));
    }

    #[tokio::test]
    async fn slow_upstream_times_out() {
        let upstream = MockUpstream::builder()
            .route(
                "/slow",
                MockResponse::json(&json!({})).with_delay(Duration::from_secs(5)),
            )
            .start()
            .await;
        let client =
            UpstreamClient::new(&upstream.base_url(), Auth::None, Duration::from_millis(200)).unwrap();

        let err = client.get_json::<Value>("/slow").await.unwrap_err();
        assert_matches!(err, Error::UpstreamUnavailable { .. });
    }

    #[tokio::test]
    async fn unreachable_upstream_is_unavailable() {
        // Port 9 (discard) is essentially never listening on loopback.
        let client = UpstreamClient::new("http://127.0.0.1:9", Auth::None, DEFAULT_TIMEOUT).unwrap();
        let err = client.get_json::<Value>("/").await.unwrap_err();
        assert_matches!(err, Error::UpstreamUnavailable { .. });
    }

    #[tokio::test]
    async fn following_pagination() {
        let upstream = MockUpstream::builder()
            .route(
                "/items/?page=1",
                MockResponse::json(&json!({ "results": [{ "id": 1 }, { "id": 2 }], "next": "/items/?page=2" })),
            )
            .route(
                "/items/?page=2",
                MockResponse::json(&json!({ "results": [{ "id": 3 }], "next": null })),
            )
            .start()
            .await;
        let client = UpstreamClient::new(&upstream.base_url(), Auth::None, DEFAULT_TIMEOUT).unwrap();

        let items: Vec<Value> = client
            .get_paginated(|page| format!("/items/?page={page}"))
            .await
            .unwrap();
        let ids: Vec<_> = items.iter().map(|item| item["id"].as_u64().unwrap()).collect();
        assert_eq!(ids, [1, 2, 3]);
        assert_eq!(upstream.requests().len(), 2);
    }

    #[tokio::test]
    async fn content_length_defaults_to_zero() {
        let upstream = MockUpstream::builder()
            .route("/doc/1", MockResponse::sized(1_234))
            .start()
            .await;
        let client = UpstreamClient::new(&upstream.base_url(), Auth::None, DEFAULT_TIMEOUT).unwrap();

        assert_eq!(client.content_length("/doc/1").await, 1_234);
        assert_eq!(client.content_length("/doc/2").await, 0);
        assert!(upstream.requests().iter().all(|req| req.method == "HEAD"));
    }
}
