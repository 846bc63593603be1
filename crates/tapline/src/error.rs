//! Error taxonomy shared by all adapters.

use std::fmt;

/// Errors produced while refreshing an adapter snapshot.
///
/// Every variant is reported to the HTTP client verbatim (as the `error` field of JSON routes
/// or as a `# error: ...` line on the metrics route), so messages should make sense on their own.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Upstream could not be reached (connection failure, timeout, interrupted body).
    #[error("upstream `{url}` is unavailable: {source}")]
    UpstreamUnavailable {
        /// URL of the failed request.
        url: String,
        /// Underlying transport error.
        #[source]
        source: reqwest::Error,
    },
    /// Upstream responded, but with an error status or a payload of unexpected shape.
    #[error("bad response from upstream `{url}`: {message}")]
    BadUpstreamResponse {
        /// URL of the request.
        url: String,
        /// What exactly was wrong with the response.
        message: String,
    },
    /// Exchanging credentials for an access token failed.
    #[error("credential exchange failed: {0}")]
    AuthFailure(String),
    /// Anything unexpected during mapping or rendering.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a [`Self::BadUpstreamResponse`] error.
    pub fn bad_response(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::BadUpstreamResponse {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Short static name of the error kind, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UpstreamUnavailable { .. } => "upstream_unavailable",
            Self::BadUpstreamResponse { .. } => "bad_upstream_response",
            Self::AuthFailure(_) => "auth_failure",
            Self::Internal(_) => "internal",
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
