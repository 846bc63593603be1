//! OAuth2 access tokens obtained with a long-lived refresh token.

use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use reqwest::header;
use serde::Deserialize;

use crate::{
    clock::{Clock, SystemClock},
    metrics::METRICS,
    upstream::{decode_json, send},
    Error, Result,
};

/// Tokens are considered expired this long before their actual expiration.
pub const EXPIRY_MARGIN: Duration = Duration::from_secs(60);
/// Lifetime assumed when the token endpoint does not report `expires_in`.
const DEFAULT_EXPIRES_IN: u64 = 3_600;
/// Upper bound on the token lifetime reported by the token endpoint.
const MAX_EXPIRES_IN: u64 = 365 * 24 * 3_600;

/// Client credentials and refresh token for the OAuth2 refresh-token grant.
#[derive(Clone)]
pub struct OAuthCredentials {
    /// Token endpoint URL, e.g. `https://oauth2.googleapis.com/token`.
    pub token_url: String,
    /// OAuth client ID.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// Long-lived refresh token.
    pub refresh_token: String,
}

impl fmt::Debug for OAuthCredentials {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("OAuthCredentials")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

/// Provides access tokens, exchanging the refresh token when there is no valid one.
///
/// The provider is either in the "no token" state or holds a token together with its
/// (margin-adjusted) expiration time. A failed exchange leaves the provider without a token,
/// so the next call retries immediately. Concurrent callers racing on an expired token
/// may each perform an exchange.
pub struct TokenProvider {
    http: reqwest::Client,
    credentials: OAuthCredentials,
    clock: Arc<dyn Clock>,
    token: Mutex<Option<AccessToken>>,
}

impl fmt::Debug for TokenProvider {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let expires_at = self
            .token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|token| token.expires_at);
        formatter
            .debug_struct("TokenProvider")
            .field("credentials", &self.credentials)
            .field("expires_at", &expires_at)
            .finish_non_exhaustive()
    }
}

impl TokenProvider {
    /// Creates a provider without a token. Exchanges time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new(credentials: OAuthCredentials, timeout: Duration) -> Result<Self> {
        Self::with_clock(credentials, timeout, Arc::new(SystemClock))
    }

    /// Same as [`Self::new()`], but reads time from the provided clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn with_clock(
        credentials: OAuthCredentials,
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|err| Error::Internal(format!("cannot build HTTP client: {err}")))?;
        Ok(Self {
            http,
            credentials,
            clock,
            token: Mutex::new(None),
        })
    }

    /// Returns a valid access token, exchanging the refresh token if necessary.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthFailure`] if the exchange fails.
    pub async fn access_token(&self) -> Result<String> {
        let now = self.clock.now();
        if let Some(token) = self.current_token(now) {
            return Ok(token);
        }

        match self.exchange().await {
            Ok(response) => {
                let expires_in = response
                    .expires_in
                    .unwrap_or(DEFAULT_EXPIRES_IN)
                    .min(MAX_EXPIRES_IN);
                let expires_in = Duration::from_secs(expires_in);
                let value = response.access_token.unwrap_or_default();
                let expires_at = now
                    .checked_add(expires_in)
                    .and_then(|expires_at| expires_at.checked_sub(EXPIRY_MARGIN))
                    .unwrap_or(now);
                tracing::info!(
                    expires_in_sec = expires_in.as_secs(),
                    "Obtained access token from `{}`",
                    self.credentials.token_url
                );
                *self.lock() = Some(AccessToken {
                    value: value.clone(),
                    expires_at,
                });
                Ok(value)
            }
            Err(err) => {
                *self.lock() = None;
                Err(err)
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<AccessToken>> {
        self.token.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_token(&self, now: Instant) -> Option<String> {
        let token = self.lock();
        let token = token.as_ref()?;
        (now < token.expires_at).then(|| token.value.clone())
    }

    async fn exchange(&self) -> Result<TokenResponse> {
        METRICS.token_exchanges.inc();
        let form = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("refresh_token", self.credentials.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];
        let builder = self
            .http
            .post(&self.credentials.token_url)
            .header(header::ACCEPT, "application/json")
            .form(&form);

        let response = send(builder).await.map_err(|err| Error::AuthFailure(err.to_string()))?;
        let response: TokenResponse = decode_json(response)
            .await
            .map_err(|err| Error::AuthFailure(err.to_string()))?;
        if response.access_token.as_deref().map_or(true, str::is_empty) {
            return Err(Error::AuthFailure(
                "token endpoint response has no `access_token`".to_owned(),
            ));
        }
        Ok(response)
    }
}
