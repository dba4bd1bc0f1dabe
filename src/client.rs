use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::authority::{
    Authority, BusinessRequest, BusinessResponse, TokenValidation, TransportError,
    ValidateTokenRequest,
};
use crate::error::Error;
use crate::types::AccessToken;

const VALIDATE_TOKEN_PATH: &str = "/api/validate-token";

/// Where the relay lives and how long the page waits for it.
///
/// ```rust,ignore
/// let config = AuthorityConfig::new("https://gift.example.com".parse()?)
///     .with_timeout(Duration::from_secs(15));
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct AuthorityConfig {
    pub(crate) base_url: Url,
    pub(crate) validate_path: String,
    pub(crate) timeout: Option<Duration>,
}

impl AuthorityConfig {
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            validate_path: VALIDATE_TOKEN_PATH.into(),
            timeout: None,
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `GIFTGATE_AUTHORITY_URL`: base URL of the relay
    ///
    /// # Optional env vars
    /// - `GIFTGATE_AUTHORITY_TIMEOUT_MS`: per-request timeout
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the URL is missing or invalid.
    pub fn from_env() -> Result<Self, Error> {
        let url_str = std::env::var("GIFTGATE_AUTHORITY_URL")
            .map_err(|_| Error::Config("GIFTGATE_AUTHORITY_URL is required".into()))?;
        let base_url: Url = url_str
            .parse()
            .map_err(|e| Error::Config(format!("GIFTGATE_AUTHORITY_URL: {e}")))?;

        let mut config = Self::new(base_url);
        if let Some(timeout) = crate::page::env_millis("GIFTGATE_AUTHORITY_TIMEOUT_MS")? {
            config = config.with_timeout(timeout);
        }
        Ok(config)
    }

    /// Override the validate-token path (default `/api/validate-token`).
    #[must_use]
    pub fn with_validate_path(mut self, path: impl Into<String>) -> Self {
        self.validate_path = path.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

/// [`Authority`] reached over HTTP through the relay.
pub struct HttpAuthority {
    config: AuthorityConfig,
    http: reqwest::Client,
}

impl HttpAuthority {
    #[must_use]
    pub fn new(config: AuthorityConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    async fn send_json<B>(&self, path: &str, body: &B) -> Result<reqwest::Response, TransportError>
    where
        B: Serialize + ?Sized,
    {
        let url = endpoint_url(&self.config.base_url, path)
            .map_err(|e| TransportError::Unavailable(format!("invalid endpoint {path}: {e}")))?;

        let mut request = self.http.post(url).json(body);
        if let Some(timeout) = self.config.timeout {
            request = request.timeout(timeout);
        }
        Ok(request.send().await?)
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, TransportError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = Self::ensure_answered(self.send_json(path, body).await?).await?;
        response.json::<T>().await.map_err(Into::into)
    }

    /// Server errors mean the relay could not get an answer upstream; every
    /// other status carries an authoritative JSON body.
    async fn ensure_answered(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, TransportError> {
        if !response.status().is_server_error() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let detail = response.text().await.unwrap_or_default();
        Err(TransportError::Status { status, detail })
    }
}

/// Resolves `path` below `base`, keeping any path prefix `base` carries.
///
/// `http://host/v1` + `/api/redeem` gives `http://host/v1/api/redeem`.
pub(crate) fn endpoint_url(base: &Url, path: &str) -> Result<Url, url::ParseError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let dir = format!("{}/", base.path());
        base.set_path(&dir);
    }
    base.join(path.trim_start_matches('/'))
}

impl Authority for HttpAuthority {
    async fn validate_token(&self, token: &AccessToken) -> Result<TokenValidation, TransportError> {
        let body = ValidateTokenRequest {
            token: token.clone(),
        };
        self.post_json(&self.config.validate_path, &body).await
    }

    /// A server error that still carries a business refusal (`success: false`
    /// with an `error` text) is returned as that refusal.
    async fn submit(&self, request: &BusinessRequest) -> Result<BusinessResponse, TransportError> {
        let response = self.send_json(request.flow.endpoint(), request).await?;
        if !response.status().is_server_error() {
            return response.json().await.map_err(Into::into);
        }

        let status = response.status().as_u16();
        let detail = response.text().await.unwrap_or_default();
        match serde_json::from_str::<BusinessResponse>(&detail) {
            Ok(answer) if !answer.success && answer.error.is_some() => {
                tracing::warn!(status, flow = ?request.flow, "Business call refused with server error");
                Ok(answer)
            }
            _ => Err(TransportError::Status { status, detail }),
        }
    }
}
