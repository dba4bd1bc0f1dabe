use std::time::Duration;

use url::Url;

use crate::error::Error;
use crate::page::env_millis;

/// Relay settings.
///
/// Use [`from_env()`](RelayConfig::from_env) for convention-based setup,
/// or [`new()`](RelayConfig::new) with `with_*` methods for full control.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub(crate) backend_url: Url,
    pub(crate) port: u16,
    pub(crate) validate_timeout: Duration,
    pub(crate) business_timeout: Duration,
    pub(crate) status_timeout: Duration,
    pub(crate) health_timeout: Duration,
}

impl RelayConfig {
    /// Create config forwarding to `backend_url`. Other fields use defaults.
    #[must_use]
    pub fn new(backend_url: Url) -> Self {
        Self {
            backend_url,
            port: 3001,
            validate_timeout: Duration::from_secs(5),
            business_timeout: Duration::from_secs(10),
            status_timeout: Duration::from_secs(5),
            health_timeout: Duration::from_secs(3),
        }
    }

    /// Create config from environment variables.
    ///
    /// # Optional env vars
    /// - `BACKEND_URL`: upstream authority (default `http://localhost:3000`)
    /// - `PORT`: listening port (default `3001`)
    /// - `RELAY_VALIDATE_TIMEOUT_MS`: token validation timeout (default 5000)
    /// - `RELAY_BUSINESS_TIMEOUT_MS`: business call timeout (default 10000)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is set but malformed.
    pub fn from_env() -> Result<Self, Error> {
        let backend = std::env::var("BACKEND_URL").unwrap_or_else(|_| "http://localhost:3000".into());
        let backend_url: Url = backend
            .parse()
            .map_err(|e| Error::Config(format!("BACKEND_URL: {e}")))?;

        let mut config = Self::new(backend_url);

        if let Ok(port) = std::env::var("PORT") {
            let port = port
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("PORT: {e}")))?;
            config = config.with_port(port);
        }
        if let Some(timeout) = env_millis("RELAY_VALIDATE_TIMEOUT_MS")? {
            config = config.with_validate_timeout(timeout);
        }
        if let Some(timeout) = env_millis("RELAY_BUSINESS_TIMEOUT_MS")? {
            config = config.with_business_timeout(timeout);
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_validate_timeout(mut self, timeout: Duration) -> Self {
        self.validate_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_business_timeout(mut self, timeout: Duration) -> Self {
        self.business_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_status_timeout(mut self, timeout: Duration) -> Self {
        self.status_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    #[must_use]
    pub fn backend_url(&self) -> &Url {
        &self.backend_url
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
}
