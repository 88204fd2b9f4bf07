use std::fmt;
use std::time::Duration;

use crate::{FabricError, Result};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(100);
/// Default lower bound of the retry backoff.
pub const DEFAULT_MIN_BACKOFF: Duration = Duration::from_secs(4);
/// Default upper bound of the retry backoff.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);
/// Default exponential growth factor of the retry backoff.
pub const DEFAULT_BACKOFF_FACTOR: f64 = 3.0;

/// Configures retry behavior.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryOptions {
    /// Maximum number of retries after the initial attempt. `0` disables retries.
    pub max_attempts: u32,
    /// Smallest delay between two attempts.
    pub min_backoff: Duration,
    /// Largest delay between two attempts.
    pub max_backoff: Duration,
    /// Exponential growth factor applied per attempt.
    pub backoff_factor: f64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            min_backoff: DEFAULT_MIN_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
        }
    }
}

/// Upstream proxy used by the default transport.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
        }
    }

    /// Attaches basic-auth credentials sent when connecting to the proxy.
    pub fn with_basic_auth(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

impl fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Everything a client needs to talk to the fabric service.
///
/// Immutable once handed to [`crate::ClientBuilder`].
#[derive(Clone)]
pub struct ClientConfig {
    /// Service root, e.g. `https://fabric.example.net`.
    pub base_url: String,
    /// API token sent as `Authorization: Bearer <token>`.
    pub token: Option<String>,
    /// Private key used to sign requests when no token is configured.
    pub private_key: Option<String>,
    /// Skips TLS certificate verification.
    pub insecure_tls: bool,
    pub proxy: Option<ProxyConfig>,
    /// Per-request timeout.
    pub timeout: Duration,
    pub retry: RetryOptions,
    /// Keeps request and response bodies out of the logs.
    pub suppress_payload_logging: bool,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("insecure_tls", &self.insecure_tls)
            .field("proxy", &self.proxy)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("suppress_payload_logging", &self.suppress_payload_logging)
            .finish()
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            private_key: None,
            insecure_tls: false,
            proxy: None,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryOptions::default(),
            suppress_payload_logging: false,
        }
    }

    /// Builds a configuration from environment variables.
    ///
    /// Reads:
    /// - `FABRIC_URL` (required): service root URL
    /// - `FABRIC_TOKEN`: API token
    /// - `FABRIC_PRIVATE_KEY`: signing key, used when no token is set
    /// - `FABRIC_INSECURE`: `true`/`1` disables certificate checks
    /// - `FABRIC_PROXY_URL`, `FABRIC_PROXY_USER`, `FABRIC_PROXY_PASSWORD`
    /// - `FABRIC_TIMEOUT_SECS`: request timeout in seconds
    /// - `FABRIC_MAX_RETRIES`: retry budget
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let base_url = var("FABRIC_URL").ok_or_else(|| {
            FabricError::Configuration("missing FABRIC_URL environment variable".to_owned())
        })?;

        let mut config = Self::new(base_url);
        config.token = var("FABRIC_TOKEN");
        config.private_key = var("FABRIC_PRIVATE_KEY");
        config.insecure_tls = var("FABRIC_INSECURE")
            .map(|value| parse_flag("FABRIC_INSECURE", &value))
            .transpose()?
            .unwrap_or(false);

        if let Some(url) = var("FABRIC_PROXY_URL") {
            config.proxy = Some(ProxyConfig {
                url,
                username: var("FABRIC_PROXY_USER"),
                password: var("FABRIC_PROXY_PASSWORD"),
            });
        }

        if let Some(secs) = var("FABRIC_TIMEOUT_SECS") {
            let secs = secs.trim().parse::<u64>().map_err(|err| {
                FabricError::Configuration(format!("invalid FABRIC_TIMEOUT_SECS '{secs}': {err}"))
            })?;
            config.timeout = Duration::from_secs(secs);
        }

        if let Some(retries) = var("FABRIC_MAX_RETRIES") {
            config.retry.max_attempts = retries.trim().parse::<u32>().map_err(|err| {
                FabricError::Configuration(format!("invalid FABRIC_MAX_RETRIES '{retries}': {err}"))
            })?;
        }

        Ok(config)
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(FabricError::Configuration(format!(
            "invalid {key} '{other}': expected true or false"
        ))),
    }
}
