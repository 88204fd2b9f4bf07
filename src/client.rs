use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use reqwest::Method;
use serde_json::Value;
use url::Url;

use crate::{
    executor::RequestExecutor, CallContext, ClientConfig, Diagnostic, FabricError, FabricRequest,
    Payload, ProxyConfig, ReqwestTransport, RequestSigner, Result, RetryOptions, Transport,
};

pub(crate) struct ClientInner {
    pub(crate) config: ClientConfig,
    base_url: String,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) signer: Option<Arc<dyn RequestSigner>>,
    pending: Mutex<BTreeSet<String>>,
}

impl ClientInner {
    pub(crate) fn url_for(&self, path: &str) -> String {
        if path.is_empty() {
            return self.base_url.clone();
        }
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

/// REST client for the fabric-management service.
///
/// Cloning is cheap and yields a handle onto the same configuration, transport
/// and pending-changes set. Build another client for independent state.
#[derive(Clone)]
pub struct FabricClient {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for FabricClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FabricClient")
            .field("base_url", &self.inner.base_url)
            .field("config", &self.inner.config)
            .field("signer", &self.inner.signer)
            .finish()
    }
}

/// Builds a [`FabricClient`].
#[derive(Clone)]
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    signer: Option<Arc<dyn RequestSigner>>,
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("config", &self.config)
            .field("custom_transport", &self.transport.is_some())
            .field("signer", &self.signer)
            .finish()
    }
}

impl ClientBuilder {
    /// Starts from default settings for `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::from_config(ClientConfig::new(base_url))
    }

    /// Starts from an existing configuration.
    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            signer: None,
        }
    }

    /// Sets the API token sent as a bearer credential.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.config.token = Some(token.into());
        self
    }

    /// Sets the private key used to sign requests when no token is set.
    pub fn private_key(mut self, private_key: impl Into<String>) -> Self {
        self.config.private_key = Some(private_key.into());
        self
    }

    /// Disables TLS certificate verification.
    pub fn insecure_tls(mut self, insecure: bool) -> Self {
        self.config.insecure_tls = insecure;
        self
    }

    /// Routes requests through an upstream proxy.
    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.config.proxy = Some(proxy);
        self
    }

    /// Sets the per-attempt request timeout.
    pub fn timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Sets the retry budget and backoff bounds.
    pub fn retry(mut self, retry: RetryOptions) -> Self {
        self.config.retry = retry;
        self
    }

    /// Keeps request and response bodies out of the logs.
    pub fn suppress_payload_logging(mut self, suppress: bool) -> Self {
        self.config.suppress_payload_logging = suppress;
        self
    }

    /// Replaces the default `reqwest` transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Installs the signer used with private-key credentials.
    pub fn signer(mut self, signer: Arc<dyn RequestSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Returns the configuration built so far.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Validates the configuration and creates the client.
    ///
    /// An invalid base URL is a [`FabricError::Configuration`]: no request made
    /// with it could ever succeed, so callers should treat it as fatal.
    pub fn build(self) -> Result<FabricClient> {
        let base_url = validate_base_url(&self.config.base_url)?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::from_config(&self.config)?),
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(
            base_url = %base_url,
            retries = self.config.retry.max_attempts,
            "fabric client ready"
        );

        Ok(FabricClient {
            inner: Arc::new(ClientInner {
                config: self.config,
                base_url,
                transport,
                signer: self.signer,
                pending: Mutex::new(BTreeSet::new()),
            }),
        })
    }
}

impl FabricClient {
    /// Starts a [`ClientBuilder`] for `base_url`.
    pub fn builder(base_url: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(base_url)
    }

    /// Creates a client authenticating with an API token.
    pub fn new_bearer(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        Self::builder(base_url).token(token).build()
    }

    /// Creates a client from `FABRIC_*` environment variables.
    ///
    /// See [`ClientConfig::from_env`] for the variables read.
    pub fn from_env() -> Result<Self> {
        ClientBuilder::from_config(ClientConfig::from_env()?).build()
    }

    /// Returns the configuration the client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub(crate) fn inner(&self) -> &ClientInner {
        &self.inner
    }

    /// Whether both handles share configuration, transport and pending set.
    pub fn shares_state_with(&self, other: &FabricClient) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Executes one logical call.
    ///
    /// Returns `Ok(None)` for empty successes (204) and for 404 on GET/DELETE.
    pub async fn call(&self, request: FabricRequest) -> Result<Option<Value>> {
        self.call_with_context(request, &CallContext::default())
            .await
    }

    /// Like [`FabricClient::call`], bounded by the deadline and cancellation of `ctx`.
    pub async fn call_with_context(
        &self,
        request: FabricRequest,
        ctx: &CallContext,
    ) -> Result<Option<Value>> {
        RequestExecutor::new(&self.inner).execute(request, ctx).await
    }

    /// Executes a call and flattens the outcome for callers that only need a
    /// document or a printable diagnostic.
    ///
    /// Exactly one of the following holds:
    /// - `(Some(doc), None)` on success with a body
    /// - `(None, None)` on success without a body, including 404 on GET/DELETE
    /// - `(None, Some(diagnostic))` on failure
    pub async fn execute_rest_call(
        &self,
        path: &str,
        method: Method,
        payload: Option<Value>,
    ) -> (Option<Value>, Option<Diagnostic>) {
        let mut request = FabricRequest::new(method.clone(), path);
        request.payload = payload.map(Payload::Json);

        match self.call(request).await {
            Ok(document) => (document, None),
            Err(err) => {
                let diagnostic = Diagnostic::from_error(&method, path, &err);
                #[cfg(feature = "tracing")]
                tracing::debug!(summary = %diagnostic.summary, "rest call failed");
                (None, Some(diagnostic))
            }
        }
    }

    /// Sends a `GET`. A 404 yields `Ok(None)`.
    pub async fn get(&self, path: &str) -> Result<Option<Value>> {
        self.call(FabricRequest::get(path)).await
    }

    /// Sends a `POST` with a JSON body.
    pub async fn post(&self, path: &str, payload: Value) -> Result<Option<Value>> {
        self.call(FabricRequest::post(path).with_json(payload)).await
    }

    /// Sends a `PUT` with a JSON body.
    pub async fn put(&self, path: &str, payload: Value) -> Result<Option<Value>> {
        self.call(FabricRequest::put(path).with_json(payload)).await
    }

    /// Sends a `PATCH` with a JSON body.
    pub async fn patch(&self, path: &str, payload: Value) -> Result<Option<Value>> {
        self.call(FabricRequest::patch(path).with_json(payload)).await
    }

    /// Sends a `DELETE`. A 404 yields `Ok(None)`.
    pub async fn delete(&self, path: &str) -> Result<Option<Value>> {
        self.call(FabricRequest::delete(path)).await
    }

    /// Records that `fabric_id` has uncommitted candidate changes.
    pub fn mark_pending(&self, fabric_id: impl Into<String>) {
        self.pending().insert(fabric_id.into());
    }

    /// Snapshot of fabrics with uncommitted changes, in sorted order.
    pub fn pending_fabrics(&self) -> Vec<String> {
        self.pending().iter().cloned().collect()
    }

    pub(crate) fn clear_pending(&self, fabric_id: &str) -> bool {
        self.pending().remove(fabric_id)
    }

    fn pending(&self) -> MutexGuard<'_, BTreeSet<String>> {
        // The set holds plain ids; a panic elsewhere cannot leave it half-updated.
        self.inner
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn validate_base_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let url = Url::parse(trimmed).map_err(|err| {
        FabricError::Configuration(format!("invalid base URL '{trimmed}': {err}"))
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(FabricError::Configuration(format!(
            "invalid base URL '{trimmed}': scheme must be http or https"
        )));
    }
    if url.host_str().is_none() {
        return Err(FabricError::Configuration(format!(
            "invalid base URL '{trimmed}': missing host"
        )));
    }
    Ok(trimmed.trim_end_matches('/').to_owned())
}
