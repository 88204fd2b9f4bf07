use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::wire::{value_to_text, ErrorEnvelope};
use crate::{FabricError, Result};

/// Error code used when the service envelope carries none.
pub const NO_ERROR_CODE: &str = "NO_ERROR_CODE";
/// Service is temporarily unable to handle the request.
pub const ERR_CODE_SERVICE_UNAVAILABLE: &str = "ERR_CODE_SERVICE_UNAVAILABLE";
/// Caller is being rate limited.
pub const ERR_CODE_TOO_MANY_REQUESTS: &str = "ERR_CODE_TOO_MANY_REQUESTS";

/// Structured failure reported by the fabric service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceError {
    /// Never empty; [`NO_ERROR_CODE`] when the service sent none.
    pub code: String,
    pub message: String,
    /// Request field the service rejected.
    pub field: Option<String>,
    /// Offending value of [`ServiceError::field`].
    pub value: Option<String>,
    pub causes: Vec<String>,
    pub critical: bool,
    pub notes: Option<String>,
    /// Status from the envelope, or the HTTP status when absent.
    pub status: u16,
    pub tracking_id: Option<String>,
}

impl ServiceError {
    pub(crate) fn from_envelope(envelope: ErrorEnvelope, http_status: u16) -> Self {
        let code = envelope
            .error_code
            .map(|code| code.trim().to_owned())
            .filter(|code| !code.is_empty())
            .unwrap_or_else(|| NO_ERROR_CODE.to_owned());

        Self {
            code,
            message: envelope.message.unwrap_or_default(),
            field: envelope.field.filter(|field| !field.is_empty()),
            value: envelope.value.and_then(value_to_text),
            causes: envelope.causes.unwrap_or_default(),
            critical: envelope.critical.unwrap_or(false),
            notes: envelope.notes.and_then(value_to_text),
            status: envelope.status.unwrap_or(http_status),
            tracking_id: envelope.tracking_id.filter(|id| !id.is_empty()),
        }
    }

    /// Whether the service signalled overload or rate limiting.
    pub fn is_retryable(&self) -> bool {
        self.code == ERR_CODE_SERVICE_UNAVAILABLE || self.code == ERR_CODE_TOO_MANY_REQUESTS
    }

    pub fn has_code(&self) -> bool {
        self.code != NO_ERROR_CODE
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{} (status {})", self.code, self.status)
        } else {
            write!(f, "{}: {} (status {})", self.code, self.message, self.status)
        }
    }
}

/// Request body.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// Serialized once before the first attempt.
    Json(Value),
    /// Pre-encoded JSON sent verbatim.
    ///
    /// The bytes go out with `Content-Type: application/json` like a
    /// [`Payload::Json`] body, so they must already be valid JSON.
    Raw(Vec<u8>),
}

/// One logical call against the fabric service.
#[derive(Clone, Debug, PartialEq)]
pub struct FabricRequest {
    pub method: Method,
    /// Path relative to the client's base URL, e.g. `/api/v1/fabrics`.
    pub path: String,
    pub payload: Option<Payload>,
    /// When `false` no credentials are attached.
    pub authenticated: bool,
}

impl FabricRequest {
    /// Creates an authenticated request without a payload.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            payload: None,
            authenticated: true,
        }
    }

    /// Creates a `GET` request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Creates a `POST` request.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Creates a `PUT` request.
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// Creates a `PATCH` request.
    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    /// Creates a `DELETE` request.
    ///
    /// Any payload attached later is dropped when the request is built.
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attaches a JSON document as the body. Ignored for `GET` and `DELETE`.
    pub fn with_json(mut self, payload: Value) -> Self {
        self.payload = Some(Payload::Json(payload));
        self
    }

    /// Attaches pre-encoded JSON bytes as the body. Ignored for `GET` and `DELETE`.
    pub fn with_raw(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = Some(Payload::Raw(payload.into()));
        self
    }

    /// Sends the request without credentials.
    pub fn unauthenticated(mut self) -> Self {
        self.authenticated = false;
        self
    }
}

/// Cancels every call whose [`CallContext`] was derived from this handle.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Returns a context bound to this handle.
    pub fn context(&self) -> CallContext {
        CallContext::new().with_cancel(self)
    }
}

/// Deadline and cancellation applied to sends and backoff waits of one call.
#[derive(Clone, Debug, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_cancel(mut self, handle: &CancelHandle) -> Self {
        self.cancel = Some(handle.tx.subscribe());
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Runs `fut` until it completes, the deadline passes or the call is cancelled.
    pub(crate) async fn guard<F: Future>(&self, fut: F) -> Result<F::Output> {
        let bounded = async {
            match self.deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, fut)
                    .await
                    .map_err(|_| FabricError::DeadlineExceeded),
                None => Ok(fut.await),
            }
        };

        tokio::select! {
            biased;
            () = self.cancelled() => Err(FabricError::Cancelled),
            output = bounded => output,
        }
    }

    async fn cancelled(&self) {
        match &self.cancel {
            Some(rx) => {
                let mut rx = rx.clone();
                // A dropped handle can no longer cancel.
                if rx.wait_for(|cancelled| *cancelled).await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
            None => std::future::pending::<()>().await,
        }
    }
}
