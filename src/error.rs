use std::error::Error as StdError;
use std::fmt;

use reqwest::Method;

use crate::ServiceError;

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum FabricError {
    /// Invalid client configuration such as an unusable base URL.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Neither a token nor a private key is configured.
    #[error("missing credentials: configure either an API token or a private key")]
    MissingCredentials,
    /// A private key is configured but no signer is installed.
    #[error("request signing unavailable: {0}")]
    SigningUnavailable(String),
    /// The installed signer failed.
    #[error("request signing failed: {0}")]
    Signing(String),
    /// TLS negotiation with the service failed. Never retried.
    #[error("tls error: {0}")]
    Tls(TransportError),
    /// Network-level failure after the retry budget was spent.
    #[error("transport error: {0}")]
    Transport(TransportError),
    /// The service kept reporting overload or rate limiting.
    #[error("service unavailable after {attempts} attempt(s): {error}")]
    RetriesExhausted { attempts: u32, error: ServiceError },
    /// Non-retryable error reported by the service.
    #[error("service error: {0}")]
    Service(ServiceError),
    /// Body could not be decoded as JSON.
    #[error("malformed response (status {status}): {body}")]
    MalformedResponse { status: u16, body: String },
    /// Request payload could not be encoded.
    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("call cancelled")]
    Cancelled,
    #[error("call deadline exceeded")]
    DeadlineExceeded,
}

impl FabricError {
    /// HTTP status attached to the failure, if a response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RetriesExhausted { error, .. } | Self::Service(error) => Some(error.status),
            Self::MalformedResponse { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Service error envelope attached to the failure, if any.
    pub fn service_error(&self) -> Option<&ServiceError> {
        match self {
            Self::RetriesExhausted { error, .. } | Self::Service(error) => Some(error),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Tls,
    Other,
}

/// Failure raised by a [`crate::Transport`] before a response was read.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Whether the failure happened while negotiating TLS.
    ///
    /// Timeouts and plain connect failures are never TLS failures, whatever
    /// their message says.
    pub fn is_tls(&self) -> bool {
        match self.kind {
            TransportErrorKind::Tls => true,
            TransportErrorKind::Other => mentions_tls(&self.message),
            TransportErrorKind::Timeout | TransportErrorKind::Connect => false,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        // The top-level message carries the request URL, so only the sources
        // are inspected for TLS markers.
        let err = err.without_url();
        let kind = if sources_mention_tls(&err) {
            TransportErrorKind::Tls
        } else if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else {
            TransportErrorKind::Other
        };
        Self {
            kind,
            message: error_chain_message(&err),
        }
    }
}

// reqwest hides the interesting part (rustls alerts, certificate errors) in sources.
fn error_chain_message(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

fn sources_mention_tls(err: &(dyn StdError + 'static)) -> bool {
    let mut source = err.source();
    while let Some(inner) = source {
        if mentions_tls(&inner.to_string()) {
            return true;
        }
        source = inner.source();
    }
    false
}

fn mentions_tls(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    ["tls", "ssl", "certificate", "handshake", "x509"]
        .iter()
        .any(|marker| lower.contains(marker))
}

/// Two-part failure description for callers that know nothing about HTTP.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    /// What failed, against which path, with which status.
    pub summary: String,
    /// Service message, causes and follow-up advice.
    pub detail: String,
}

const REPORT_HINT: &str = "If this looks unexpected, please report the issue to the fabric \
                           service operators and include the details above.";

impl Diagnostic {
    pub fn new(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            detail: detail.into(),
        }
    }

    /// Describes `err` raised while calling `method path`.
    pub fn from_error(method: &Method, path: &str, err: &FabricError) -> Self {
        let operation = format!("{method} {path}");
        match err {
            FabricError::Configuration(message) => Self::new(
                format!("{operation} failed: invalid client configuration"),
                message.clone(),
            ),
            FabricError::MissingCredentials => Self::new(
                format!("{operation} failed: no credentials"),
                "Configure an API token or a private key for the fabric client.",
            ),
            FabricError::SigningUnavailable(message) | FabricError::Signing(message) => Self::new(
                format!("{operation} failed: request could not be signed"),
                format!("{message}. Configure an API token instead, or install a request signer."),
            ),
            FabricError::Tls(inner) => Self::new(
                format!("{operation} failed: TLS negotiation error"),
                format!(
                    "The secure connection to the fabric service could not be \
                     established: {inner}. Check the service certificate, or enable \
                     insecure TLS for test environments only."
                ),
            ),
            FabricError::Transport(inner) => Self::new(
                format!("{operation} failed: service unreachable"),
                format!("Could not reach the fabric service: {inner}."),
            ),
            FabricError::RetriesExhausted { attempts, error } => Self::new(
                format!(
                    "{operation} failed with status {} after {attempts} attempt(s)",
                    error.status
                ),
                service_detail(error, true),
            ),
            FabricError::Service(error) => Self::new(
                format!("{operation} failed with status {}", error.status),
                service_detail(error, looks_unexpected(error)),
            ),
            FabricError::MalformedResponse { status, body } => Self::new(
                format!("{operation} failed with status {status}: malformed response"),
                format!(
                    "The service returned a body that is not valid JSON: {body}\n{REPORT_HINT}"
                ),
            ),
            FabricError::Serialization(inner) => Self::new(
                format!("{operation} failed: payload could not be encoded"),
                inner.to_string(),
            ),
            FabricError::Cancelled => Self::new(
                format!("{operation} cancelled"),
                "The call was cancelled before it completed.",
            ),
            FabricError::DeadlineExceeded => Self::new(
                format!("{operation} timed out"),
                "The call did not complete before its deadline.",
            ),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n{}", self.summary, self.detail)
    }
}

fn looks_unexpected(error: &ServiceError) -> bool {
    error.critical || error.status >= 500 || !error.has_code()
}

fn service_detail(error: &ServiceError, suggest_report: bool) -> String {
    let mut lines = Vec::new();

    if error.message.is_empty() {
        lines.push(format!("Error code: {}", error.code));
    } else {
        lines.push(format!("{} ({})", error.message, error.code));
    }
    if let Some(field) = &error.field {
        match &error.value {
            Some(value) => lines.push(format!("Field: {field} = {value}")),
            None => lines.push(format!("Field: {field}")),
        }
    }
    if !error.causes.is_empty() {
        lines.push(format!("Causes: {}", error.causes.join("; ")));
    }
    if let Some(notes) = &error.notes {
        lines.push(format!("Notes: {notes}"));
    }
    if let Some(tracking_id) = &error.tracking_id {
        lines.push(format!("Tracking ID: {tracking_id}"));
    }
    if suggest_report {
        lines.push(REPORT_HINT.to_owned());
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use reqwest::Method;

    use super::{Diagnostic, FabricError, TransportError, TransportErrorKind};
    use crate::{ServiceError, NO_ERROR_CODE};

    fn service_error(code: &str, status: u16) -> ServiceError {
        ServiceError {
            code: code.to_owned(),
            message: "vlan already in use".to_owned(),
            field: Some("vlan".to_owned()),
            value: Some("100".to_owned()),
            causes: vec!["conflict with fabric-a".to_owned()],
            critical: false,
            notes: None,
            status,
            tracking_id: Some("trk-9".to_owned()),
        }
    }

    #[test]
    fn service_diagnostic_names_operation_path_and_status() {
        let err = FabricError::Service(service_error("ERR_CODE_CONFLICT", 409));
        let diag = Diagnostic::from_error(&Method::POST, "/api/v1/fabrics", &err);

        assert_eq!(diag.summary, "POST /api/v1/fabrics failed with status 409");
        assert!(diag.detail.contains("vlan already in use"));
        assert!(diag.detail.contains("conflict with fabric-a"));
        assert!(diag.detail.contains("trk-9"));
        assert!(!diag.detail.contains("report the issue"));
    }

    #[test]
    fn unexpected_service_errors_suggest_reporting() {
        let err = FabricError::Service(service_error(NO_ERROR_CODE, 500));
        let diag = Diagnostic::from_error(&Method::GET, "/x", &err);
        assert!(diag.detail.contains("report the issue"));
    }

    #[test]
    fn tls_is_detected_from_message() {
        let err = TransportError::new(
            TransportErrorKind::Other,
            "error sending request: invalid peer certificate: UnknownIssuer",
        );
        assert!(err.is_tls());

        let err = TransportError::new(TransportErrorKind::Connect, "connection refused");
        assert!(!err.is_tls());
    }

    #[test]
    fn connect_failures_are_not_tls_even_with_tls_words_in_the_message() {
        let err = TransportError::new(
            TransportErrorKind::Connect,
            "error sending request for url (http://h/api/v1/fabrics/f1/certificates)",
        );
        assert!(!err.is_tls());
    }

    #[tokio::test]
    async fn refused_connection_to_certificate_path_is_a_connect_error() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .and_then(|listener| listener.local_addr())
            .expect("must reserve a port")
            .port();
        let url = format!("http://127.0.0.1:{port}/api/v1/fabrics/f1/certificates");

        let err = reqwest::Client::new()
            .get(url)
            .send()
            .await
            .expect_err("nothing listens on the port");
        let err = TransportError::from(err);

        assert_eq!(err.kind, TransportErrorKind::Connect);
        assert!(!err.is_tls());
        assert!(!err.message.contains("certificates"));
    }

    #[test]
    fn status_is_exposed_for_response_errors() {
        let err = FabricError::MalformedResponse {
            status: 200,
            body: "<html>".to_owned(),
        };
        assert_eq!(err.status(), Some(200));
        assert_eq!(FabricError::Cancelled.status(), None);
    }
}
