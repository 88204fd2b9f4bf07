//! `fabric-client` is the transport and resilience layer of a REST client for
//! a fabric-management service.
//!
//! One logical call ([`FabricRequest`]) goes through:
//! - credential injection (bearer token, or signed request via [`RequestSigner`])
//! - sending through a [`Transport`] (`reqwest` by default)
//! - response classification into success, retryable or terminal failure
//! - jittered exponential backoff between attempts ([`BackoffPolicy`])
//!
//! Callers that do not care about HTTP use [`FabricClient::execute_rest_call`],
//! which yields either a JSON document or a two-part [`Diagnostic`].

mod auth;
mod backoff;
mod classify;
mod client;
mod commit;
mod error;
mod executor;
mod options;
mod registry;
mod transport;
mod types;
mod wire;

pub use auth::{canonical_signing_payload, Credential, RequestSigner};
pub use backoff::{next_delay, BackoffDecision, BackoffPolicy};
pub use classify::{classify, is_idempotent_read, Classification};
pub use client::{ClientBuilder, FabricClient};
pub use commit::{candidate_commit_path, CommitReport, COMMIT_COMMENT};
pub use error::{Diagnostic, FabricError, TransportError, TransportErrorKind};
pub use options::{
    ClientConfig, ProxyConfig, RetryOptions, DEFAULT_BACKOFF_FACTOR, DEFAULT_MAX_BACKOFF,
    DEFAULT_MIN_BACKOFF, DEFAULT_TIMEOUT,
};
pub use registry::ClientRegistry;
pub use reqwest::Method;
pub use transport::{ReqwestTransport, Transport, TransportRequest, TransportResponse};
pub use types::{
    CallContext, CancelHandle, FabricRequest, Payload, ServiceError, ERR_CODE_SERVICE_UNAVAILABLE,
    ERR_CODE_TOO_MANY_REQUESTS, NO_ERROR_CODE,
};

pub type Result<T> = std::result::Result<T, FabricError>;
