//! Request execution state machine.
//!
//! ```text
//! Building → Authenticating → Sending → Classifying → Done
//!                                ↑           │
//!                                └─ Retrying ┘
//! ```
//!
//! Every transition except the two awaits (send, backoff sleep) is a pure
//! function of the current state, so each one is unit-tested on its own.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde_json::Value;
use url::Url;

use crate::{
    auth::AuthInjector,
    backoff::{BackoffDecision, BackoffPolicy},
    classify::{classify, Classification},
    client::ClientInner,
    CallContext, FabricError, FabricRequest, Payload, Result, Transport, TransportError,
    TransportRequest, TransportResponse,
};

/// Request with its body buffered so every attempt sends identical bytes.
#[derive(Clone, Debug)]
pub(crate) struct PreparedRequest {
    pub method: Method,
    pub path: String,
    pub url: String,
    /// Path and query of `url` as they appear on the request line.
    pub signing_path: String,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    pub authenticated: bool,
}

impl PreparedRequest {
    fn to_transport(&self, timeout: Duration) -> TransportRequest {
        TransportRequest {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            timeout,
        }
    }
}

#[derive(Debug)]
pub(crate) enum State {
    Building(FabricRequest),
    Authenticating(PreparedRequest),
    Sending {
        request: PreparedRequest,
        attempt: u32,
    },
    Classifying {
        request: PreparedRequest,
        attempt: u32,
        response: TransportResponse,
    },
    Retrying {
        request: PreparedRequest,
        attempt: u32,
        delay: Duration,
    },
    Done(Result<Option<Value>>),
}

pub(crate) struct RequestExecutor<'a> {
    client: &'a ClientInner,
    backoff: BackoffPolicy,
}

impl<'a> RequestExecutor<'a> {
    pub(crate) fn new(client: &'a ClientInner) -> Self {
        Self {
            client,
            backoff: BackoffPolicy::from(&client.config.retry),
        }
    }

    pub(crate) async fn execute(
        &self,
        request: FabricRequest,
        ctx: &CallContext,
    ) -> Result<Option<Value>> {
        let mut state = State::Building(request);
        loop {
            state = match state {
                State::Building(request) => self.build(request),
                State::Authenticating(request) => self.authenticate(request),
                State::Sending { request, attempt } => {
                    self.log_send(&request, attempt);
                    let transport_request = request.to_transport(self.client.config.timeout);
                    let outcome = ctx
                        .guard(self.client.transport.send(transport_request))
                        .await?;
                    self.after_send(request, attempt, outcome)
                }
                State::Classifying {
                    request,
                    attempt,
                    response,
                } => self.classify(request, attempt, response),
                State::Retrying {
                    request,
                    attempt,
                    delay,
                } => {
                    ctx.guard(tokio::time::sleep(delay)).await?;
                    State::Sending {
                        request,
                        attempt: attempt + 1,
                    }
                }
                State::Done(result) => return result,
            };
        }
    }

    pub(crate) fn build(&self, request: FabricRequest) -> State {
        let FabricRequest {
            method,
            path,
            payload,
            authenticated,
        } = request;

        let body = if method == Method::GET || method == Method::DELETE {
            None
        } else {
            match payload {
                Some(Payload::Json(value)) => match serde_json::to_vec(&value) {
                    Ok(bytes) => Some(bytes),
                    Err(err) => return State::Done(Err(FabricError::Serialization(err))),
                },
                Some(Payload::Raw(bytes)) => Some(bytes),
                None => None,
            }
        };

        let mut headers = HeaderMap::new();
        if body.is_some() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        let url = self.client.url_for(&path);
        let signing_path = match Url::parse(&url) {
            Ok(parsed) => request_target(&parsed),
            Err(err) => {
                return State::Done(Err(FabricError::Configuration(format!(
                    "invalid request URL '{url}': {err}"
                ))))
            }
        };

        State::Authenticating(PreparedRequest {
            url,
            signing_path,
            method,
            path,
            headers,
            body,
            authenticated,
        })
    }

    pub(crate) fn authenticate(&self, mut request: PreparedRequest) -> State {
        if request.authenticated {
            let injector = AuthInjector::new(&self.client.config, self.client.signer.as_deref());
            if let Err(err) = injector.authorize(
                &request.method,
                &request.signing_path,
                request.body.as_deref(),
                &mut request.headers,
            ) {
                return State::Done(Err(err));
            }
        }
        State::Sending {
            request,
            attempt: 0,
        }
    }

    pub(crate) fn after_send(
        &self,
        request: PreparedRequest,
        attempt: u32,
        outcome: std::result::Result<TransportResponse, TransportError>,
    ) -> State {
        match outcome {
            Ok(response) => State::Classifying {
                request,
                attempt,
                response,
            },
            Err(err) if err.is_tls() => {
                #[cfg(feature = "tracing")]
                tracing::error!(
                    method = %request.method,
                    path = %request.path,
                    error = %err,
                    "tls negotiation failed"
                );
                State::Done(Err(FabricError::Tls(err)))
            }
            Err(err) => self.retry_or_fail(request, attempt, FabricError::Transport(err)),
        }
    }

    pub(crate) fn classify(
        &self,
        request: PreparedRequest,
        attempt: u32,
        response: TransportResponse,
    ) -> State {
        self.log_response(&request, &response);

        match classify(&request.method, response.status, &response.body) {
            Classification::Success(document) => State::Done(Ok(document)),
            Classification::NotFoundOnIdempotentRead => State::Done(Ok(None)),
            Classification::RetryableService(error) => self.retry_or_fail(
                request,
                attempt,
                FabricError::RetriesExhausted {
                    attempts: attempt + 1,
                    error,
                },
            ),
            Classification::TerminalService(error) => State::Done(Err(FabricError::Service(error))),
            Classification::MalformedResponse { status, body } => {
                State::Done(Err(FabricError::MalformedResponse { status, body }))
            }
        }
    }

    /// Schedules another attempt, or settles on `failure` once the budget is spent.
    fn retry_or_fail(&self, request: PreparedRequest, attempt: u32, failure: FabricError) -> State {
        match self.backoff.next(attempt) {
            BackoffDecision::Sleep(delay) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    method = %request.method,
                    path = %request.path,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %failure,
                    "retrying request"
                );
                State::Retrying {
                    request,
                    attempt,
                    delay,
                }
            }
            BackoffDecision::Stop => {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    method = %request.method,
                    path = %request.path,
                    attempt,
                    "retry budget exhausted"
                );
                State::Done(Err(failure))
            }
        }
    }

    fn log_send(&self, request: &PreparedRequest, attempt: u32) {
        #[cfg(feature = "tracing")]
        {
            tracing::debug!(
                method = %request.method,
                url = %request.url,
                attempt,
                "sending request"
            );
            if !self.client.config.suppress_payload_logging {
                if let Some(body) = &request.body {
                    tracing::trace!(payload = %String::from_utf8_lossy(body), "request payload");
                }
            }
        }
        #[cfg(not(feature = "tracing"))]
        let _ = (request, attempt);
    }

    fn log_response(&self, request: &PreparedRequest, response: &TransportResponse) {
        #[cfg(feature = "tracing")]
        {
            tracing::debug!(
                method = %request.method,
                path = %request.path,
                status = response.status,
                "received response"
            );
            if !self.client.config.suppress_payload_logging && !response.body.is_empty() {
                tracing::trace!(
                    payload = %String::from_utf8_lossy(&response.body),
                    "response payload"
                );
            }
        }
        #[cfg(not(feature = "tracing"))]
        let _ = (request, response);
    }
}

fn request_target(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_owned(),
    }
}
