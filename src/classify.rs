use reqwest::Method;
use serde_json::Value;

use crate::{wire::ErrorEnvelope, ServiceError};

/// How a received response should be treated.
#[derive(Clone, Debug, PartialEq)]
pub enum Classification {
    /// 2xx; `None` for an empty 204.
    Success(Option<Value>),
    /// 404 on GET or DELETE, an empty result rather than an error.
    NotFoundOnIdempotentRead,
    /// Overload or rate limit reported by the service.
    RetryableService(ServiceError),
    TerminalService(ServiceError),
    /// Body was not JSON where JSON was expected.
    MalformedResponse { status: u16, body: String },
}

/// GET and DELETE treat "not found" as an empty result.
pub fn is_idempotent_read(method: &Method) -> bool {
    *method == Method::GET || *method == Method::DELETE
}

pub fn classify(method: &Method, status: u16, body: &[u8]) -> Classification {
    if status == 204 {
        return Classification::Success(None);
    }

    if (200..300).contains(&status) {
        return match serde_json::from_slice::<Value>(body) {
            Ok(document) => Classification::Success(Some(document)),
            Err(_) => malformed(status, body),
        };
    }

    if status == 404 && is_idempotent_read(method) {
        return Classification::NotFoundOnIdempotentRead;
    }

    match serde_json::from_slice::<ErrorEnvelope>(body) {
        Ok(envelope) => {
            let error = ServiceError::from_envelope(envelope, status);
            if error.is_retryable() {
                Classification::RetryableService(error)
            } else {
                Classification::TerminalService(error)
            }
        }
        Err(_) => malformed(status, body),
    }
}

fn malformed(status: u16, body: &[u8]) -> Classification {
    Classification::MalformedResponse {
        status,
        body: String::from_utf8_lossy(body).into_owned(),
    }
}
