//! Serializable API error types shared by every caseloot HTTP surface.
//!
//! Every handler across the webhook, mini-app, and admin routers returns
//! `Result<T, ApiError>`. `ApiError` is the only error type that ever crosses
//! the wire; domain-specific errors (antifraud denial, idempotent replay,
//! storage failures, ...) are converted into one near their boundary rather
//! than propagated as exceptions for control flow.

use std::fmt;

use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The taxonomy from the error-handling design: each variant maps to a fixed
/// HTTP status and determines whether the caller should retry.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
pub enum ApiErrorKind {
    /// Malformed JSON, wrong content type, oversized body, invalid initData,
    /// invalid admin token, etc. Never retried by the server.
    #[error("bad client input")]
    ClientInput,
    /// A HARD_BLOCK antifraud decision returned before funds were captured.
    #[error("rate limited")]
    AntifraudDeny,
    /// The request is a recognized idempotent replay; not actually an error,
    /// but modeled here so call sites can short-circuit through `?`.
    #[error("idempotent replay")]
    IdempotentReplay,
    /// A downstream network failure or 5xx from the chat platform.
    #[error("transient remote failure")]
    TransientRemote,
    /// A 4xx from the chat platform; will not be retried.
    #[error("permanent remote failure")]
    PermanentRemote,
    /// Bugs, assertion failures, or anything else unexpected.
    #[error("internal error")]
    Internal,
}

impl ApiErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            Self::ClientInput => StatusCode::BAD_REQUEST,
            Self::AntifraudDeny => StatusCode::TOO_MANY_REQUESTS,
            Self::IdempotentReplay => StatusCode::OK,
            Self::TransientRemote => StatusCode::BAD_GATEWAY,
            Self::PermanentRemote => StatusCode::BAD_GATEWAY,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A tagged API error. Carries a human-readable `msg` for logs, but the
/// `msg` is only included in the wire response for [`ApiErrorKind::ClientInput`]
/// and [`ApiErrorKind::AntifraudDeny`] -- internal and remote failure messages
/// might include details we don't want to leak (charge ids, backend errors).
#[derive(Debug, Error)]
#[error("{kind}: {msg}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub msg: String,
    /// A short machine-readable error tag, e.g. `"forbidden"`,
    /// `"rate_limited"`, `"invalid update json"`. Always echoed to the wire.
    pub error: &'static str,
    /// The antifraud discriminator (`"velocity"` or `"rate_limit"`, per §6/§7
    /// "`{error:\"rate_limited\", type:\"velocity\"|\"rate_limit\"}`"). `None`
    /// for every non-antifraud error kind.
    pub error_type: Option<&'static str>,
    /// The HTTP status actually sent. Defaults to `kind.status()`, but
    /// `ClientInput` covers several wire statuses per §7 ("oversized body,
    /// wrong content type, ... → 4xx"), so call sites that need a status
    /// other than the kind's default (403 forbidden, 413 payload too large,
    /// 415 unsupported media type) set it explicitly via [`Self::with_status`].
    pub status: StatusCode,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, error: &'static str, msg: impl Into<String>) -> Self {
        Self { status: kind.status(), kind, error, error_type: None, msg: msg.into() }
    }

    /// Override the HTTP status this error renders as, keeping `kind` for
    /// categorization (retryability, logging) purposes.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn client_input(error: &'static str, msg: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::ClientInput, error, msg)
    }

    /// A 403: missing/wrong secret header, banned source, invalid admin
    /// token. Distinct from the generic 400 `ClientInput` default.
    pub fn forbidden(error: &'static str, msg: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::ClientInput, error, msg).with_status(StatusCode::FORBIDDEN)
    }

    /// `tag` is the antifraud discriminator (`"velocity"` or `"rate_limit"`)
    /// carried in the wire `type` field, per §4.8/§6/§8.5:
    /// `{error:"rate_limited", type:"velocity"|"rate_limit"}`.
    pub fn antifraud_deny(tag: &'static str) -> Self {
        let mut err = Self::new(ApiErrorKind::AntifraudDeny, "rate_limited", "antifraud hard block");
        err.error_type = Some(tag);
        err
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Internal, "internal", msg)
    }

    /// Render this error into the wire [`ErrorResponse`], stamping the
    /// request id that the caller extracted for this request.
    pub fn into_response_body(self, request_id: String, timestamp_ms: i64) -> ErrorResponse {
        let message = match self.kind {
            ApiErrorKind::ClientInput | ApiErrorKind::AntifraudDeny => Some(self.msg),
            _ => None,
        };
        ErrorResponse {
            status: self.status.as_u16(),
            error: self.error.to_owned(),
            error_type: self.error_type.map(ToOwned::to_owned),
            message,
            request_id,
            timestamp_ms,
        }
    }
}

/// `ErrorResponse` is the common JSON-serialized representation for every
/// [`ApiError`]. It is the only error struct actually sent across the wire;
/// everything else (kinds, internal messages) stays server-side.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub error: String,
    /// The antifraud discriminator (§8.5: `{error:"rate_limited",
    /// type:"velocity"|"rate_limit"}`); absent for every other error.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub request_id: String,
    pub timestamp_ms: i64,
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.status, self.error, self.request_id)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn internal_errors_dont_leak_message() {
        let err = ApiError::internal("leaked db password in this string");
        let body = err.into_response_body("req-1".to_owned(), 0);
        assert!(body.message.is_none());
        assert_eq!(body.status, 500);
    }

    #[test]
    fn client_input_keeps_message() {
        let err = ApiError::client_input("invalid update json", "bad json at line 3");
        let body = err.into_response_body("req-2".to_owned(), 0);
        assert_eq!(body.message.as_deref(), Some("bad json at line 3"));
        assert_eq!(body.error, "invalid update json");
    }

    #[test]
    fn forbidden_overrides_the_default_client_input_status() {
        let err = ApiError::forbidden("forbidden", "missing or incorrect secret token");
        let body = err.into_response_body("req-3".to_owned(), 0);
        assert_eq!(body.status, 403);
        assert_eq!(body.error, "forbidden");
    }

    /// §8.5: `429 {error:"rate_limited", type:"velocity"|"rate_limit"}`.
    #[test]
    fn antifraud_deny_carries_the_tag_in_the_type_field() {
        let err = ApiError::antifraud_deny("velocity");
        let body = err.into_response_body("req-4".to_owned(), 0);
        assert_eq!(body.status, 429);
        assert_eq!(body.error, "rate_limited");
        assert_eq!(body.error_type.as_deref(), Some("velocity"));

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["type"], "velocity");
        assert_eq!(json["error"], "rate_limited");
    }
}
