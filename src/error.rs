//! Unified HTTP error type for axum request handlers.
//!
//! [`AppError`] carries a [`DispatchErrorKind`] so handlers can return
//! `Result<T, AppError>` and propagate with `?`, while the HTTP surface still
//! renders the right status code and `error.type` for each of the named error
//! kinds.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// The named error kinds from the dispatch/fallback design.
///
/// `ClientError` and `ConfigError` are fatal — the fallback executor must not
/// retry on either. Every other kind is recoverable and triggers the next
/// candidate in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchErrorKind {
    PaymentFailed,
    ProviderError,
    TransportError,
    ClientError,
    ConfigError,
    InsufficientFunds,
}

impl DispatchErrorKind {
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::ClientError | Self::ConfigError)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PaymentFailed => "payment_failed",
            Self::ProviderError => "provider_error",
            Self::TransportError => "transport_error",
            Self::ClientError => "client_error",
            Self::ConfigError => "config_error",
            Self::InsufficientFunds => "insufficient_funds",
        }
    }

    fn status(self) -> StatusCode {
        match self {
            Self::PaymentFailed => StatusCode::PAYMENT_REQUIRED,
            Self::ProviderError => StatusCode::BAD_GATEWAY,
            Self::TransportError => StatusCode::BAD_GATEWAY,
            Self::ClientError => StatusCode::BAD_REQUEST,
            Self::ConfigError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InsufficientFunds => StatusCode::BAD_GATEWAY,
        }
    }
}

/// A dispatch-level failure: a kind plus the upstream message that explains it.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct DispatchError {
    pub kind: DispatchErrorKind,
    pub message: String,
    pub status: Option<StatusCode>,
}

impl DispatchError {
    pub fn new(kind: DispatchErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), status: None }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }
}

/// Wraps either a [`DispatchError`] or a generic [`anyhow::Error`] so it can
/// be returned from axum handlers via `?`.
#[derive(Debug)]
pub struct AppError(Inner);

#[derive(Debug)]
enum Inner {
    Dispatch(DispatchError),
    Other(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self.0 {
            Inner::Dispatch(e) => {
                tracing::warn!(kind = e.kind.as_str(), message = %e.message, "dispatch error");
                let status = e.status.unwrap_or_else(|| e.kind.status());
                // Every kind renders as itself so a caller can tell "malformed
                // request, don't retry" (client_error) apart from "upstream billing
                // trouble" (provider_error) from `error.type` alone. `insufficient_funds`
                // is the one documented exception: the balance monitor's exhausted-chain
                // signal is reported to the client as a provider_error, per spec.
                let reported_type = if e.kind == DispatchErrorKind::InsufficientFunds {
                    "provider_error"
                } else {
                    e.kind.as_str()
                };
                (
                    status,
                    Json(json!({ "error": { "message": e.message, "type": reported_type } })),
                )
                    .into_response()
            }
            Inner::Other(e) => {
                tracing::warn!(error = %e, "handler error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": { "message": e.to_string(), "type": "config_error" } })),
                )
                    .into_response()
            }
        }
    }
}

impl From<DispatchError> for AppError {
    fn from(e: DispatchError) -> Self {
        Self(Inner::Dispatch(e))
    }
}

// Deliberately `From<anyhow::Error>` rather than a blanket `From<E: Into<anyhow::Error>>`:
// `DispatchError` itself satisfies that bound via `std::error::Error`, which would make the
// two impls overlap. Call sites that hit a non-anyhow error (`reqwest::Error`, `serde_json::Error`,
// ...) go through `.context(..)?`/`anyhow::Error::from` first, same as anywhere else in the crate.
impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        Self(Inner::Other(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_error_and_config_error_are_fatal() {
        assert!(DispatchErrorKind::ClientError.is_fatal());
        assert!(DispatchErrorKind::ConfigError.is_fatal());
        assert!(!DispatchErrorKind::ProviderError.is_fatal());
        assert!(!DispatchErrorKind::PaymentFailed.is_fatal());
        assert!(!DispatchErrorKind::TransportError.is_fatal());
        assert!(!DispatchErrorKind::InsufficientFunds.is_fatal());
    }
}
