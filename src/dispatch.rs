//! Upstream dispatcher — executes a single candidate-model attempt.
//!
//! Rewrites the outgoing body's `model` field, hands the call to the
//! configured [`PaymentBackend`], and classifies the raw response into one
//! of the named [`DispatchErrorKind`]s (or a success). The fallback executor
//! is the only caller; it decides what to do with a recoverable vs. fatal
//! result.

use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{DispatchError, DispatchErrorKind};
use crate::payments::{is_wrapped_payment_failure, PaymentBackend, PaymentRequest};
use crate::stats::StatsRegistry;

pub struct Dispatcher {
    payment_backend: Arc<PaymentBackend>,
    blockrun_base_url: String,
    stats: Arc<StatsRegistry>,
}

impl Dispatcher {
    pub fn new(payment_backend: Arc<PaymentBackend>, blockrun_base_url: String, stats: Arc<StatsRegistry>) -> Self {
        Self { payment_backend, blockrun_base_url, stats }
    }

    /// Try exactly one candidate model. `is_fallback` marks every attempt
    /// after the first in a request's candidate chain, purely for stats.
    #[tracing::instrument(skip(self, body, client_headers, cancel), fields(model = candidate))]
    pub async fn dispatch_one(
        &self,
        candidate: &str,
        body: &Value,
        pre_auth_micro_usd: u64,
        current_task: &str,
        reasoning_process: &str,
        client_headers: &[(String, String)],
        cancel: CancellationToken,
        is_fallback: bool,
    ) -> Result<Value, DispatchError> {
        self.stats.record_attempt(candidate, is_fallback);

        let mut rewritten = body.clone();
        rewritten["model"] = serde_json::json!(candidate);

        let url = format!("{}/v1/chat/completions", self.blockrun_base_url);
        let payment_request = PaymentRequest {
            url: &url,
            body: &rewritten,
            pre_auth_micro_usd,
            current_task,
            reasoning_process,
            client_headers,
        };

        let response = self
            .payment_backend
            .invoke(payment_request, cancel)
            .await
            .map_err(|e| DispatchError::new(DispatchErrorKind::TransportError, e.to_string()))?;

        let wrapped_failure = is_wrapped_payment_failure(&response.raw_text);
        if wrapped_failure {
            self.stats.record_wrapped_payment_failure(candidate);
        }

        if response.status == StatusCode::PAYMENT_REQUIRED || wrapped_failure {
            debug!(candidate, status = %response.status, "payment failure");
            return Err(DispatchError::new(
                DispatchErrorKind::PaymentFailed,
                extract_message(&response.body, "payment required"),
            )
            .with_status(response.status));
        }

        if response.status.is_success() {
            self.stats.record_success(candidate);
            return Ok(response.body);
        }

        if response.status.as_u16() == 400 {
            // A non-payment 400 means the request itself was malformed —
            // fatal, retrying against another model won't help.
            return Err(DispatchError::new(
                DispatchErrorKind::ClientError,
                extract_message(&response.body, "bad request"),
            )
            .with_status(response.status));
        }

        if response.status.is_client_error() {
            return Err(DispatchError::new(
                DispatchErrorKind::ClientError,
                extract_message(&response.body, "client error"),
            )
            .with_status(response.status));
        }

        Err(DispatchError::new(
            DispatchErrorKind::ProviderError,
            extract_message(&response.body, "provider error"),
        )
        .with_status(response.status))
    }
}

fn extract_message(body: &Value, fallback: &str) -> String {
    body.get("error")
        .and_then(|e| e.get("message").or(Some(e)))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| fallback.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_message_reads_nested_error_message() {
        let body = serde_json::json!({ "error": { "message": "rate limited" } });
        assert_eq!(extract_message(&body, "fallback"), "rate limited");
    }

    #[test]
    fn extract_message_falls_back_when_absent() {
        let body = serde_json::json!({});
        assert_eq!(extract_message(&body, "fallback"), "fallback");
    }
}
