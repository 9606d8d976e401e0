//! Payment backend — enum dispatch over the two concrete strategies a
//! request can attach payment credentials with.
//!
//! Mirrors the router's [`crate::catalog`]-adjacent `BackendClient` pattern
//! from the pre-transformation codebase: one shared surface, a handful of
//! concrete adapters selected once at startup from config, no dynamic
//! plugin loading and no `dyn Trait`/`async-trait` machinery for a set that
//! never grows past two members.

pub mod clawcredit;
pub mod wallet;

use reqwest::StatusCode;
use serde_json::Value;

pub use clawcredit::ClawCreditBackend;
pub use wallet::WalletBackend;

/// Everything one dispatch attempt needs to hand to the payment backend.
pub struct PaymentRequest<'a> {
    /// Full upstream URL, e.g. `https://api.blockrun.ai/v1/chat/completions`.
    pub url: &'a str,
    /// Request body with `model` already rewritten to the candidate being tried.
    pub body: &'a Value,
    /// Estimated pre-authorization amount, in micro-USD.
    pub pre_auth_micro_usd: u64,
    /// Diagnostic summary of what's being requested — forwarded into
    /// claw.credit's audit_context in custodial mode; ignored by wallet mode.
    pub current_task: &'a str,
    /// Diagnostic classification/routing summary — same audit-only role.
    pub reasoning_process: &'a str,
    /// Original client request headers, forwarded verbatim into the
    /// claw.credit envelope's `request_body.http.headers` after stripping
    /// hop-by-hop headers that describe the client->router leg, not the
    /// router->upstream call. Ignored by the wallet backend.
    pub client_headers: &'a [(String, String)],
}

/// A raw upstream HTTP response, not yet classified into a [`crate::error::DispatchErrorKind`].
///
/// `raw_text` is kept alongside the parsed `body` because wrapped payment
/// failure detection (§ design notes) must scan the *text*, not assume it
/// parses into any particular shape.
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub body: Value,
    pub raw_text: String,
}

pub enum PaymentBackend {
    Wallet(WalletBackend),
    ClawCredit(ClawCreditBackend),
}

impl PaymentBackend {
    pub async fn invoke(
        &self,
        req: PaymentRequest<'_>,
        cancel: tokio_util::sync::CancellationToken,
    ) -> anyhow::Result<UpstreamResponse> {
        match self {
            Self::Wallet(backend) => backend.invoke(req, cancel).await,
            Self::ClawCredit(backend) => backend.invoke(req, cancel).await,
        }
    }
}

/// A response body contains a wrapped x402 payment failure if the literal
/// marker appears anywhere in the raw text — regardless of HTTP status. A
/// direct `402` is also always treated as a payment failure by the caller;
/// this helper only covers the "wrapped inside a provider-error envelope"
/// case.
pub fn is_wrapped_payment_failure(raw_text: &str) -> bool {
    raw_text.contains("x402_payment_failed")
}
