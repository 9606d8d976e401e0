//! Fallback executor — walks a candidate chain strictly sequentially.
//!
//! Never fans out in parallel (that would risk paying for two models at
//! once); aborts on the first success; returns immediately on a fatal
//! [`DispatchErrorKind::ClientError`]; otherwise tries the next candidate
//! until the chain is exhausted.

use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::dispatch::Dispatcher;
use crate::error::{DispatchError, DispatchErrorKind};
use crate::session_pin::SessionPinStore;

const MIN_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct FallbackOutcome {
    pub response: Value,
    pub model_used: String,
    pub attempted: Vec<String>,
}

/// Scoping info for session pinning — absent when the caller sent no
/// `x-session-id` header.
pub struct SessionContext<'a> {
    pub session_id: &'a str,
    pub tier_profile: &'a str,
}

#[allow(clippy::too_many_arguments)]
pub async fn execute(
    dispatcher: &Dispatcher,
    candidates: &[String],
    body: &Value,
    pre_auth_micro_usd: u64,
    current_task: &str,
    reasoning_process: &str,
    client_headers: &[(String, String)],
    session: Option<SessionContext<'_>>,
    pins: &SessionPinStore,
    total_deadline: Duration,
    cancel: CancellationToken,
) -> Result<FallbackOutcome, DispatchError> {
    let mut attempted = Vec::new();
    let mut last_recoverable: Option<DispatchError> = None;
    let start = tokio::time::Instant::now();

    for (i, candidate) in candidates.iter().enumerate() {
        let elapsed = start.elapsed();
        if elapsed >= total_deadline {
            warn!(candidates_tried = attempted.len(), "fallback deadline exhausted");
            break;
        }
        let remaining_candidates = candidates.len() - i;
        let remaining_time = total_deadline.saturating_sub(elapsed);
        let per_attempt_budget = (remaining_time / remaining_candidates as u32).max(MIN_ATTEMPT_TIMEOUT);

        attempted.push(candidate.clone());
        let is_fallback = i > 0;

        let attempt = dispatcher.dispatch_one(
            candidate,
            body,
            pre_auth_micro_usd,
            current_task,
            reasoning_process,
            client_headers,
            cancel.clone(),
            is_fallback,
        );

        let result = tokio::select! {
            result = tokio::time::timeout(per_attempt_budget, attempt) => match result {
                Ok(inner) => inner,
                Err(_) => Err(DispatchError::new(DispatchErrorKind::TransportError, format!("{candidate} timed out after {per_attempt_budget:?}"))),
            },
            _ = cancel.cancelled() => {
                return Err(DispatchError::new(DispatchErrorKind::TransportError, "request cancelled"));
            }
        };

        match result {
            Ok(response) => {
                if let Some(ctx) = &session {
                    pins.set(ctx.session_id, ctx.tier_profile, candidate).await;
                }
                if is_fallback {
                    info!(candidate, attempts = attempted.len(), "fallback succeeded");
                }
                return Ok(FallbackOutcome { response, model_used: candidate.clone(), attempted });
            }
            Err(e) if e.kind.is_fatal() => {
                return Err(e);
            }
            Err(e) => {
                last_recoverable = Some(e);
            }
        }
    }

    Err(last_recoverable.unwrap_or_else(|| {
        DispatchError::new(DispatchErrorKind::ProviderError, "no candidates available")
    }))
}
