//! The single client-facing surface — everything an agent talks to.
//!
//! Intentionally thin: handlers translate HTTP concerns (headers, status
//! codes, JSON/SSE bodies) into calls against [`crate::router`],
//! [`crate::dedup`] and [`crate::fallback`], and back. Routing and dispatch
//! logic itself lives in those modules, not here.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::dedup;
use crate::error::{AppError, DispatchError, DispatchErrorKind};
use crate::fallback::{self, SessionContext};
use crate::payments::PaymentBackend;
use crate::router::{self, RouterState};

/// Headers that describe the client->router hop, not the call clawrouter
/// should make on the client's behalf — never forwarded upstream.
const HOP_BY_HOP: &[&str] = &["host", "content-length", "connection", "transfer-encoding", "x-session-id"];

pub fn router(state: Arc<RouterState>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .fallback(not_found)
        .with_state(state)
}

/// `POST /v1/chat/completions` — the whole point of clawrouter.
///
/// `stream: true` bypasses dedup entirely and forwards as an SSE pass-through
/// against the primary candidate only (no mid-stream failover, per the
/// design's streaming Non-goal). Everything else goes through the dedup
/// cache and the full fallback chain.
async fn chat_completions(
    State(state): State<Arc<RouterState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, AppError> {
    let session_id = headers.get("x-session-id").and_then(|v| v.to_str().ok()).map(str::to_string);
    let is_stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);

    let decision = router::route(&state, &body, session_id.as_deref()).await;

    if is_stream {
        return stream_chat_completions(&state, &decision, &body).await;
    }

    let fingerprint = dedup::fingerprint(&decision.primary_model, &body);
    let client_headers = forwardable_headers(&headers);
    let pre_auth_micro_usd = cost_estimate_to_micro_usd(decision.cost_estimate);

    let dispatcher = state.dispatcher.clone();
    let pins = state.pins.clone();
    let candidates = decision.candidate_chain.clone();
    let reasoning = decision.reasoning.clone();
    let deadline = state.request_deadline;
    let body_owned = body.clone();
    let session_owned = session_id.clone().map(|sid| (sid, decision.tier_profile.clone()));

    let outcome = state
        .dedup
        .get_or_dispatch(&fingerprint, move || {
            Box::pin(async move {
                // Threaded through every payment call and per-attempt timeout race below.
                // Not wired to the client socket's own disconnect here — that needs a
                // connection-level hook axum's router layer doesn't give handlers directly —
                // so in practice this fires only via the internal per-attempt timeout.
                let cancel = CancellationToken::new();
                let session = session_owned
                    .as_ref()
                    .map(|(session_id, tier_profile)| SessionContext { session_id, tier_profile });
                fallback::execute(
                    &dispatcher,
                    &candidates,
                    &body_owned,
                    pre_auth_micro_usd,
                    "chat_completion",
                    &reasoning,
                    &client_headers,
                    session,
                    &pins,
                    deadline,
                    cancel,
                )
                .await
                .map(|outcome| outcome.response)
            })
        })
        .await;

    match outcome {
        Ok(value) => Ok((StatusCode::OK, Json(value)).into_response()),
        Err(e) => Err(e.into()),
    }
}

/// Wallet-mode-only SSE pass-through. claw.credit's custodial envelope
/// executes the forwarded call itself and returns a single JSON response, so
/// it has no streaming counterpart to proxy.
async fn stream_chat_completions(state: &RouterState, decision: &router::RoutingDecision, body: &Value) -> Result<Response, AppError> {
    let wallet = match state.payment_backend.as_ref() {
        PaymentBackend::Wallet(wallet) => wallet,
        PaymentBackend::ClawCredit(_) => {
            return Err(DispatchError::new(
                DispatchErrorKind::ClientError,
                "streaming is not supported in clawcredit payment mode",
            )
            .into());
        }
    };

    let mut rewritten = body.clone();
    rewritten["model"] = json!(decision.primary_model);
    let url = format!("{}/v1/chat/completions", state.blockrun_base_url);
    let pre_auth_micro_usd = cost_estimate_to_micro_usd(decision.cost_estimate);

    state.stats.record_attempt(&decision.primary_model, false);
    let byte_stream = wallet
        .invoke_stream(&url, &rewritten, pre_auth_micro_usd)
        .await
        .map_err(|e| DispatchError::new(DispatchErrorKind::TransportError, e.to_string()))?;
    state.stats.record_success(&decision.primary_model);

    let response = Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/event-stream")
        .header("cache-control", "no-cache")
        .body(Body::from_stream(byte_stream))
        .expect("static header values are always valid");
    Ok(response)
}

/// `GET /v1/models` — catalog entries plus the routing aliases.
async fn list_models(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let mut data: Vec<Value> = state
        .catalog
        .all()
        .iter()
        .map(|m| {
            json!({
                "id": m.id,
                "object": "model",
                "owned_by": "blockrun",
                "clawrouter": {
                    "tier": m.tier,
                    "price_per_million_usd": m.price_per_million_usd,
                    "capabilities": m.capabilities,
                    "requires_payment": m.requires_payment,
                }
            })
        })
        .collect();

    for alias in state.catalog.aliases() {
        data.push(json!({
            "id": alias,
            "object": "model",
            "owned_by": "clawrouter",
            "clawrouter": { "alias": true },
        }));
    }

    Json(json!({ "object": "list", "data": data }))
}

#[derive(Debug, Deserialize, Default)]
struct HealthQuery {
    #[serde(default)]
    full: bool,
}

/// `GET /health` — liveness plus, with `?full=true`, the payment backend's
/// current balance snapshot (wallet mode only; always "ok" in clawcredit
/// mode since there's no local balance to sample).
async fn health(State(state): State<Arc<RouterState>>, Query(query): Query<HealthQuery>) -> impl IntoResponse {
    let wallet_address = match state.payment_backend.as_ref() {
        PaymentBackend::Wallet(wallet) => Some(wallet.public_address().to_string()),
        PaymentBackend::ClawCredit(_) => None,
    };

    let mut body = json!({ "status": "ok", "wallet": wallet_address });

    if query.full {
        match &state.balance {
            Some(monitor) => match monitor.latest() {
                Some(snapshot) => {
                    body["balance"] = json!({
                        "balance_usd": snapshot.balance_usd,
                        "is_low": snapshot.is_low,
                        "is_empty": snapshot.is_empty,
                        "sampled_at": snapshot.sampled_at,
                    });
                }
                None => body["balance"] = json!({ "balanceError": "no balance sample yet" }),
            },
            None => body["balance"] = json!({ "balanceError": "not applicable in clawcredit mode" }),
        }
    }

    Json(body)
}

/// `GET /stats` — per-model attempt/success/fallback/wrapped-failure counters.
async fn stats(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    Json(state.stats.snapshot())
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" })))
}

/// Strip hop-by-hop headers and collect the rest as owned pairs — the only
/// shape the claw.credit envelope (and, in principle, any future forwarding
/// backend) can carry across an `await` boundary.
fn forwardable_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let name = name.as_str().to_lowercase();
            if HOP_BY_HOP.contains(&name.as_str()) {
                return None;
            }
            value.to_str().ok().map(|v| (name, v.to_string()))
        })
        .collect()
}

fn cost_estimate_to_micro_usd(cost_estimate_usd: f64) -> u64 {
    (cost_estimate_usd * 1_000_000.0).round().clamp(0.0, u64::MAX as f64) as u64
}
