//! End-to-end tests against the whole `/v1/chat/completions` pipeline —
//! routing, dedup, payment attachment, and fallback — with BlockRun itself
//! stubbed out behind a `wiremock` server. No real network calls leave the
//! process.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, Respond, ResponseTemplate};

use clawrouter::balance::BalanceMonitor;
use clawrouter::catalog::Catalog;
use clawrouter::config::{ClawCreditConfig, WalletConfig};
use clawrouter::dedup::DedupCache;
use clawrouter::dispatch::Dispatcher;
use clawrouter::payments::{ClawCreditBackend, PaymentBackend, WalletBackend};
use clawrouter::router::RouterState;
use clawrouter::session_pin::SessionPinStore;
use clawrouter::stats::StatsRegistry;

fn test_wallet_config() -> WalletConfig {
    WalletConfig {
        private_key_hex: "aabbccddeeff00112233445566778899aabbccddeeff00112233445566778899".into(),
        chain_id: 8453,
        asset: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".into(),
    }
}

fn test_clawcredit_config(base_url: String) -> ClawCreditConfig {
    ClawCreditConfig {
        api_token: "test-token".into(),
        base_url,
        chain: "BASE".into(),
        asset: "0xUSDC".into(),
    }
}

fn state_with_backend(payment_backend: PaymentBackend, blockrun_base_url: String) -> (Arc<RouterState>, Arc<StatsRegistry>) {
    let payment_backend = Arc::new(payment_backend);
    let stats = Arc::new(StatsRegistry::new());
    let dispatcher = Arc::new(Dispatcher::new(payment_backend.clone(), blockrun_base_url.clone(), stats.clone()));

    let state = Arc::new(RouterState {
        catalog: Arc::new(Catalog::new()),
        pins: Arc::new(SessionPinStore::new(Duration::from_secs(600))),
        balance: None::<BalanceMonitor>,
        dedup: Arc::new(DedupCache::new(Duration::from_secs(30))),
        dispatcher,
        stats: stats.clone(),
        payment_backend,
        request_deadline: Duration::from_secs(30),
        blockrun_base_url,
    });
    (state, stats)
}

fn test_state(blockrun_base_url: String) -> (Arc<RouterState>, Arc<StatsRegistry>) {
    state_with_backend(PaymentBackend::Wallet(WalletBackend::new(test_wallet_config()).unwrap()), blockrun_base_url)
}

/// claw.credit mode talks to `{base_url}/v1/transaction/pay`, not to BlockRun
/// directly — `blockrun_base_url` only needs to resolve to a recipient URL
/// the envelope can carry, it's never itself dialed in this mode.
fn test_state_clawcredit(claw_credit_base_url: String) -> (Arc<RouterState>, Arc<StatsRegistry>) {
    state_with_backend(
        PaymentBackend::ClawCredit(ClawCreditBackend::new(test_clawcredit_config(claw_credit_base_url))),
        "https://api.blockrun.ai".into(),
    )
}

async fn send(app: axum::Router, body: Value, session_id: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method("POST").uri("/v1/chat/completions").header("content-type", "application/json");
    if let Some(sid) = session_id {
        builder = builder.header("x-session-id", sid);
    }
    let request = builder.body(Body::from(serde_json::to_vec(&body).unwrap())).unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Happy path
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn successful_request_returns_upstream_body_verbatim() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "chatcmpl-1", "choices": [] })))
        .mount(&mock_server)
        .await;

    let (state, _stats) = test_state(mock_server.uri());
    let app = clawrouter::api::client::router(state);

    let (status, body) = send(
        app,
        json!({ "model": "eco", "messages": [{ "role": "user", "content": "hello" }] }),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "chatcmpl-1");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wrapped payment failure triggers fallback despite a 200 status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn wrapped_payment_failure_falls_back_to_next_candidate() {
    let mock_server = MockServer::start().await;

    // Primary candidate for `model: "free"` is the emergency-free model; it
    // reports a 200 that's actually a wrapped x402 failure.
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("nvidia/gpt-oss-120b"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": { "message": "x402_payment_failed: balance exhausted" }
        })))
        .mount(&mock_server)
        .await;

    // The next free-tier candidate succeeds.
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("meta/llama-3.1-8b-instruct"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "meta-resp" })))
        .mount(&mock_server)
        .await;

    let (state, stats) = test_state(mock_server.uri());
    let app = clawrouter::api::client::router(state);

    let (status, body) = send(
        app,
        json!({ "model": "free", "messages": [{ "role": "user", "content": "hello" }] }),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "meta-resp");

    let snapshot = stats.snapshot();
    assert_eq!(snapshot["nvidia/gpt-oss-120b"].wrapped_payment_failures, 1);
    assert_eq!(snapshot["meta/llama-3.1-8b-instruct"].successes, 1);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session pin is scoped by tier profile, not session id alone
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn switching_tier_profile_does_not_inherit_the_other_profiles_pin() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("openai/o3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "o3-resp" })))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("deepseek/deepseek-chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "deepseek-resp" })))
        .mount(&mock_server)
        .await;

    let (state, _stats) = test_state(mock_server.uri());
    let app = clawrouter::api::client::router(state);

    let (status, first) = send(
        app.clone(),
        json!({ "model": "premium", "messages": [{ "role": "user", "content": "derive a proof" }] }),
        Some("sess-mix"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["id"], "o3-resp");

    // Same session, a different tier profile — must not reuse the premium pin.
    let (status, second) = send(
        app,
        json!({ "model": "eco", "messages": [{ "role": "user", "content": "hello again" }] }),
        Some("sess-mix"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["id"], "deepseek-resp");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Identical concurrent requests share a single upstream dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct CountingResponder {
    calls: Arc<AtomicUsize>,
}

impl Respond for CountingResponder {
    fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ResponseTemplate::new(200).set_body_json(json!({ "id": "dedup-resp" }))
    }
}

#[tokio::test]
async fn identical_concurrent_requests_are_coalesced() {
    let mock_server = MockServer::start().await;
    let calls = Arc::new(AtomicUsize::new(0));

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(CountingResponder { calls: calls.clone() })
        .mount(&mock_server)
        .await;

    let (state, _stats) = test_state(mock_server.uri());
    let app = clawrouter::api::client::router(state);

    let body = json!({ "model": "eco", "messages": [{ "role": "user", "content": "same prompt twice" }] });
    let (r1, r2) = tokio::join!(send(app.clone(), body.clone(), None), send(app, body, None));

    assert_eq!(r1.0, StatusCode::OK);
    assert_eq!(r2.0, StatusCode::OK);
    assert_eq!(r1.1["id"], "dedup-resp");
    assert_eq!(r2.1["id"], "dedup-resp");
    assert_eq!(calls.load(Ordering::SeqCst), 1, "second request should have been coalesced, not re-dispatched");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ClawCredit passthrough
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ClawCreditResponder {
    captured: Arc<Mutex<Option<(Value, Option<String>)>>>,
}

impl Respond for ClawCreditResponder {
    fn respond(&self, request: &wiremock::Request) -> ResponseTemplate {
        let envelope: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
        let authorization = request.headers.get("authorization").and_then(|v| v.to_str().ok()).map(str::to_string);
        *self.captured.lock().unwrap() = Some((envelope, authorization));
        ResponseTemplate::new(200).set_body_json(json!({ "merchant_response": { "id": "clawcredit-resp", "choices": [] } }))
    }
}

#[tokio::test]
async fn clawcredit_passthrough_unwraps_merchant_response() {
    let mock_server = MockServer::start().await;
    let captured: Arc<Mutex<Option<(Value, Option<String>)>>> = Arc::new(Mutex::new(None));

    Mock::given(method("POST"))
        .and(path("/v1/transaction/pay"))
        .respond_with(ClawCreditResponder { captured: captured.clone() })
        .mount(&mock_server)
        .await;

    let (state, _stats) = test_state_clawcredit(mock_server.uri());
    let app = clawrouter::api::client::router(state);

    let (status, body) = send(
        app,
        json!({ "model": "eco", "messages": [{ "role": "user", "content": "hello" }] }),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "clawcredit-resp");

    let (envelope, authorization) = captured.lock().unwrap().clone().expect("pay endpoint was called");
    assert_eq!(authorization.as_deref(), Some("Bearer test-token"));
    assert_eq!(envelope["transaction"]["chain"], "BASE");
    assert_eq!(envelope["transaction"]["asset"], "0xUSDC");
    assert!(envelope["transaction"]["amount"].as_f64().unwrap() > 0.0);
    let recipient = envelope["transaction"]["recipient"].as_str().unwrap();
    assert!(recipient.ends_with("/v1/chat/completions"));
    assert_eq!(envelope["request_body"]["http"]["url"], recipient);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Explicit model normalization through a real fallback
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn explicit_model_is_normalized_before_dispatch_and_falls_back_on_failure() {
    let mock_server = MockServer::start().await;

    // Not in the catalog, so routing carries it through as a bare explicit
    // candidate (no same-tier siblings added) — only it and the emergency
    // free model end up in the chain.
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("acme-vendor/custom-model"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "error": { "message": "provider overloaded" } })))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("nvidia/gpt-oss-120b"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "emergency-resp" })))
        .mount(&mock_server)
        .await;

    let (state, stats) = test_state(mock_server.uri());
    let app = clawrouter::api::client::router(state);

    let (status, body) = send(
        app,
        json!({ "model": "  ACME-VENDOR/custom-model  ", "messages": [{ "role": "user", "content": "hi" }] }),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "emergency-resp");

    let snapshot = stats.snapshot();
    assert_eq!(snapshot["acme-vendor/custom-model"].attempts, 1);
    assert_eq!(snapshot["nvidia/gpt-oss-120b"].attempts, 1);
    assert_eq!(snapshot["nvidia/gpt-oss-120b"].fallbacks_engaged, 1);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Every candidate exhausted
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn all_candidates_failing_reports_the_last_upstream_status_as_provider_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({ "error": { "message": "all models overloaded" } })))
        .mount(&mock_server)
        .await;

    let (state, _stats) = test_state(mock_server.uri());
    let app = clawrouter::api::client::router(state);

    let (status, body) = send(
        app,
        json!({ "model": "free", "messages": [{ "role": "user", "content": "hello" }] }),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["type"], "provider_error");
    assert_eq!(body["error"]["message"], "all models overloaded");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auxiliary endpoints
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn models_endpoint_lists_catalog_and_aliases() {
    let mock_server = MockServer::start().await;
    let (state, _stats) = test_state(mock_server.uri());
    let app = clawrouter::api::client::router(state);

    let request = Request::builder().method("GET").uri("/v1/models").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    let ids: Vec<&str> = body["data"].as_array().unwrap().iter().map(|m| m["id"].as_str().unwrap()).collect();
    assert!(ids.contains(&"auto"));
    assert!(ids.contains(&"nvidia/gpt-oss-120b"));
}

#[tokio::test]
async fn health_endpoint_reports_wallet_address() {
    let mock_server = MockServer::start().await;
    let (state, _stats) = test_state(mock_server.uri());
    let app = clawrouter::api::client::router(state);

    let request = Request::builder().method("GET").uri("/health").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["wallet"].as_str().unwrap().starts_with("0x"));
}

#[tokio::test]
async fn unknown_route_returns_structured_404() {
    let mock_server = MockServer::start().await;
    let (state, _stats) = test_state(mock_server.uri());
    let app = clawrouter::api::client::router(state);

    let request = Request::builder().method("GET").uri("/nope").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"], "Not found");
}
