//! Request routing — the brain of clawrouter.
//!
//! Given a classified request and a requested model (an alias or an
//! explicit id), produces an ordered candidate chain: resolve the alias,
//! gather same-tier alternatives ascending by price, apply any compatible
//! session pin, and always finish with the catalog's emergency free model.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::balance::BalanceMonitor;
use crate::catalog::{Capability, Catalog, Tier};
use crate::dedup::DedupCache;
use crate::dispatch::Dispatcher;
use crate::payments::PaymentBackend;
use crate::session_pin::SessionPinStore;
use crate::stats::StatsRegistry;

/// Shared axum state — everything a `/v1/chat/completions` request touches
/// from routing through dispatch.
pub struct RouterState {
    pub catalog: Arc<Catalog>,
    pub pins: Arc<SessionPinStore>,
    pub balance: Option<BalanceMonitor>,
    pub dedup: Arc<DedupCache>,
    pub dispatcher: Arc<Dispatcher>,
    pub stats: Arc<StatsRegistry>,
    pub payment_backend: Arc<PaymentBackend>,
    pub request_deadline: Duration,
    pub blockrun_base_url: String,
}

#[derive(Debug, Clone)]
pub struct RoutingDecision {
    /// Alias family used for session-pin scoping: one of
    /// `auto`/`eco`/`premium`/`free`/`explicit`.
    pub tier_profile: String,
    pub primary_model: String,
    pub candidate_chain: Vec<String>,
    pub reasoning: String,
    pub cost_estimate: f64,
    pub savings: f64,
}

/// Trim whitespace and lowercase the vendor-prefix segment before the first
/// `/`. Idempotent: `normalize(normalize(x)) == normalize(x)`.
pub fn normalize_model(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.split_once('/') {
        Some((vendor, rest)) => format!("{}/{}", vendor.to_lowercase(), rest),
        None => trimmed.to_string(),
    }
}

fn default_max_tokens(body: &Value) -> f64 {
    body.get("max_tokens").and_then(Value::as_f64).unwrap_or(1000.0)
}

fn is_wallet_empty(state: &RouterState) -> bool {
    state
        .balance
        .as_ref()
        .and_then(|m| m.latest())
        .map(|s| s.is_empty)
        .unwrap_or(false)
}

pub async fn route(state: &RouterState, body: &Value, session_id: Option<&str>) -> RoutingDecision {
    let caps = crate::classifier::classify(body);
    let requested = body
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or("auto")
        .trim()
        .to_string();

    let (tier_profile, primary, mut reasoning) = resolve_alias(state, &requested, &caps);

    let mut chain = vec![primary.clone()];
    if let Some(model) = state.catalog.by_id(&primary) {
        let same_tier: Vec<String> = state
            .catalog
            .cheapest_in_tier(model.tier, &caps)
            .map(|m| m.id.clone())
            .filter(|id| *id != primary)
            .collect();
        chain.extend(same_tier);
    }

    if let Some(sid) = session_id {
        if let Some(pinned) = state.pins.get(sid, &tier_profile).await {
            let compatible = state
                .catalog
                .by_id(&pinned)
                .map(|m| caps.iter().all(|c| m.capabilities.contains(c)))
                .unwrap_or(true);
            if compatible {
                chain.retain(|id| id != &pinned);
                chain.insert(0, pinned.clone());
                reasoning.push_str(&format!("; pinned session override to {pinned}"));
            }
        }
    }

    let emergency_id = state.catalog.emergency_free().id.clone();
    if !chain.contains(&emergency_id) {
        chain.push(emergency_id);
    }

    let mut seen = HashSet::new();
    chain.retain(|id| seen.insert(id.clone()));

    let max_tokens = default_max_tokens(body);
    let primary_price = state.catalog.by_id(&chain[0]).map(|m| m.price_per_million_usd).unwrap_or(0.0);
    let cost_estimate = primary_price * max_tokens / 1_000_000.0;
    let premium_price = state.catalog.highest_quality(&caps).map(|m| m.price_per_million_usd).unwrap_or(0.0);
    let savings = if premium_price > 0.0 {
        (1.0 - (primary_price / premium_price)).clamp(0.0, 1.0)
    } else {
        0.0
    };

    debug!(tier_profile, primary = %chain[0], chain_len = chain.len(), "routed request");

    RoutingDecision {
        tier_profile,
        primary_model: chain[0].clone(),
        candidate_chain: chain,
        reasoning,
        cost_estimate,
        savings,
    }
}

fn resolve_alias(state: &RouterState, requested: &str, caps: &HashSet<Capability>) -> (String, String, String) {
    match requested {
        "auto" => {
            let wants_premium = caps.contains(&Capability::Reasoning)
                || caps.contains(&Capability::Code)
                || caps.contains(&Capability::LongContext);
            let tier = if is_wallet_empty(state) {
                Tier::Free
            } else if wants_premium {
                Tier::Premium
            } else {
                Tier::Standard
            };
            let primary = state
                .catalog
                .cheapest_in_tier(tier, caps)
                .next()
                .or_else(|| state.catalog.cheapest_in_tier(Tier::Free, caps).next())
                .map(|m| m.id.clone())
                .unwrap_or_else(|| state.catalog.emergency_free().id.clone());
            let reasoning = format!("auto -> {tier:?} tier ({} capability match)", describe_caps(caps));
            ("auto".to_string(), primary, reasoning)
        }
        "eco" => {
            let primary = state
                .catalog
                .cheapest_in_tier(Tier::Eco, caps)
                .next()
                .map(|m| m.id.clone())
                .unwrap_or_else(|| state.catalog.emergency_free().id.clone());
            ("eco".to_string(), primary, "eco -> cheapest non-free match".to_string())
        }
        "premium" => {
            let primary = state
                .catalog
                .highest_quality(caps)
                .map(|m| m.id.clone())
                .unwrap_or_else(|| state.catalog.emergency_free().id.clone());
            ("premium".to_string(), primary, "premium -> highest quality match".to_string())
        }
        "free" => {
            let primary = state
                .catalog
                .free_models()
                .find(|m| caps.iter().all(|c| m.capabilities.contains(c)))
                .map(|m| m.id.clone())
                .unwrap_or_else(|| state.catalog.emergency_free().id.clone());
            ("free".to_string(), primary, "free -> zero-cost match".to_string())
        }
        explicit => {
            let normalized = normalize_model(explicit);
            ("explicit".to_string(), normalized.clone(), format!("explicit model `{normalized}` requested"))
        }
    }
}

fn describe_caps(caps: &HashSet<Capability>) -> String {
    let mut names: Vec<&str> = caps
        .iter()
        .map(|c| match c {
            Capability::General => "general",
            Capability::Reasoning => "reasoning",
            Capability::Code => "code",
            Capability::Vision => "vision",
            Capability::LongContext => "long-context",
        })
        .collect();
    names.sort_unstable();
    names.join("+")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_state() -> RouterState {
        let stats = Arc::new(crate::stats::StatsRegistry::new());
        let payment_backend = Arc::new(crate::payments::PaymentBackend::ClawCredit(
            crate::payments::ClawCreditBackend::new(crate::config::ClawCreditConfig {
                api_token: "test-token".into(),
                base_url: "https://api.claw.credit".into(),
                chain: "BASE".into(),
                asset: "0xUSDC".into(),
            }),
        ));
        RouterState {
            catalog: Arc::new(Catalog::new()),
            pins: Arc::new(SessionPinStore::new(std::time::Duration::from_secs(600))),
            balance: None,
            dedup: Arc::new(DedupCache::new(std::time::Duration::from_secs(30))),
            dispatcher: Arc::new(Dispatcher::new(
                payment_backend.clone(),
                "https://api.blockrun.ai".into(),
                stats.clone(),
            )),
            stats,
            payment_backend,
            request_deadline: std::time::Duration::from_secs(120),
            blockrun_base_url: "https://api.blockrun.ai".into(),
        }
    }

    #[test]
    fn normalize_lowercases_vendor_prefix_only() {
        assert_eq!(normalize_model("  DEEPSEEK/deepseek-chat  "), "deepseek/deepseek-chat");
        assert_eq!(normalize_model("deepseek/DeepSeek-Chat"), "deepseek/DeepSeek-Chat");
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize_model("  OPENAI/GPT-4.1  ");
        let twice = normalize_model(&once);
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn chain_always_ends_with_emergency_free_model() {
        let state = test_state();
        let body = json!({ "model": "premium", "messages": [{"role":"user","content":"hello"}] });
        let decision = route(&state, &body, None).await;
        assert_eq!(decision.candidate_chain.last().unwrap(), "nvidia/gpt-oss-120b");
    }

    #[tokio::test]
    async fn chain_has_no_duplicates() {
        let state = test_state();
        let body = json!({ "model": "auto", "messages": [{"role":"user","content":"Prove sqrt(2) is irrational"}] });
        let decision = route(&state, &body, None).await;
        let mut seen = HashSet::new();
        assert!(decision.candidate_chain.iter().all(|id| seen.insert(id.clone())));
    }

    #[tokio::test]
    async fn explicit_model_is_normalized_as_primary() {
        let state = test_state();
        let body = json!({ "model": "  DEEPSEEK/deepseek-chat  ", "messages": [{"role":"user","content":"hi"}] });
        let decision = route(&state, &body, None).await;
        assert_eq!(decision.primary_model, "deepseek/deepseek-chat");
    }

    #[tokio::test]
    async fn pin_is_only_honored_under_matching_tier_profile() {
        let state = test_state();
        state.pins.set("sess-1", "premium", "anthropic/claude-3.5-sonnet").await;

        let body = json!({ "model": "eco", "messages": [{"role":"user","content":"hi"}] });
        let decision = route(&state, &body, Some("sess-1")).await;
        assert_ne!(decision.primary_model, "anthropic/claude-3.5-sonnet");
    }

    #[tokio::test]
    async fn pin_is_honored_under_matching_tier_profile() {
        let state = test_state();
        state.pins.set("sess-1", "eco", "deepseek/deepseek-chat").await;

        let body = json!({ "model": "eco", "messages": [{"role":"user","content":"hi"}] });
        let decision = route(&state, &body, Some("sess-1")).await;
        assert_eq!(decision.primary_model, "deepseek/deepseek-chat");
    }
}
