//! claw.credit custodial payment backend.
//!
//! Unlike the wallet backend, this one never calls the inference endpoint
//! directly — it POSTs an envelope describing the desired call to
//! claw.credit's `/v1/transaction/pay`, which executes the payment *and* the
//! forwarded HTTP call on the router's behalf, returning the upstream's
//! response wrapped in `merchant_response`.

use std::time::Duration;

use chrono::Utc;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{json, Value};

use crate::config::ClawCreditConfig;

use super::{PaymentRequest, UpstreamResponse};

const SDK_NAME: &str = "clawrouter";
const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
const MINIMUM_AMOUNT_USD: f64 = 0.01;

/// Headers that must never be forwarded inside the envelope's `request_body`
/// — they describe the hop to claw.credit itself, not the call it should make.
const STRIPPED_HEADERS: &[&str] = &["host", "content-length", "connection"];

pub struct ClawCreditBackend {
    client: Client,
    config: ClawCreditConfig,
}

impl ClawCreditBackend {
    pub fn new(config: ClawCreditConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("failed to build reqwest client");
        Self { client, config }
    }

    pub async fn invoke(
        &self,
        req: PaymentRequest<'_>,
        cancel: tokio_util::sync::CancellationToken,
    ) -> anyhow::Result<UpstreamResponse> {
        let amount_usd = to_amount_usd(req.pre_auth_micro_usd);

        let envelope = json!({
            "transaction": {
                "recipient": req.url,
                "amount": amount_usd,
                "chain": self.config.chain,
                "asset": self.config.asset,
            },
            "request_body": {
                "http": {
                    "url": req.url,
                    "method": "POST",
                    "headers": forwarded_headers(req.client_headers),
                },
                "body": req.body,
            },
            "audit_context": {
                "current_task": req.current_task,
                "reasoning_process": req.reasoning_process,
                "timestamp": Utc::now().to_rfc3339(),
            },
            "sdk_meta": {
                "sdk_name": SDK_NAME,
                "sdk_version": SDK_VERSION,
            },
        });

        let pay_url = format!("{}/v1/transaction/pay", self.config.base_url);
        let request = self
            .client
            .post(&pay_url)
            .bearer_auth(&self.config.api_token)
            .json(&envelope)
            .send();

        let response = tokio::select! {
            result = request => result?,
            _ = cancel.cancelled() => anyhow::bail!("request cancelled"),
        };

        let status = response.status();
        let raw_text = response.text().await?;
        let body: Value = serde_json::from_str(&raw_text).unwrap_or(Value::Null);

        if !status.is_success() {
            // A non-2xx from the pay-call itself propagates as-is — this is a
            // claw.credit-side failure, not a merchant response to unwrap.
            return Ok(UpstreamResponse { status, body, raw_text });
        }

        match body.get("merchant_response") {
            Some(merchant) => {
                let merchant_text = serde_json::to_string(merchant).unwrap_or_default();
                Ok(UpstreamResponse { status: StatusCode::OK, body: merchant.clone(), raw_text: merchant_text })
            }
            None => anyhow::bail!("claw.credit pay response missing merchant_response: {raw_text}"),
        }
    }
}

fn forwarded_headers(client_headers: &[(String, String)]) -> serde_json::Map<String, Value> {
    let mut headers = serde_json::Map::new();
    for (name, value) in client_headers {
        headers.insert(name.to_lowercase(), json!(value));
    }
    strip_headers(&mut headers);
    headers.entry("content-type").or_insert_with(|| json!("application/json"));
    headers
}

/// micro-USD -> USD, rounded to 6 decimal places, floored to a 1-cent minimum.
fn to_amount_usd(pre_auth_micro_usd: u64) -> f64 {
    let amount = Decimal::new(pre_auth_micro_usd as i64, 6).round_dp(6);
    amount.to_f64().unwrap_or(0.0).max(MINIMUM_AMOUNT_USD)
}

fn strip_headers(headers: &mut serde_json::Map<String, Value>) {
    for name in STRIPPED_HEADERS {
        headers.remove(*name);
    }
}
