//! x402 wallet payment backend.
//!
//! Attaches an `X-Payment` header signed with the configured wallet's
//! private key and issues the request directly to BlockRun. Real wallet key
//! generation and on-disk persistence belong to an external collaborator
//! (out of scope here, per the router's own startup config); this backend
//! only ever receives an already-resolved hex private key.
//!
//! The signing scheme below is a simplified envelope in the spirit of x402
//! (a canonical payload plus a signature over it) — an HMAC-SHA256 keyed by
//! the wallet's private key bytes, not a full EIP-712/secp256k1 signature.
//! Genuine on-chain signing is the wallet-key collaborator's responsibility;
//! this backend's job is attaching *a* payment header and reading the
//! response, not proving chain-level authenticity.

use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::Value;
use sha2::Sha256;

use crate::config::WalletConfig;

use super::{PaymentRequest, UpstreamResponse};

type HmacSha256 = Hmac<Sha256>;

/// A forwarded SSE byte stream straight from BlockRun, not reframed.
pub type SseStream = Pin<Box<dyn Stream<Item = anyhow::Result<Bytes>> + Send>>;

pub struct WalletBackend {
    client: Client,
    config: WalletConfig,
    public_address: String,
}

impl WalletBackend {
    pub fn new(config: WalletConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("failed to build reqwest client");
        let public_address = derive_public_address(&config.private_key_hex)?;
        Ok(Self { client, config, public_address })
    }

    pub fn public_address(&self) -> &str {
        &self.public_address
    }

    pub async fn invoke(
        &self,
        req: PaymentRequest<'_>,
        cancel: tokio_util::sync::CancellationToken,
    ) -> anyhow::Result<UpstreamResponse> {
        let amount_usd = req.pre_auth_micro_usd as f64 / 1_000_000.0;
        let payment_header = self.sign_payment(req.url, amount_usd)?;

        let request = self
            .client
            .post(req.url)
            .header("X-Payment", payment_header)
            .json(req.body)
            .send();

        let response = tokio::select! {
            result = request => result?,
            _ = cancel.cancelled() => anyhow::bail!("request cancelled"),
        };

        let status = response.status();
        let raw_text = response.text().await?;
        let body: serde_json::Value =
            serde_json::from_str(&raw_text).unwrap_or(serde_json::Value::Null);

        Ok(UpstreamResponse { status, body, raw_text })
    }

    /// Issue a streaming chat completion directly, bypassing dedup and the
    /// fallback executor. Used only for `stream: true` requests, which
    /// forward to exactly one candidate (no mid-stream failover).
    pub async fn invoke_stream(&self, url: &str, body: &Value, pre_auth_micro_usd: u64) -> anyhow::Result<SseStream> {
        let amount_usd = pre_auth_micro_usd as f64 / 1_000_000.0;
        let payment_header = self.sign_payment(url, amount_usd)?;

        let response = self
            .client
            .post(url)
            .header("X-Payment", payment_header)
            .json(body)
            .send()
            .await?;

        anyhow::ensure!(
            response.status().is_success(),
            "upstream rejected streaming request with HTTP {}",
            response.status()
        );

        let stream = response.bytes_stream().map(|chunk| chunk.map_err(anyhow::Error::from));
        Ok(Box::pin(stream))
    }

    /// Poll the wallet's on-chain USD balance. Used by the balance monitor.
    pub async fn fetch_balance_usd(&self, blockrun_base_url: &str) -> anyhow::Result<Decimal> {
        let url = format!("{blockrun_base_url}/v1/wallet/balance?address={}", self.public_address);
        let response = self.client.get(&url).send().await?;
        anyhow::ensure!(response.status().is_success(), "balance query returned HTTP {}", response.status());
        let body: serde_json::Value = response.json().await?;
        let raw = body
            .get("balance_usd")
            .and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_f64().map(|f| f.to_string())))
            .ok_or_else(|| anyhow::anyhow!("balance response missing balance_usd"))?;
        raw.parse().map_err(|e| anyhow::anyhow!("invalid balance_usd `{raw}`: {e}"))
    }

    fn sign_payment(&self, upstream_url: &str, amount_usd: f64) -> anyhow::Result<String> {
        let payload = serde_json::json!({
            "from": self.public_address,
            "to": upstream_url,
            "amount_usd": amount_usd,
            "chain_id": self.config.chain_id,
            "nonce": uuid::Uuid::new_v4().to_string(),
            "asset": self.config.asset,
        });
        let payload_bytes = serde_json::to_vec(&payload)?;
        let payload_b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &payload_bytes);

        let key_bytes = hex::decode(self.config.private_key_hex.trim_start_matches("0x"))
            .map_err(|e| anyhow::anyhow!("BLOCKRUN_WALLET_KEY is not valid hex: {e}"))?;
        let mut mac = HmacSha256::new_from_slice(&key_bytes)
            .map_err(|e| anyhow::anyhow!("invalid wallet key length: {e}"))?;
        mac.update(payload_bytes.as_slice());
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(format!("{payload_b64}.{signature}"))
    }
}

/// Derive a stable public identifier from the configured private key.
///
/// Not a real elliptic-curve public key derivation — just a deterministic
/// fingerprint so the same key always reports the same address in logs and
/// `GET /health`. Real address derivation belongs to the wallet-key
/// collaborator along with key generation itself.
fn derive_public_address(private_key_hex: &str) -> anyhow::Result<String> {
    let key_bytes = hex::decode(private_key_hex.trim_start_matches("0x"))
        .map_err(|e| anyhow::anyhow!("BLOCKRUN_WALLET_KEY is not valid hex: {e}"))?;
    anyhow::ensure!(!key_bytes.is_empty(), "BLOCKRUN_WALLET_KEY must not be empty");
    use sha2::Digest as _;
    let digest = Sha256::digest(&key_bytes);
    Ok(format!("0x{}", hex::encode(&digest[..20])))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> WalletConfig {
        WalletConfig {
            private_key_hex: "aabbccddeeff00112233445566778899aabbccddeeff00112233445566778899".into(),
            chain_id: 8453,
            asset: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".into(),
        }
    }

    #[test]
    fn derives_a_stable_address_from_key() {
        let a = derive_public_address(&test_config().private_key_hex).unwrap();
        let b = derive_public_address(&test_config().private_key_hex).unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("0x"));
    }

    #[test]
    fn rejects_non_hex_key() {
        assert!(derive_public_address("not-hex").is_err());
    }

    #[test]
    fn sign_payment_produces_payload_dot_signature() {
        let backend = WalletBackend::new(test_config()).unwrap();
        let header = backend.sign_payment("https://api.blockrun.ai/v1/chat/completions", 0.05).unwrap();
        let parts: Vec<&str> = header.split('.').collect();
        assert_eq!(parts.len(), 2);
    }
}
