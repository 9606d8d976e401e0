//! Configuration for clawrouter.
//!
//! Config is loaded once at startup from environment variables (optionally
//! via a local `.env` file) and validated before the server opens its port.
//! Invalid configs are rejected with a clear error rather than silently
//! falling back to defaults — the same fail-fast discipline as a TOML-file
//! config, just sourced from the environment instead.

use anyhow::Context;

/// Which payment backend attaches credentials to outgoing upstream calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaymentMode {
    #[default]
    Wallet,
    ClawCredit,
}

impl std::fmt::Display for PaymentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Wallet => "wallet",
            Self::ClawCredit => "clawcredit",
        })
    }
}

impl std::str::FromStr for PaymentMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "wallet" => Ok(Self::Wallet),
            "clawcredit" | "claw_credit" | "claw.credit" => Ok(Self::ClawCredit),
            other => anyhow::bail!("unknown BLOCKRUN_PAYMENT_MODE `{other}` (expected `wallet` or `clawcredit`)"),
        }
    }
}

/// Wallet-mode settings.
#[derive(Debug, Clone)]
pub struct WalletConfig {
    /// Hex-encoded private key used to sign outgoing x402 payments.
    pub private_key_hex: String,
    pub chain_id: u64,
    /// Asset (contract address or symbol) the x402 payment is denominated in.
    pub asset: String,
}

/// ClawCredit-mode settings.
#[derive(Debug, Clone)]
pub struct ClawCreditConfig {
    pub api_token: String,
    pub base_url: String,
    pub chain: String,
    pub asset: String,
}

/// Top-level router configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub payment_mode: PaymentMode,
    pub wallet: Option<WalletConfig>,
    pub clawcredit: Option<ClawCreditConfig>,

    pub proxy_port: u16,
    pub blockrun_base_url: String,

    pub session_pin_ttl_secs: u64,
    pub dedup_ttl_secs: u64,
    pub request_deadline_secs: u64,
    pub balance_poll_secs: u64,
}

const DEFAULT_CLAWCREDIT_BASE_URL: &str = "https://api.claw.credit";
const DEFAULT_CLAWCREDIT_ASSET: &str = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"; // Base USDC
const DEFAULT_WALLET_ASSET: &str = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"; // Base USDC

impl Config {
    /// Load and validate configuration from the process environment.
    pub fn load() -> anyhow::Result<Self> {
        let payment_mode: PaymentMode = env_or("BLOCKRUN_PAYMENT_MODE", "wallet").parse()?;

        let wallet = if payment_mode == PaymentMode::Wallet {
            let private_key_hex = std::env::var("BLOCKRUN_WALLET_KEY")
                .context("BLOCKRUN_PAYMENT_MODE=wallet requires BLOCKRUN_WALLET_KEY")?;
            let chain_id: u64 = env_or("BLOCKRUN_WALLET_CHAIN_ID", "8453")
                .parse()
                .context("BLOCKRUN_WALLET_CHAIN_ID must be a positive integer")?;
            let asset = env_or("BLOCKRUN_WALLET_ASSET", DEFAULT_WALLET_ASSET);
            Some(WalletConfig { private_key_hex, chain_id, asset })
        } else {
            None
        };

        let clawcredit = if payment_mode == PaymentMode::ClawCredit {
            let api_token = std::env::var("CLAWCREDIT_API_TOKEN")
                .context("BLOCKRUN_PAYMENT_MODE=clawcredit requires CLAWCREDIT_API_TOKEN")?;
            anyhow::ensure!(!api_token.is_empty(), "CLAWCREDIT_API_TOKEN must not be empty");
            let base_url = env_or("CLAWCREDIT_BASE_URL", DEFAULT_CLAWCREDIT_BASE_URL);
            let chain = env_or("CLAWCREDIT_PAYMENT_CHAIN", "BASE").to_uppercase();
            let asset = env_or("CLAWCREDIT_PAYMENT_ASSET", DEFAULT_CLAWCREDIT_ASSET);
            Some(ClawCreditConfig { api_token, base_url, chain, asset })
        } else {
            None
        };

        let proxy_port: u16 = env_or("BLOCKRUN_PROXY_PORT", "8402")
            .parse()
            .context("BLOCKRUN_PROXY_PORT must be a valid port number")?;

        let blockrun_base_url = env_or("BLOCKRUN_API_BASE_URL", "https://api.blockrun.ai")
            .trim_end_matches('/')
            .to_string();

        let session_pin_ttl_secs: u64 = env_or("CLAWROUTER_SESSION_PIN_TTL_SECS", "600")
            .parse()
            .context("CLAWROUTER_SESSION_PIN_TTL_SECS must be a positive integer")?;
        let dedup_ttl_secs: u64 = env_or("CLAWROUTER_DEDUP_TTL_SECS", "30")
            .parse()
            .context("CLAWROUTER_DEDUP_TTL_SECS must be a positive integer")?;
        let request_deadline_secs: u64 = env_or("CLAWROUTER_REQUEST_DEADLINE_SECS", "120")
            .parse()
            .context("CLAWROUTER_REQUEST_DEADLINE_SECS must be a positive integer")?;
        let balance_poll_secs: u64 = env_or("CLAWROUTER_BALANCE_POLL_SECS", "60")
            .parse()
            .context("CLAWROUTER_BALANCE_POLL_SECS must be a positive integer")?;

        let config = Self {
            payment_mode,
            wallet,
            clawcredit,
            proxy_port,
            blockrun_base_url,
            session_pin_ttl_secs,
            dedup_ttl_secs,
            request_deadline_secs,
            balance_poll_secs,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        match self.payment_mode {
            PaymentMode::Wallet => {
                anyhow::ensure!(self.wallet.is_some(), "wallet mode requires wallet config");
            }
            PaymentMode::ClawCredit => {
                anyhow::ensure!(self.clawcredit.is_some(), "clawcredit mode requires clawcredit config");
            }
        }
        anyhow::ensure!(self.proxy_port > 0, "BLOCKRUN_PROXY_PORT must be nonzero");
        anyhow::ensure!(self.session_pin_ttl_secs > 0, "CLAWROUTER_SESSION_PIN_TTL_SECS must be nonzero");
        anyhow::ensure!(self.dedup_ttl_secs > 0, "CLAWROUTER_DEDUP_TTL_SECS must be nonzero");
        anyhow::ensure!(self.request_deadline_secs >= 10, "CLAWROUTER_REQUEST_DEADLINE_SECS must be at least 10");
        Ok(())
    }
}

fn env_or(var: &str, default: &str) -> String {
    std::env::var(var).ok().filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string())
}
