use std::fmt;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://www.okx.com";

/// Credentials and endpoint for the OKX v5 API.
pub struct OkxConfig {
    pub api_key: String,
    pub secret_key: SecretString,
    pub passphrase: SecretString,
    pub base_url: String,
    /// Demo-trading account. Informational only.
    pub is_test: bool,
    pub remark: String,
    pub permissions: String,
}

impl Default for OkxConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: SecretString::from(String::new()),
            passphrase: SecretString::from(String::new()),
            base_url: DEFAULT_BASE_URL.to_string(),
            is_test: false,
            remark: "AlphaArk".to_string(),
            permissions: "read".to_string(),
        }
    }
}

impl OkxConfig {
    pub fn new(
        api_key: impl Into<String>,
        secret_key: impl Into<String>,
        passphrase: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            secret_key: SecretString::from(secret_key.into()),
            passphrase: SecretString::from(passphrase.into()),
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Names of the credential fields that are still empty.
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.api_key.is_empty() {
            missing.push("api_key");
        }
        if self.secret_key.expose_secret().is_empty() {
            missing.push("secret_key");
        }
        if self.passphrase.expose_secret().is_empty() {
            missing.push("passphrase");
        }
        missing
    }

    pub fn has_credentials(&self) -> bool {
        self.missing_credentials().is_empty()
    }

    /// API key with everything but the first and last four characters hidden.
    pub fn masked_api_key(&self) -> String {
        let chars: Vec<char> = self.api_key.chars().collect();
        if chars.len() <= 8 {
            return "*".repeat(chars.len());
        }
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}****{tail}")
    }
}

impl fmt::Debug for OkxConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OkxConfig")
            .field("api_key", &self.masked_api_key())
            .field("secret_key", &"[REDACTED]")
            .field("passphrase", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("is_test", &self.is_test)
            .field("remark", &self.remark)
            .field("permissions", &self.permissions)
            .finish()
    }
}

/// Tunables for the synchronization core. Loadable from a TOML file; any
/// omitted key keeps its default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Minimum gap between two server-time synchronizations.
    pub clock_cooldown_secs: u64,
    /// Minimum gap between two exchange-rate refreshes.
    pub rates_cooldown_secs: u64,
    pub private_timeout_secs: u64,
    pub ticker_timeout_secs: u64,
    pub time_timeout_secs: u64,
    pub fiat_timeout_secs: u64,
    pub public_timeout_secs: u64,
    /// Total attempts for a signed request, first try included.
    pub max_attempts: u32,
    /// Linear backoff step between signed attempts.
    pub backoff_step_ms: u64,
    /// Instruments whose last price seeds the rate table.
    pub rate_pairs: Vec<String>,
    /// Fiat feeds tried in order for the USD/CNY rate.
    pub fiat_feeds: Vec<String>,
    /// Instrument pushed to price-stream subscribers.
    pub stream_symbol: String,
    pub stream_interval_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            clock_cooldown_secs: 300,
            rates_cooldown_secs: 300,
            private_timeout_secs: 30,
            ticker_timeout_secs: 10,
            time_timeout_secs: 5,
            fiat_timeout_secs: 5,
            public_timeout_secs: 10,
            max_attempts: 3,
            backoff_step_ms: 50,
            rate_pairs: ["BTC-USDT", "BTC-USD", "ETH-USDT", "ETH-USD"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            fiat_feeds: vec![
                "https://api.exchangerate-api.com/v4/latest/USD".to_string(),
                "https://open.er-api.com/v6/latest/USD".to_string(),
            ],
            stream_symbol: "BTC-USDT".to_string(),
            stream_interval_secs: 5,
        }
    }
}

impl SyncSettings {
    pub fn clock_cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.clock_cooldown_secs as i64)
    }

    pub fn rates_cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.rates_cooldown_secs as i64)
    }

    pub fn private_timeout(&self) -> Duration {
        Duration::from_secs(self.private_timeout_secs)
    }

    pub fn ticker_timeout(&self) -> Duration {
        Duration::from_secs(self.ticker_timeout_secs)
    }

    pub fn time_timeout(&self) -> Duration {
        Duration::from_secs(self.time_timeout_secs)
    }

    pub fn fiat_timeout(&self) -> Duration {
        Duration::from_secs(self.fiat_timeout_secs)
    }

    pub fn public_timeout(&self) -> Duration {
        Duration::from_secs(self.public_timeout_secs)
    }

    pub fn stream_interval(&self) -> Duration {
        Duration::from_secs(self.stream_interval_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            backoff_step: Duration::from_millis(self.backoff_step_ms),
        }
    }
}

/// Bounded retry with linear backoff: attempt `n` (zero-based) waits
/// `n * backoff_step` before it is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_step: Duration,
}

impl RetryPolicy {
    pub fn delay_before(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        SyncSettings::default().retry_policy()
    }
}
