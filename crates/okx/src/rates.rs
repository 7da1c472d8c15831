use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alphaark_core::{Clock, ConversionError, Currency, ExchangeError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SyncSettings;
use crate::transport::{HttpRequest, HttpTransport};
use crate::wire::{fetch_public, RawTicker};

pub const TICKER_PATH: &str = "/api/v5/market/ticker";

/// USD/CNY used when every fiat feed is unreachable.
pub const FALLBACK_USD_CNY: Decimal = dec!(7.2);

// ---------------------------------------------------------------------------
// Rate table
// ---------------------------------------------------------------------------

/// Directed exchange rates keyed `"BASE_QUOTE"`: one BASE buys `rate` QUOTE.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateTable {
    pub rates: BTreeMap<String, Decimal>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl RateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pair_key(base: &str, quote: &str) -> String {
        format!("{}_{}", base, quote)
    }

    pub fn insert(&mut self, base: &str, quote: &str, rate: Decimal) {
        self.rates.insert(Self::pair_key(base, quote), rate);
    }

    pub fn with_rate(mut self, base: &str, quote: &str, rate: Decimal) -> Self {
        self.insert(base, quote, rate);
        self
    }

    pub fn get(&self, base: &str, quote: &str) -> Option<Decimal> {
        self.rates.get(&Self::pair_key(base, quote)).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    /// Convert a decimal string between two currency codes.
    ///
    /// Lookup order: direct pair, inverse pair, then a two-hop route through
    /// the bridge currency. The result is rounded half away from zero to 5
    /// places for BTC and 2 places otherwise. Same-currency input is returned
    /// untouched, without parsing.
    pub fn convert(&self, amount: &str, from: &str, to: &str) -> Result<String, ConversionError> {
        if from == to {
            return Ok(amount.to_string());
        }

        let value = parse_amount(amount)?;
        let overflow = || ConversionError::Overflow(amount.to_string());

        if let Some(rate) = self.get(from, to) {
            let converted = value.checked_mul(rate).ok_or_else(overflow)?;
            return Ok(format_amount(converted, to));
        }
        if let Some(rate) = self.get(to, from).filter(|r| !r.is_zero()) {
            let converted = value.checked_div(rate).ok_or_else(overflow)?;
            return Ok(format_amount(converted, to));
        }

        let bridge = Currency::BRIDGE.code();
        if from != bridge && to != bridge {
            let bridged = self.convert(amount, from, bridge)?;
            return self.convert(&bridged, bridge, to);
        }

        Err(ConversionError::MissingRate {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

fn parse_amount(amount: &str) -> Result<Decimal, ConversionError> {
    let trimmed = amount.trim();
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|_| ConversionError::InvalidAmount(amount.to_string()))
}

/// Display precision for a currency code. Unknown codes use fiat precision.
pub fn display_precision(code: &str) -> u32 {
    match Currency::from_str(code) {
        Ok(currency) if currency.is_crypto_unit() => 5,
        _ => 2,
    }
}

/// Fixed-point rendering, rounded half away from zero.
pub fn format_fixed(value: Decimal, dp: u32) -> String {
    let mut rounded = value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(dp);
    rounded.to_string()
}

pub fn format_amount(value: Decimal, to: &str) -> String {
    format_fixed(value, display_precision(to))
}

// ---------------------------------------------------------------------------
// Rate sources
// ---------------------------------------------------------------------------

/// Produces a complete rate table.
#[async_trait]
pub trait RateSource: Send + Sync {
    async fn fetch_rates(&self) -> Result<RateTable, ExchangeError>;
}

#[derive(Debug, Deserialize)]
struct FiatFeedResponse {
    #[serde(default)]
    rates: HashMap<String, serde_json::Number>,
}

/// Crypto rates from OKX tickers, fiat rates from public FX feeds.
pub struct OkxRateSource {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    pairs: Vec<String>,
    fiat_feeds: Vec<String>,
    ticker_timeout: Duration,
    fiat_timeout: Duration,
}

impl OkxRateSource {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        base_url: impl Into<String>,
        settings: &SyncSettings,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            pairs: settings.rate_pairs.clone(),
            fiat_feeds: settings.fiat_feeds.clone(),
            ticker_timeout: settings.ticker_timeout(),
            fiat_timeout: settings.fiat_timeout(),
        }
    }

    /// Last price of one instrument. `Ok(None)` means the exchange answered
    /// but had nothing usable, which only skips this pair.
    async fn fetch_ticker(&self, inst_id: &str) -> Result<Option<Decimal>, ExchangeError> {
        let url = format!("{}{}?instId={}", self.base_url, TICKER_PATH, inst_id);
        let rows: Vec<RawTicker> =
            match fetch_public(self.transport.as_ref(), HttpRequest::get(url, self.ticker_timeout)).await {
                Ok(rows) => rows,
                Err(e @ ExchangeError::Transport(_)) => return Err(e),
                Err(e) => {
                    warn!(inst_id, error = %e, "Ticker rejected, skipping pair");
                    return Ok(None);
                }
            };

        let last = rows.first().and_then(|t| Decimal::from_str(&t.last).ok());
        if last.is_none() {
            warn!(inst_id, "Ticker has no usable last price, skipping pair");
        }
        Ok(last)
    }

    async fn fetch_usd_cny(&self) -> Option<Decimal> {
        for feed in &self.fiat_feeds {
            match self.fetch_fiat_feed(feed).await {
                Ok(rate) => return Some(rate),
                Err(e) => warn!(feed = %feed, error = %e, "Fiat feed failed"),
            }
        }
        None
    }

    async fn fetch_fiat_feed(&self, url: &str) -> Result<Decimal, ExchangeError> {
        let response = self
            .transport
            .send(HttpRequest::get(url, self.fiat_timeout))
            .await?;
        let parsed: FiatFeedResponse = serde_json::from_str(&response.body)
            .map_err(|e| ExchangeError::Decode(format!("Unreadable fiat feed: {}", e)))?;
        let cny = parsed
            .rates
            .get("CNY")
            .ok_or_else(|| ExchangeError::Decode("Fiat feed has no CNY rate".to_string()))?;
        let text = cny.to_string();
        Decimal::from_str(&text)
            .or_else(|_| Decimal::from_scientific(&text))
            .map_err(|e| ExchangeError::Decode(format!("Invalid CNY rate '{}': {}", text, e)))
    }
}

#[async_trait]
impl RateSource for OkxRateSource {
    async fn fetch_rates(&self) -> Result<RateTable, ExchangeError> {
        let mut table = RateTable::new();

        for pair in &self.pairs {
            if let Some(last) = self.fetch_ticker(pair).await? {
                table.rates.insert(pair.replace('-', "_"), last);
            }
        }

        table.insert("USD", "USDT", Decimal::ONE);

        let usd_cny = match self.fetch_usd_cny().await {
            Some(rate) => rate,
            None => {
                warn!(rate = %FALLBACK_USD_CNY, "All fiat feeds failed, using fallback USD/CNY");
                FALLBACK_USD_CNY
            }
        };
        table.insert("USD", "CNY", usd_cny);
        table.insert("USDT", "CNY", usd_cny);

        Ok(table)
    }
}

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

/// Shared rate table with cooldown-gated refresh.
///
/// Readers never block on a refresh. A failed refresh keeps the previous
/// table; it is only an error when there is no table at all.
pub struct CurrencyConverter {
    source: Arc<dyn RateSource>,
    clock: Arc<dyn Clock>,
    cooldown: chrono::Duration,
    table: RwLock<RateTable>,
    refresh_gate: tokio::sync::Mutex<()>,
}

impl CurrencyConverter {
    pub fn new(source: Arc<dyn RateSource>, clock: Arc<dyn Clock>, settings: &SyncSettings) -> Self {
        Self {
            source,
            clock,
            cooldown: settings.rates_cooldown(),
            table: RwLock::new(RateTable::new()),
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    fn is_fresh(&self) -> bool {
        match self.table.read().updated_at {
            Some(at) => self.clock.now() - at < self.cooldown,
            None => false,
        }
    }

    pub async fn refresh_rates(&self) -> Result<(), ConversionError> {
        if self.is_fresh() {
            return Ok(());
        }
        let _gate = self.refresh_gate.lock().await;
        if self.is_fresh() {
            return Ok(());
        }

        match self.source.fetch_rates().await {
            Ok(mut fresh) => {
                fresh.updated_at = Some(self.clock.now());
                info!(pairs = fresh.len(), "Exchange rates refreshed");
                *self.table.write() = fresh;
                Ok(())
            }
            Err(e) => {
                if self.table.read().is_empty() {
                    warn!(error = %e, "Exchange rate refresh failed and no rates are cached");
                    Err(ConversionError::RatesUnavailable(e.to_string()))
                } else {
                    warn!(error = %e, "Exchange rate refresh failed, keeping previous rates");
                    Ok(())
                }
            }
        }
    }

    pub fn convert(&self, amount: &str, from: &str, to: &str) -> Result<String, ConversionError> {
        let result = self.table.read().convert(amount, from, to);
        if let Err(e) = &result {
            debug!(amount, from, to, error = %e, "Conversion failed");
        }
        result
    }

    pub fn snapshot(&self) -> RateTable {
        self.table.read().clone()
    }
}
