use crate::models::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised when parsing caller input into domain types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),
    #[error("Unsupported time period: {0}")]
    UnsupportedPeriod(String),
    #[error("Unsupported instrument type: {0} (expected SPOT, MARGIN, SWAP, FUTURES or OPTION)")]
    UnsupportedInstrumentType(String),
}

/// Errors from the currency conversion engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversionError {
    #[error("Invalid amount '{0}'")]
    InvalidAmount(String),
    #[error("No exchange rate from {from} to {to}")]
    MissingRate { from: String, to: String },
    #[error("Exchange rates unavailable: {0}")]
    RatesUnavailable(String),
    #[error("Conversion of '{0}' overflowed")]
    Overflow(String),
}

/// Errors that can occur while talking to the exchange.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// Credentials missing or unusable. Never retried.
    #[error("Configuration error: {0}")]
    Config(String),
    /// Network failure, timeout, or unreadable body.
    #[error("Transport error: {0}")]
    Transport(String),
    /// Well-formed envelope with a non-zero `code`.
    #[error("OKX API error {code}: {message}")]
    Api { code: String, message: String },
    /// Malformed JSON or envelope.
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Request failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<ExchangeError>,
    },
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error("Not available: {0}")]
    NotAvailable(String),
}

/// Errors from a historical equity source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EquityError {
    #[error("Historical equity for {period} is not available: {reason}")]
    NotAvailable { period: TimePeriod, reason: String },
    #[error("Historical equity lookup failed: {0}")]
    Source(String),
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Source of local wall-clock time. Injected so cooldowns can be tested.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Provides account equity as it was at the start of a lookback period.
#[async_trait]
pub trait HistoricalEquitySource: Send + Sync {
    async fn equity_at_period_start(
        &self,
        currency: Currency,
        period: TimePeriod,
    ) -> Result<Decimal, EquityError>;
}

/// Placeholder for the equity history store, which does not exist yet.
/// Every lookup reports `EquityError::NotAvailable`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableEquitySource;

#[async_trait]
impl HistoricalEquitySource for UnavailableEquitySource {
    async fn equity_at_period_start(
        &self,
        currency: Currency,
        period: TimePeriod,
    ) -> Result<Decimal, EquityError> {
        tracing::debug!(%currency, %period, "historical equity requested but no source is configured");
        Err(EquityError::NotAvailable {
            period,
            reason: "no historical equity store is configured".to_string(),
        })
    }
}

/// Produces the latest price snapshot for a fixed instrument.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn latest(&self) -> Result<PriceSnapshot, ExchangeError>;
}
