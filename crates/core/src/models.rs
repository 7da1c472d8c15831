use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::traits::ModelError;

// ---------------------------------------------------------------------------
// Currency & Period
// ---------------------------------------------------------------------------

/// Display currencies a caller may request amounts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Cny,
    Usd,
    Usdt,
    Btc,
}

impl Currency {
    /// The stable token every indirect conversion is routed through.
    pub const BRIDGE: Currency = Currency::Usdt;

    pub fn supported() -> [Currency; 4] {
        [Currency::Cny, Currency::Usd, Currency::Usdt, Currency::Btc]
    }

    /// Exchange currency code, e.g. "USDT".
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Cny => "CNY",
            Currency::Usd => "USD",
            Currency::Usdt => "USDT",
            Currency::Btc => "BTC",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Currency::Cny => "¥",
            Currency::Usd => "$",
            Currency::Usdt => "₮",
            Currency::Btc => "₿",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Currency::Cny => "Chinese Yuan",
            Currency::Usd => "US Dollar",
            Currency::Usdt => "Tether",
            Currency::Btc => "Bitcoin",
        }
    }

    /// Whether amounts in this currency are shown at crypto granularity.
    pub fn is_crypto_unit(&self) -> bool {
        matches!(self, Currency::Btc)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = ModelError;

    /// Case-insensitive parse of a currency code.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CNY" => Ok(Currency::Cny),
            "USD" => Ok(Currency::Usd),
            "USDT" => Ok(Currency::Usdt),
            "BTC" => Ok(Currency::Btc),
            _ => Err(ModelError::UnsupportedCurrency(s.to_string())),
        }
    }
}

/// Lookback windows for profit/loss reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimePeriod {
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "1w")]
    OneWeek,
    #[serde(rename = "1m")]
    OneMonth,
    #[serde(rename = "6m")]
    SixMonths,
}

impl TimePeriod {
    pub fn supported() -> [TimePeriod; 4] {
        [
            TimePeriod::OneDay,
            TimePeriod::OneWeek,
            TimePeriod::OneMonth,
            TimePeriod::SixMonths,
        ]
    }

    pub fn code(&self) -> &'static str {
        match self {
            TimePeriod::OneDay => "1d",
            TimePeriod::OneWeek => "1w",
            TimePeriod::OneMonth => "1m",
            TimePeriod::SixMonths => "6m",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            TimePeriod::OneDay => Duration::days(1),
            TimePeriod::OneWeek => Duration::days(7),
            TimePeriod::OneMonth => Duration::days(30),
            TimePeriod::SixMonths => Duration::days(180),
        }
    }

    /// Parse a comma-separated list such as "1d,1w". Unknown entries are
    /// skipped; an input with no valid entry yields every supported period.
    pub fn parse_list(input: &str) -> Vec<TimePeriod> {
        let mut periods: Vec<TimePeriod> = Vec::new();
        for period in input.split(',').filter_map(|p| p.parse::<TimePeriod>().ok()) {
            if !periods.contains(&period) {
                periods.push(period);
            }
        }
        if periods.is_empty() {
            periods = TimePeriod::supported().to_vec();
        }
        periods
    }
}

impl fmt::Display for TimePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for TimePeriod {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1d" => Ok(TimePeriod::OneDay),
            "1w" => Ok(TimePeriod::OneWeek),
            "1m" => Ok(TimePeriod::OneMonth),
            "6m" => Ok(TimePeriod::SixMonths),
            other => Err(ModelError::UnsupportedPeriod(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// Account equity rendered in a display currency.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBalance {
    pub total_equity: String,
    pub currency: Currency,
    pub last_update_time: DateTime<Utc>,
    pub details: Vec<Balance>,
}

/// One currency line of the account. Amounts stay as the exchange reported them;
/// only `equity` is expressed in the display currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    pub currency: String,
    pub balance: String,
    pub available: String,
    pub frozen: String,
    pub equity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfitLoss {
    pub period: TimePeriod,
    pub profit_amount: String,
    pub profit_percent: String,
    pub currency: Currency,
    pub is_profit: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub balance: AccountBalance,
    pub profit_loss: Vec<ProfitLoss>,
    pub currency: Currency,
    pub update_time: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Position queries
// ---------------------------------------------------------------------------

/// Filters for the open-positions endpoint, passed through verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionsRequest {
    pub inst_type: Option<String>,
    pub inst_id: Option<String>,
    pub pos_id: Option<String>,
}

impl PositionsRequest {
    /// Non-empty filters in a fixed order, as wire query pairs.
    pub fn query_params(&self) -> Vec<(String, String)> {
        collect_params([
            ("instType", &self.inst_type),
            ("instId", &self.inst_id),
            ("posId", &self.pos_id),
        ])
    }
}

/// Filters and pagination cursors for the closed-positions endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionsHistoryRequest {
    pub inst_type: Option<String>,
    pub inst_id: Option<String>,
    pub mgn_mode: Option<String>,
    #[serde(rename = "type")]
    pub close_type: Option<String>,
    pub pos_id: Option<String>,
    pub after: Option<String>,
    pub before: Option<String>,
    pub limit: Option<String>,
}

impl PositionsHistoryRequest {
    /// Largest page the exchange returns for position history.
    pub const MAX_PAGE_SIZE: usize = 100;

    /// Non-empty filters in a fixed order. `limit` defaults to the maximum page size.
    pub fn query_params(&self) -> Vec<(String, String)> {
        let mut params = collect_params([
            ("instType", &self.inst_type),
            ("instId", &self.inst_id),
            ("mgnMode", &self.mgn_mode),
            ("type", &self.close_type),
            ("posId", &self.pos_id),
            ("after", &self.after),
            ("before", &self.before),
            ("limit", &self.limit),
        ]);
        if !params.iter().any(|(k, _)| k == "limit") {
            params.push(("limit".to_string(), Self::MAX_PAGE_SIZE.to_string()));
        }
        params
    }
}

fn collect_params<const N: usize>(fields: [(&str, &Option<String>); N]) -> Vec<(String, String)> {
    fields
        .into_iter()
        .filter_map(|(key, value)| {
            value
                .as_deref()
                .filter(|v| !v.is_empty())
                .map(|v| (key.to_string(), v.to_string()))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

/// A stop-loss / take-profit order attached to an open position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CloseOrderAlgo {
    pub algo_id: String,
    pub sl_trigger_px: String,
    pub sl_trigger_px_type: String,
    pub tp_trigger_px: String,
    pub tp_trigger_px_type: String,
    pub close_fraction: String,
}

/// Exchange-reported fields of an open position. Numeric values stay string-encoded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PositionFields {
    pub inst_type: String,
    pub inst_id: String,
    pub mgn_mode: String,
    pub pos_id: String,
    pub pos_side: String,
    pub pos: String,
    pub base_bal: String,
    pub quote_bal: String,
    pub base_borrowed: String,
    pub base_interest: String,
    pub quote_borrowed: String,
    pub quote_interest: String,
    pub pos_ccy: String,
    pub avail_pos: String,
    pub avg_px: String,
    pub non_settle_avg_px: String,
    pub upl: String,
    pub upl_ratio: String,
    pub upl_last_px: String,
    pub upl_ratio_last_px: String,
    pub lever: String,
    pub liq_px: String,
    pub mark_px: String,
    pub imr: String,
    pub margin: String,
    pub mgn_ratio: String,
    pub mmr: String,
    pub liab: String,
    pub liab_ccy: String,
    pub interest: String,
    pub trade_id: String,
    pub opt_val: String,
    pub pending_close_ord_liab_val: String,
    pub notional_usd: String,
    pub adl: String,
    pub ccy: String,
    pub last: String,
    pub idx_px: String,
    pub usd_px: String,
    pub be_px: String,
    #[serde(rename = "deltaBS")]
    pub delta_bs: String,
    #[serde(rename = "deltaPA")]
    pub delta_pa: String,
    #[serde(rename = "gammaBS")]
    pub gamma_bs: String,
    #[serde(rename = "gammaPA")]
    pub gamma_pa: String,
    #[serde(rename = "thetaBS")]
    pub theta_bs: String,
    #[serde(rename = "thetaPA")]
    pub theta_pa: String,
    #[serde(rename = "vegaBS")]
    pub vega_bs: String,
    #[serde(rename = "vegaPA")]
    pub vega_pa: String,
    pub spot_in_use_amt: String,
    pub spot_in_use_ccy: String,
    pub cl_spot_in_use_amt: String,
    pub max_spot_in_use_amt: String,
    pub realized_pnl: String,
    pub settled_pnl: String,
    pub pnl: String,
    pub fee: String,
    pub funding_fee: String,
    pub liq_penalty: String,
    pub close_order_algo: Vec<CloseOrderAlgo>,
    pub c_time: String,
    pub u_time: String,
    pub biz_ref_id: String,
    pub biz_ref_type: String,
}

/// An open position tagged with the display currency and decoded timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    #[serde(flatten)]
    pub fields: PositionFields,
    pub currency: Currency,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionsResponse {
    pub positions: Vec<Position>,
    pub currency: Currency,
}

/// Exchange-reported fields of a closed (or partially closed) position.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PositionHistoryFields {
    pub inst_type: String,
    pub inst_id: String,
    pub mgn_mode: String,
    #[serde(rename = "type")]
    pub close_type: String,
    pub c_time: String,
    pub u_time: String,
    pub open_avg_px: String,
    pub non_settle_avg_px: String,
    pub close_avg_px: String,
    pub pos_id: String,
    pub open_max_pos: String,
    pub close_total_pos: String,
    pub realized_pnl: String,
    pub settled_pnl: String,
    pub pnl_ratio: String,
    pub fee: String,
    pub funding_fee: String,
    pub liq_penalty: String,
    pub pnl: String,
    pub pos_side: String,
    pub lever: String,
    pub direction: String,
    pub trigger_px: String,
    pub uly: String,
    pub ccy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionHistory {
    #[serde(flatten)]
    pub fields: PositionHistoryFields,
    pub currency: Currency,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

/// One page of position history.
///
/// `has_more` is a heuristic: it is set when the page came back full
/// (`PositionsHistoryRequest::MAX_PAGE_SIZE` rows). It is not a cursor and a
/// full final page will still report `true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionsHistoryResponse {
    pub positions: Vec<PositionHistory>,
    pub has_more: bool,
    pub currency: Currency,
}

/// Current state of one position together with its earlier history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionTimeline {
    pub pos_id: String,
    pub current_position: Option<Position>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_u_time: Option<String>,
    pub history: Vec<PositionHistory>,
    pub has_more: bool,
    pub currency: Currency,
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// A point-in-time price record, as pushed to stream subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceSnapshot {
    pub symbol: String,
    pub price: String,
    #[serde(default)]
    pub change24h: String,
    #[serde(default)]
    pub change_percent24h: String,
    #[serde(default)]
    pub volume24h: String,
    #[serde(default)]
    pub high24h: String,
    #[serde(default)]
    pub low24h: String,
    /// Unix seconds, local clock.
    pub timestamp: i64,
}

/// Instrument families accepted by the public instruments endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstrumentType {
    Spot,
    Margin,
    Swap,
    Futures,
    Option,
}

impl InstrumentType {
    pub fn code(&self) -> &'static str {
        match self {
            InstrumentType::Spot => "SPOT",
            InstrumentType::Margin => "MARGIN",
            InstrumentType::Swap => "SWAP",
            InstrumentType::Futures => "FUTURES",
            InstrumentType::Option => "OPTION",
        }
    }
}

impl FromStr for InstrumentType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SPOT" => Ok(InstrumentType::Spot),
            "MARGIN" => Ok(InstrumentType::Margin),
            "SWAP" => Ok(InstrumentType::Swap),
            "FUTURES" => Ok(InstrumentType::Futures),
            "OPTION" => Ok(InstrumentType::Option),
            other => Err(ModelError::UnsupportedInstrumentType(other.to_string())),
        }
    }
}

/// Tradeable instrument metadata, passed through from the exchange.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Instrument {
    pub inst_type: String,
    pub inst_id: String,
    pub inst_family: String,
    pub base_ccy: String,
    pub quote_ccy: String,
    pub settle_ccy: String,
    pub ct_val: String,
    pub ct_mult: String,
    pub ct_val_ccy: String,
    pub opt_type: String,
    pub stk: String,
    pub list_time: String,
    pub exp_time: String,
    pub tick_sz: String,
    pub lot_sz: String,
    pub min_sz: String,
    pub max_sz: String,
    pub uly: String,
    pub category: String,
    pub state: String,
}
