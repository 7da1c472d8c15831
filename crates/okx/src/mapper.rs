//! Pure transformations from raw OKX payloads to normalized records.

use std::str::FromStr;

use alphaark_core::*;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::warn;

use crate::rates::{format_fixed, RateTable};
use crate::wire::{RawAccountBalance, RawPosition, RawPositionHistory, RawTicker};

/// Decode a millisecond epoch string, keeping millisecond precision.
pub fn decode_millis(raw: &str) -> Option<DateTime<Utc>> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
}

fn decode_or_epoch(raw: &str) -> DateTime<Utc> {
    decode_millis(raw).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Total equity is reported in USDT and converted into the display currency;
/// a failure there fails the whole mapping. Per-line equity failures only
/// zero that line.
pub fn map_account_balance(
    raw: RawAccountBalance,
    display: Currency,
    rates: &RateTable,
    now: DateTime<Utc>,
) -> Result<AccountBalance, ConversionError> {
    let total_equity = rates.convert(&raw.total_eq, Currency::Usdt.code(), display.code())?;

    let details = raw
        .details
        .into_iter()
        .filter(|d| !d.is_empty_line())
        .map(|d| {
            let equity = rates
                .convert(&d.bal, &d.ccy, display.code())
                .unwrap_or_else(|e| {
                    warn!(ccy = %d.ccy, error = %e, "Balance line could not be converted");
                    "0".to_string()
                });
            Balance {
                currency: d.ccy,
                balance: d.bal,
                available: d.avail_bal,
                frozen: d.frozen_bal,
                equity,
            }
        })
        .collect();

    Ok(AccountBalance {
        total_equity,
        currency: display,
        last_update_time: decode_millis(&raw.u_time).unwrap_or(now),
        details,
    })
}

pub fn map_position(raw: RawPosition, display: Currency) -> Position {
    Position {
        create_time: decode_or_epoch(&raw.c_time),
        update_time: decode_or_epoch(&raw.u_time),
        fields: raw,
        currency: display,
    }
}

pub fn map_positions(raw: Vec<RawPosition>, display: Currency) -> PositionsResponse {
    PositionsResponse {
        positions: raw.into_iter().map(|p| map_position(p, display)).collect(),
        currency: display,
    }
}

pub fn map_position_history(raw: RawPositionHistory, display: Currency) -> PositionHistory {
    PositionHistory {
        create_time: decode_or_epoch(&raw.c_time),
        update_time: decode_or_epoch(&raw.u_time),
        fields: raw,
        currency: display,
    }
}

pub fn map_positions_history(raw: Vec<RawPositionHistory>, display: Currency) -> PositionsHistoryResponse {
    let has_more = raw.len() == PositionsHistoryRequest::MAX_PAGE_SIZE;
    PositionsHistoryResponse {
        positions: raw
            .into_iter()
            .map(|p| map_position_history(p, display))
            .collect(),
        has_more,
        currency: display,
    }
}

/// Unparseable numbers count as zero; the 24h change is zero when there is
/// no opening price.
pub fn map_price_snapshot(symbol: &str, ticker: RawTicker, now: DateTime<Utc>) -> PriceSnapshot {
    let last = Decimal::from_str(&ticker.last).unwrap_or(Decimal::ZERO);
    let open = Decimal::from_str(&ticker.open24h).unwrap_or(Decimal::ZERO);
    let change = last - open;
    let change_percent = if open.is_zero() {
        Decimal::ZERO
    } else {
        change / open * Decimal::ONE_HUNDRED
    };

    PriceSnapshot {
        symbol: symbol.to_string(),
        price: ticker.last,
        change24h: format_fixed(change, 2),
        change_percent24h: format_fixed(change_percent, 2),
        volume24h: ticker.vol24h,
        high24h: ticker.high24h,
        low24h: ticker.low24h,
        timestamp: now.timestamp(),
    }
}
