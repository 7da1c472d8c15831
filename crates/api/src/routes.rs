use crate::error::{ApiError, ApiResponse};
use crate::state::AppState;
use alphaark_core::*;
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

type Shared = State<Arc<AppState>>;

pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Account
        .route("/account/balance", get(balance))
        .route("/account/balance/{currency}", get(balance_in))
        .route("/account/profit-loss", get(profit_loss))
        .route("/account/summary", get(summary))
        .route("/account/summary/{currency}", get(summary_in))
        .route("/account/currency", get(default_currency).post(set_default_currency))
        .route("/account/currencies", get(supported_currencies))
        .route("/account/exchange-rates", get(exchange_rates))
        // Positions
        .route("/account/positions", get(positions))
        .route("/account/positions-history", get(positions_history))
        .route("/account/positions/{pos_id}/history", get(position_timeline))
        // Market data
        .route("/price/{symbol}", get(price))
        .route("/okx/instruments", get(instruments))
        .route("/okx/instruments/{inst_type}", get(instruments_of))
        .route("/okx/config", get(okx_config))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Explicit currency if given, the account default otherwise.
fn resolve_currency(state: &AppState, requested: Option<&str>) -> Result<Currency, ApiError> {
    match requested.filter(|c| !c.trim().is_empty()) {
        Some(code) => Ok(code.parse::<Currency>()?),
        None => Ok(state.account.default_currency()),
    }
}

#[derive(Debug, Serialize)]
struct CurrencyInfo {
    currency: Currency,
    symbol: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'static str>,
}

impl CurrencyInfo {
    fn short(currency: Currency) -> Self {
        Self {
            currency,
            symbol: currency.symbol(),
            name: None,
        }
    }

    fn full(currency: Currency) -> Self {
        Self {
            name: Some(currency.display_name()),
            ..Self::short(currency)
        }
    }
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

async fn balance(State(state): Shared) -> Result<impl IntoResponse, ApiError> {
    let currency = state.account.default_currency();
    fetch_balance(&state, currency).await
}

async fn balance_in(State(state): Shared, Path(currency): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let currency = currency.parse::<Currency>()?;
    fetch_balance(&state, currency).await
}

async fn fetch_balance(state: &AppState, currency: Currency) -> Result<Json<ApiResponse<AccountBalance>>, ApiError> {
    let balance = state
        .account
        .account_balance(currency)
        .await
        .map_err(ApiError::upstream("Failed to fetch account balance"))?;
    Ok(ApiResponse::ok(balance, "Account balance retrieved"))
}

#[derive(Debug, Default, Deserialize)]
struct ProfitLossQuery {
    currency: Option<String>,
    periods: Option<String>,
}

async fn profit_loss(
    State(state): Shared,
    Query(query): Query<ProfitLossQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let currency = resolve_currency(&state, query.currency.as_deref())?;
    let periods = TimePeriod::parse_list(query.periods.as_deref().unwrap_or(""));
    let result = state
        .account
        .profit_loss(currency, &periods)
        .await
        .map_err(ApiError::upstream("Failed to compute profit/loss"))?;
    Ok(ApiResponse::ok(result, "Profit/loss retrieved"))
}

async fn summary(State(state): Shared) -> Result<impl IntoResponse, ApiError> {
    let currency = state.account.default_currency();
    fetch_summary(&state, currency).await
}

async fn summary_in(State(state): Shared, Path(currency): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let currency = currency.parse::<Currency>()?;
    fetch_summary(&state, currency).await
}

async fn fetch_summary(state: &AppState, currency: Currency) -> Result<Json<ApiResponse<AccountSummary>>, ApiError> {
    let summary = state
        .account
        .account_summary(currency)
        .await
        .map_err(ApiError::upstream("Failed to fetch account summary"))?;
    Ok(ApiResponse::ok(summary, "Account summary retrieved"))
}

async fn default_currency(State(state): Shared) -> impl IntoResponse {
    ApiResponse::ok(
        CurrencyInfo::short(state.account.default_currency()),
        "Default currency retrieved",
    )
}

#[derive(Debug, Deserialize)]
struct SetCurrencyRequest {
    currency: String,
}

async fn set_default_currency(
    State(state): Shared,
    Json(req): Json<SetCurrencyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let currency = req.currency.parse::<Currency>()?;
    state.account.set_default_currency(currency);
    Ok(ApiResponse::ok(CurrencyInfo::short(currency), "Default currency updated"))
}

async fn supported_currencies() -> impl IntoResponse {
    let list: Vec<CurrencyInfo> = Currency::supported().into_iter().map(CurrencyInfo::full).collect();
    ApiResponse::ok(list, "Supported currencies retrieved")
}

async fn exchange_rates(State(state): Shared) -> Result<impl IntoResponse, ApiError> {
    let table = state
        .account
        .exchange_rates()
        .await
        .map_err(ApiError::upstream("Failed to fetch exchange rates"))?;
    Ok(ApiResponse::ok(table.rates, "Exchange rates retrieved"))
}

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionsQuery {
    inst_type: Option<String>,
    inst_id: Option<String>,
    pos_id: Option<String>,
    currency: Option<String>,
}

async fn positions(
    State(state): Shared,
    Query(query): Query<PositionsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let currency = resolve_currency(&state, query.currency.as_deref())?;
    let request = PositionsRequest {
        inst_type: query.inst_type,
        inst_id: query.inst_id,
        pos_id: query.pos_id,
    };
    let result = state
        .account
        .positions(&request, currency)
        .await
        .map_err(ApiError::upstream("Failed to fetch positions"))?;
    Ok(ApiResponse::ok(result, "Positions retrieved"))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionsHistoryQuery {
    inst_type: Option<String>,
    inst_id: Option<String>,
    mgn_mode: Option<String>,
    #[serde(rename = "type")]
    close_type: Option<String>,
    pos_id: Option<String>,
    after: Option<String>,
    before: Option<String>,
    limit: Option<String>,
    currency: Option<String>,
    from_current_positions: Option<String>,
}

async fn positions_history(
    State(state): Shared,
    Query(query): Query<PositionsHistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let currency = resolve_currency(&state, query.currency.as_deref())?;
    let anchored = query.from_current_positions.as_deref() == Some("true");
    let request = PositionsHistoryRequest {
        inst_type: query.inst_type,
        inst_id: query.inst_id,
        mgn_mode: query.mgn_mode,
        close_type: query.close_type,
        pos_id: query.pos_id,
        after: query.after,
        before: query.before,
        limit: query.limit,
    };

    let result = if anchored {
        state.account.positions_history_from_current(&request, currency).await
    } else {
        state.account.positions_history(&request, currency).await
    }
    .map_err(ApiError::upstream("Failed to fetch position history"))?;
    Ok(ApiResponse::ok(result, "Position history retrieved"))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimelineQuery {
    currency: Option<String>,
    limit: Option<String>,
    include_current: Option<String>,
}

async fn position_timeline(
    State(state): Shared,
    Path(pos_id): Path<String>,
    Query(query): Query<TimelineQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if pos_id.trim().is_empty() {
        return Err(ApiError::BadRequest("Position id must not be empty".to_string()));
    }
    let currency = resolve_currency(&state, query.currency.as_deref())?;
    let include_current = query.include_current.as_deref() == Some("true");
    let timeline = state
        .account
        .position_timeline(&pos_id, currency, query.limit, include_current)
        .await
        .map_err(ApiError::upstream("Failed to fetch position timeline"))?;
    Ok(ApiResponse::ok(timeline, "Position timeline retrieved"))
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

async fn price(State(state): Shared, Path(symbol): Path<String>) -> Result<impl IntoResponse, ApiError> {
    if symbol.trim().is_empty() {
        return Err(ApiError::BadRequest("Symbol must not be empty".to_string()));
    }
    let snapshot = state
        .prices
        .price(&symbol)
        .await
        .map_err(ApiError::upstream("Failed to fetch price"))?;
    Ok(ApiResponse::ok(snapshot, "Price retrieved"))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstrumentsQuery {
    inst_type: Option<String>,
}

async fn instruments(
    State(state): Shared,
    Query(query): Query<InstrumentsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let inst_type = query.inst_type.as_deref().unwrap_or("SPOT").parse::<InstrumentType>()?;
    fetch_instruments(&state, inst_type).await
}

async fn instruments_of(
    State(state): Shared,
    Path(inst_type): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let inst_type = inst_type.parse::<InstrumentType>()?;
    fetch_instruments(&state, inst_type).await
}

async fn fetch_instruments(
    state: &AppState,
    inst_type: InstrumentType,
) -> Result<Json<ApiResponse<Vec<Instrument>>>, ApiError> {
    let list = state
        .prices
        .instruments(inst_type)
        .await
        .map_err(ApiError::upstream("Failed to fetch instruments"))?;
    Ok(ApiResponse::ok(list, format!("{} instruments retrieved", inst_type.code())))
}

/// Non-sensitive view of the exchange configuration.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SafeConfig {
    remark: String,
    permissions: String,
    base_url: String,
    is_test: bool,
    has_api_key: bool,
    has_secret_key: bool,
    has_passphrase: bool,
}

async fn okx_config(State(state): Shared) -> impl IntoResponse {
    let config = &state.config;
    let missing = config.missing_credentials();
    let view = SafeConfig {
        remark: config.remark.clone(),
        permissions: config.permissions.clone(),
        base_url: config.base_url.clone(),
        is_test: config.is_test,
        has_api_key: !missing.contains(&"api_key"),
        has_secret_key: !missing.contains(&"secret_key"),
        has_passphrase: !missing.contains(&"passphrase"),
    };
    ApiResponse::ok(view, "OKX configuration retrieved")
}
