use std::str::FromStr;
use std::sync::Arc;

use alphaark_core::*;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::executor::{RequestExecutor, SignedRequestSpec};
use crate::mapper;
use crate::rates::{format_fixed, CurrencyConverter, RateTable};
use crate::wire::{RawAccountBalance, RawPosition, RawPositionHistory};

pub const BALANCE_PATH: &str = "/api/v5/account/balance";
pub const POSITIONS_PATH: &str = "/api/v5/account/positions";
pub const POSITIONS_HISTORY_PATH: &str = "/api/v5/account/positions-history";

/// Account-level reads: balances, profit/loss, positions.
pub struct AccountService {
    executor: RequestExecutor,
    converter: Arc<CurrencyConverter>,
    equity: Arc<dyn HistoricalEquitySource>,
    clock: Arc<dyn Clock>,
    default_currency: RwLock<Currency>,
}

impl AccountService {
    pub fn new(
        executor: RequestExecutor,
        converter: Arc<CurrencyConverter>,
        equity: Arc<dyn HistoricalEquitySource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            executor,
            converter,
            equity,
            clock,
            default_currency: RwLock::new(Currency::Usdt),
        }
    }

    pub fn default_currency(&self) -> Currency {
        *self.default_currency.read()
    }

    pub fn set_default_currency(&self, currency: Currency) {
        *self.default_currency.write() = currency;
        info!(%currency, "Default display currency changed");
    }

    /// Refresh the rate table and return a copy of it.
    pub async fn exchange_rates(&self) -> Result<RateTable, ExchangeError> {
        self.converter.refresh_rates().await?;
        Ok(self.converter.snapshot())
    }

    // -----------------------------------------------------------------------
    // Balance & P/L
    // -----------------------------------------------------------------------

    pub async fn account_balance(&self, currency: Currency) -> Result<AccountBalance, ExchangeError> {
        self.executor.ensure_credentials()?;

        // A stale table is still usable; an empty one fails at conversion.
        if let Err(e) = self.converter.refresh_rates().await {
            warn!(error = %e, "Continuing balance request without fresh rates");
        }

        let rows: Vec<RawAccountBalance> = self
            .executor
            .execute(&SignedRequestSpec::get(BALANCE_PATH))
            .await?;
        let raw = rows.into_iter().next().ok_or_else(|| {
            ExchangeError::NotAvailable(
                "no account data returned; check API key permissions and account status".to_string(),
            )
        })?;

        let table = self.converter.snapshot();
        Ok(mapper::map_account_balance(raw, currency, &table, self.clock.now())?)
    }

    pub async fn profit_loss(
        &self,
        currency: Currency,
        periods: &[TimePeriod],
    ) -> Result<Vec<ProfitLoss>, ExchangeError> {
        let balance = self.account_balance(currency).await?;
        Ok(self.profit_loss_from(&balance, periods).await)
    }

    /// Periods whose starting equity is unknown are left out.
    async fn profit_loss_from(&self, balance: &AccountBalance, periods: &[TimePeriod]) -> Vec<ProfitLoss> {
        let current = Decimal::from_str(&balance.total_equity).unwrap_or(Decimal::ZERO);
        let end = self.clock.now();
        let mut results = Vec::with_capacity(periods.len());

        for &period in periods {
            let historical = match self.equity.equity_at_period_start(balance.currency, period).await {
                Ok(value) => value,
                Err(e) => {
                    info!(%period, reason = %e, "Skipping P/L period");
                    continue;
                }
            };

            let profit = current - historical;
            let percent = if historical.is_zero() {
                Decimal::ZERO
            } else {
                profit / historical * Decimal::ONE_HUNDRED
            };

            results.push(ProfitLoss {
                period,
                profit_amount: format_fixed(profit, 2),
                profit_percent: format_fixed(percent, 2),
                currency: balance.currency,
                is_profit: profit >= Decimal::ZERO,
                start_time: end - period.duration(),
                end_time: end,
            });
        }
        results
    }

    /// Balance plus P/L over every supported period.
    pub async fn account_summary(&self, currency: Currency) -> Result<AccountSummary, ExchangeError> {
        let balance = self.account_balance(currency).await?;
        let profit_loss = self.profit_loss_from(&balance, &TimePeriod::supported()).await;
        Ok(AccountSummary {
            balance,
            profit_loss,
            currency,
            update_time: self.clock.now(),
        })
    }

    // -----------------------------------------------------------------------
    // Positions
    // -----------------------------------------------------------------------

    pub async fn positions(
        &self,
        request: &PositionsRequest,
        currency: Currency,
    ) -> Result<PositionsResponse, ExchangeError> {
        let spec = SignedRequestSpec::get(POSITIONS_PATH).with_query(request.query_params());
        let rows: Vec<RawPosition> = self.executor.execute(&spec).await?;
        Ok(mapper::map_positions(rows, currency))
    }

    pub async fn positions_history(
        &self,
        request: &PositionsHistoryRequest,
        currency: Currency,
    ) -> Result<PositionsHistoryResponse, ExchangeError> {
        let spec = SignedRequestSpec::get(POSITIONS_HISTORY_PATH).with_query(request.query_params());
        let rows: Vec<RawPositionHistory> = self.executor.execute(&spec).await?;
        Ok(mapper::map_positions_history(rows, currency))
    }

    /// History anchored at the most recent open position: when no `before`
    /// cursor is given, the first open position's update time is used.
    /// Failing to read open positions only drops the anchor.
    pub async fn positions_history_from_current(
        &self,
        request: &PositionsHistoryRequest,
        currency: Currency,
    ) -> Result<PositionsHistoryResponse, ExchangeError> {
        let mut request = request.clone();

        if request.before.as_deref().unwrap_or("").is_empty() {
            let current = PositionsRequest {
                inst_type: request.inst_type.clone(),
                inst_id: request.inst_id.clone(),
                pos_id: None,
            };
            match self.positions(&current, currency).await {
                Ok(open) => {
                    if let Some(first) = open.positions.first() {
                        request.before = Some(first.fields.u_time.clone());
                    }
                }
                Err(e) => warn!(error = %e, "Could not read open positions to anchor history"),
            }
        }

        self.positions_history(&request, currency).await
    }

    /// Current state of one position plus its history.
    ///
    /// With `include_current` false, history is limited to records older than
    /// the current position's last update.
    pub async fn position_timeline(
        &self,
        pos_id: &str,
        currency: Currency,
        limit: Option<String>,
        include_current: bool,
    ) -> Result<PositionTimeline, ExchangeError> {
        let current = self
            .positions(
                &PositionsRequest {
                    pos_id: Some(pos_id.to_string()),
                    ..Default::default()
                },
                currency,
            )
            .await?;
        let current_position = current.positions.into_iter().next();
        let current_u_time = current_position.as_ref().map(|p| p.fields.u_time.clone());

        let mut history_request = PositionsHistoryRequest {
            pos_id: Some(pos_id.to_string()),
            limit: limit.filter(|l| !l.is_empty()),
            ..Default::default()
        };
        if !include_current {
            history_request.before = current_u_time.clone();
        }

        let history = self.positions_history(&history_request, currency).await?;

        Ok(PositionTimeline {
            pos_id: pos_id.to_string(),
            current_position,
            current_u_time,
            history: history.positions,
            has_more: history.has_more,
            currency,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockSync;
    use crate::config::{OkxConfig, SyncSettings};
    use crate::signer::RequestSigner;
    use crate::testing::*;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    const BALANCE_BODY: &str = r#"[{"totalEq":"100","uTime":"1705305600000","details":[
        {"ccy":"BTC","bal":"0.001","availBal":"0.001","frozenBal":"0"},
        {"ccy":"ETH","bal":"0","availBal":"0","frozenBal":"0"}]}]"#;

    struct OneDayEquity(Decimal);

    #[async_trait]
    impl HistoricalEquitySource for OneDayEquity {
        async fn equity_at_period_start(
            &self,
            _currency: Currency,
            period: TimePeriod,
        ) -> Result<Decimal, EquityError> {
            match period {
                TimePeriod::OneDay => Ok(self.0),
                _ => Err(EquityError::NotAvailable {
                    period,
                    reason: "not recorded".into(),
                }),
            }
        }
    }

    fn service_with(transport: &Arc<FakeTransport>, equity: Arc<dyn HistoricalEquitySource>) -> AccountService {
        let settings = SyncSettings::default();
        let clock = ManualClock::new();
        script_server_time(transport, &clock);

        let sync = Arc::new(ClockSync::new(transport.clone(), clock.clone(), TEST_BASE_URL, &settings));
        let signer = RequestSigner::new(Arc::new(OkxConfig::new("key", "secret", "pass")), sync);
        let executor = RequestExecutor::new(
            transport.clone(),
            signer,
            TEST_BASE_URL,
            settings.retry_policy(),
            settings.private_timeout(),
        );
        let converter = Arc::new(CurrencyConverter::new(
            Arc::new(StaticRateSource(golden_rates())),
            clock.clone(),
            &settings,
        ));
        AccountService::new(executor, converter, equity, clock)
    }

    fn service(transport: &Arc<FakeTransport>) -> AccountService {
        service_with(transport, Arc::new(UnavailableEquitySource))
    }

    fn position_body(pos_id: &str, u_time: &str) -> String {
        ok_envelope(&format!(
            r#"[{{"instId":"BTC-USDT-SWAP","posId":"{pos_id}","cTime":"1700000000000","uTime":"{u_time}"}}]"#
        ))
    }

    #[tokio::test]
    async fn test_balance_in_cny() {
        let transport = FakeTransport::new();
        transport.push(BALANCE_PATH, &ok_envelope(BALANCE_BODY));
        let svc = service(&transport);

        let balance = svc.account_balance(Currency::Cny).await.unwrap();
        assert_eq!(balance.total_equity, "730.00");
        assert_eq!(balance.details.len(), 1);
        assert_eq!(balance.details[0].currency, "BTC");
        assert_eq!(balance.details[0].equity, "317.55");
    }

    #[tokio::test]
    async fn test_balance_empty_data_is_not_available() {
        let transport = FakeTransport::new();
        transport.push(BALANCE_PATH, &ok_envelope("[]"));
        let err = service(&transport).account_balance(Currency::Usdt).await.unwrap_err();
        assert!(matches!(err, ExchangeError::NotAvailable(_)));
    }

    #[tokio::test]
    async fn test_profit_loss_skips_unknown_periods() {
        let transport = FakeTransport::new();
        transport.push(BALANCE_PATH, &ok_envelope(BALANCE_BODY));
        let svc = service_with(&transport, Arc::new(OneDayEquity(dec!(700))));

        let pl = svc
            .profit_loss(Currency::Cny, &[TimePeriod::OneDay, TimePeriod::OneWeek])
            .await
            .unwrap();
        assert_eq!(pl.len(), 1);
        assert_eq!(pl[0].period, TimePeriod::OneDay);
        assert_eq!(pl[0].profit_amount, "30.00");
        assert_eq!(pl[0].profit_percent, "4.29");
        assert!(pl[0].is_profit);
        assert_eq!(pl[0].end_time - pl[0].start_time, chrono::Duration::days(1));
    }

    #[tokio::test]
    async fn test_summary_without_history_has_no_pl() {
        let transport = FakeTransport::new();
        transport.push(BALANCE_PATH, &ok_envelope(BALANCE_BODY));
        let summary = service(&transport).account_summary(Currency::Usdt).await.unwrap();
        assert_eq!(summary.balance.total_equity, "100");
        assert!(summary.profit_loss.is_empty());
        assert_eq!(transport.calls_to(BALANCE_PATH), 1);
    }

    #[tokio::test]
    async fn test_history_from_current_anchors_before() {
        let transport = FakeTransport::new();
        transport.push(POSITIONS_PATH, &position_body("42", "1700000005000"));
        transport.push(POSITIONS_HISTORY_PATH, &ok_envelope("[]"));
        let svc = service(&transport);

        let request = PositionsHistoryRequest {
            inst_type: Some("SWAP".into()),
            ..Default::default()
        };
        let page = svc.positions_history_from_current(&request, Currency::Usdt).await.unwrap();
        assert!(page.positions.is_empty());
        assert!(!page.has_more);

        let sent = transport
            .requests()
            .into_iter()
            .find(|r| r.url.contains(POSITIONS_HISTORY_PATH))
            .unwrap();
        assert!(sent.url.contains("instType=SWAP"));
        assert!(sent.url.contains("before=1700000005000"));
        assert!(sent.url.contains("limit=100"));
    }

    #[tokio::test]
    async fn test_timeline_excludes_current_by_default() {
        let transport = FakeTransport::new();
        transport.push(POSITIONS_PATH, &position_body("42", "1700000009000"));
        transport.push(
            POSITIONS_HISTORY_PATH,
            &ok_envelope(r#"[{"posId":"42","uTime":"1700000001000","pnl":"12.5"}]"#),
        );
        let svc = service(&transport);

        let timeline = svc
            .position_timeline("42", Currency::Usdt, Some("20".into()), false)
            .await
            .unwrap();
        assert_eq!(timeline.pos_id, "42");
        assert_eq!(timeline.current_u_time.as_deref(), Some("1700000009000"));
        assert_eq!(timeline.history.len(), 1);
        assert_eq!(timeline.history[0].fields.pnl, "12.5");

        let urls: Vec<String> = transport.requests().into_iter().map(|r| r.url).collect();
        assert!(urls.iter().any(|u| u.ends_with("/api/v5/account/positions?posId=42")));
        assert!(urls
            .iter()
            .any(|u| u.contains("posId=42&before=1700000009000&limit=20")));
    }

    #[tokio::test]
    async fn test_default_currency_round_trip() {
        let svc = service(&FakeTransport::new());
        assert_eq!(svc.default_currency(), Currency::Usdt);
        svc.set_default_currency(Currency::Btc);
        assert_eq!(svc.default_currency(), Currency::Btc);
    }

    #[tokio::test]
    async fn test_exchange_rates_refreshes_table() {
        let svc = service(&FakeTransport::new());
        let table = svc.exchange_rates().await.unwrap();
        assert_eq!(table.get("BTC", "USDT"), Some(dec!(43500)));
        assert!(table.updated_at.is_some());
    }
}
