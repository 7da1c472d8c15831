//! OKX v5 adapter.
//!
//! Keeps request timestamps aligned with server time, signs private calls,
//! retries clock-skew rejections, and normalizes account, position and
//! market payloads into `alphaark-core` records with amounts converted into
//! the caller's display currency.

pub mod account;
pub mod clock;
pub mod config;
pub mod executor;
pub mod mapper;
pub mod price;
pub mod rates;
pub mod signer;
pub mod transport;
pub mod wire;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use alphaark_core::{Clock, HistoricalEquitySource, SystemClock, UnavailableEquitySource};

pub use account::AccountService;
pub use clock::ClockSync;
pub use config::{OkxConfig, RetryPolicy, SyncSettings};
pub use executor::{RequestExecutor, SignedRequestSpec};
pub use price::{PriceService, SymbolPriceSource};
pub use rates::{CurrencyConverter, OkxRateSource, RateSource, RateTable};
pub use signer::RequestSigner;
pub use transport::{HttpTransport, ReqwestTransport};

/// Every service wired to one transport, clock and configuration.
pub struct OkxServices {
    pub config: Arc<OkxConfig>,
    pub settings: SyncSettings,
    pub clock: Arc<ClockSync>,
    pub converter: Arc<CurrencyConverter>,
    pub account: Arc<AccountService>,
    pub prices: Arc<PriceService>,
}

impl OkxServices {
    pub fn new(config: OkxConfig, settings: SyncSettings) -> Self {
        Self::with_parts(
            config,
            settings,
            Arc::new(ReqwestTransport::new()),
            Arc::new(SystemClock),
            Arc::new(UnavailableEquitySource),
        )
    }

    pub fn with_parts(
        config: OkxConfig,
        settings: SyncSettings,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
        equity: Arc<dyn HistoricalEquitySource>,
    ) -> Self {
        let config = Arc::new(config);
        let base_url = config.base_url.clone();

        let clock_sync = Arc::new(ClockSync::new(
            transport.clone(),
            clock.clone(),
            base_url.clone(),
            &settings,
        ));
        let signer = RequestSigner::new(config.clone(), clock_sync.clone());
        let executor = RequestExecutor::new(
            transport.clone(),
            signer,
            base_url.clone(),
            settings.retry_policy(),
            settings.private_timeout(),
        );

        let rate_source = Arc::new(OkxRateSource::new(transport.clone(), base_url.clone(), &settings));
        let converter = Arc::new(CurrencyConverter::new(rate_source, clock.clone(), &settings));

        let account = Arc::new(AccountService::new(
            executor,
            converter.clone(),
            equity,
            clock.clone(),
        ));
        let prices = Arc::new(PriceService::new(
            transport,
            clock,
            base_url,
            settings.public_timeout(),
        ));

        Self {
            config,
            settings,
            clock: clock_sync,
            converter,
            account,
            prices,
        }
    }

    /// Price source for the configured stream instrument.
    pub fn stream_source(&self) -> SymbolPriceSource {
        self.prices.source_for(self.settings.stream_symbol.clone())
    }
}
