use std::sync::Arc;
use std::time::Duration;

use alphaark_core::*;
use async_trait::async_trait;

use crate::mapper;
use crate::rates::TICKER_PATH;
use crate::transport::{HttpRequest, HttpTransport};
use crate::wire::{fetch_public, RawTicker};

pub const INSTRUMENTS_PATH: &str = "/api/v5/public/instruments";

/// Public market data. Needs no credentials.
pub struct PriceService {
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
    base_url: String,
    timeout: Duration,
}

impl PriceService {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            clock,
            base_url: base_url.into(),
            timeout,
        }
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<String, ExchangeError> {
        let query = serde_urlencoded::to_string(query)
            .map_err(|e| ExchangeError::Decode(format!("Failed to encode query: {}", e)))?;
        Ok(format!("{}{}?{}", self.base_url, path, query))
    }

    pub async fn price(&self, symbol: &str) -> Result<PriceSnapshot, ExchangeError> {
        let url = self.url(TICKER_PATH, &[("instId", symbol)])?;
        let rows: Vec<RawTicker> =
            fetch_public(self.transport.as_ref(), HttpRequest::get(url, self.timeout)).await?;
        let ticker = rows
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::NotAvailable(format!("no price data for {}", symbol)))?;
        Ok(mapper::map_price_snapshot(symbol, ticker, self.clock.now()))
    }

    pub async fn instruments(&self, inst_type: InstrumentType) -> Result<Vec<Instrument>, ExchangeError> {
        let url = self.url(INSTRUMENTS_PATH, &[("instType", inst_type.code())])?;
        fetch_public(self.transport.as_ref(), HttpRequest::get(url, self.timeout)).await
    }

    /// A `PriceSource` bound to one instrument, for the price stream.
    pub fn source_for(self: &Arc<Self>, symbol: impl Into<String>) -> SymbolPriceSource {
        SymbolPriceSource {
            service: Arc::clone(self),
            symbol: symbol.into(),
        }
    }
}

pub struct SymbolPriceSource {
    service: Arc<PriceService>,
    symbol: String,
}

impl SymbolPriceSource {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }
}

#[async_trait]
impl PriceSource for SymbolPriceSource {
    async fn latest(&self) -> Result<PriceSnapshot, ExchangeError> {
        self.service.price(&self.symbol).await
    }
}
