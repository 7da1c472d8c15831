//! Scripted collaborators shared by the unit tests of this crate.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use alphaark_core::{Clock, ExchangeError};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;

use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

pub const TEST_BASE_URL: &str = "https://okx.test";

/// Replies are keyed by URL path (query stripped, test base URL stripped).
/// Queued replies are consumed first; the sticky reply answers afterwards.
#[derive(Default)]
pub struct FakeTransport {
    queued: Mutex<HashMap<String, VecDeque<Result<HttpResponse, ExchangeError>>>>,
    sticky: Mutex<HashMap<String, HttpResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, path: &str, body: &str) {
        self.push_result(path, Ok(ok_response(body)));
    }

    pub fn push_error(&self, path: &str, err: ExchangeError) {
        self.push_result(path, Err(err));
    }

    pub fn always(&self, path: &str, body: &str) {
        self.sticky.lock().insert(path.to_string(), ok_response(body));
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| route_of(&r.url) == path)
            .count()
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    fn push_result(&self, path: &str, result: Result<HttpResponse, ExchangeError>) {
        self.queued
            .lock()
            .entry(path.to_string())
            .or_default()
            .push_back(result);
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ExchangeError> {
        let route = route_of(&request.url);
        self.requests.lock().push(request);

        if let Some(reply) = self.queued.lock().get_mut(&route).and_then(|q| q.pop_front()) {
            return reply;
        }
        self.sticky
            .lock()
            .get(&route)
            .cloned()
            .ok_or_else(|| ExchangeError::Transport(format!("no scripted reply for {route}")))
    }
}

fn route_of(url: &str) -> String {
    let without_query = url.split('?').next().unwrap_or(url);
    without_query
        .strip_prefix(TEST_BASE_URL)
        .unwrap_or(without_query)
        .to_string()
}

fn ok_response(body: &str) -> HttpResponse {
    HttpResponse {
        status: 200,
        body: body.to_string(),
    }
}

/// Envelope with `code = "0"` around the given JSON array body.
pub fn ok_envelope(data: &str) -> String {
    format!(r#"{{"code":"0","msg":"","data":{data}}}"#)
}

pub fn error_envelope(code: &str, msg: &str) -> String {
    format!(r#"{{"code":"{code}","msg":"{msg}","data":[]}}"#)
}

/// Local clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Self::at(Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap())
    }

    pub fn at(now: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(now),
        })
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Rate source that always answers with the same table.
pub struct StaticRateSource(pub crate::rates::RateTable);

#[async_trait]
impl crate::rates::RateSource for StaticRateSource {
    async fn fetch_rates(&self) -> Result<crate::rates::RateTable, ExchangeError> {
        Ok(self.0.clone())
    }
}

/// BTC at 43500 USDT, USDT and USD at 7.30 CNY.
pub fn golden_rates() -> crate::rates::RateTable {
    use rust_decimal_macros::dec;
    crate::rates::RateTable::new()
        .with_rate("BTC", "USDT", dec!(43500))
        .with_rate("USD", "USDT", dec!(1))
        .with_rate("USDT", "CNY", dec!(7.30))
        .with_rate("USD", "CNY", dec!(7.30))
}

/// Server time reply matching the given clock, so the offset stays zero.
pub fn script_server_time(transport: &FakeTransport, clock: &ManualClock) {
    transport.always(
        crate::clock::SERVER_TIME_PATH,
        &ok_envelope(&format!(r#"[{{"ts":"{}"}}]"#, clock.now().timestamp_millis())),
    );
}
