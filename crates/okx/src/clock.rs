use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alphaark_core::{Clock, ExchangeError};
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::config::SyncSettings;
use crate::transport::{HttpRequest, HttpTransport};
use crate::wire::{fetch_public, RawServerTime};

pub const SERVER_TIME_PATH: &str = "/api/v5/public/time";

/// Offset between the exchange clock and the local clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClockState {
    /// `server - local`, in milliseconds.
    pub offset_millis: i64,
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// Keeps signed-request timestamps aligned with OKX server time.
///
/// A sync only hits the network once the cooldown has elapsed since the last
/// successful one. A failed sync leaves the previous offset in place.
/// Fetches are serialized; callers that queued behind a failed fetch share
/// its failure instead of repeating it.
pub struct ClockSync {
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
    base_url: String,
    cooldown: chrono::Duration,
    timeout: Duration,
    state: RwLock<ClockState>,
    refresh_gate: Mutex<()>,
    attempts: AtomicU64,
}

impl ClockSync {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
        base_url: impl Into<String>,
        settings: &SyncSettings,
    ) -> Self {
        Self {
            transport,
            clock,
            base_url: base_url.into(),
            cooldown: settings.clock_cooldown(),
            timeout: settings.time_timeout(),
            state: RwLock::new(ClockState::default()),
            refresh_gate: Mutex::new(()),
            attempts: AtomicU64::new(0),
        }
    }

    pub async fn state(&self) -> ClockState {
        *self.state.read().await
    }

    pub async fn offset_millis(&self) -> i64 {
        self.state.read().await.offset_millis
    }

    fn is_fresh(&self, state: &ClockState) -> bool {
        match state.last_sync_at {
            Some(at) => self.clock.now() - at < self.cooldown,
            None => false,
        }
    }

    /// Refresh the offset if the cooldown has elapsed.
    pub async fn sync(&self) -> Result<(), ExchangeError> {
        if self.is_fresh(&*self.state.read().await) {
            return Ok(());
        }

        let seen = self.attempts.load(Ordering::Acquire);
        let _gate = self.refresh_gate.lock().await;
        if self.is_fresh(&*self.state.read().await) {
            return Ok(());
        }
        if self.attempts.load(Ordering::Acquire) != seen {
            return Err(ExchangeError::Transport(
                "Server time unavailable, a concurrent sync just failed".to_string(),
            ));
        }

        let fetched = self.fetch_server_millis().await;
        self.attempts.fetch_add(1, Ordering::Release);
        let server_millis = fetched?;

        let now = self.clock.now();
        let mut state = self.state.write().await;
        state.offset_millis = server_millis - now.timestamp_millis();
        state.last_sync_at = Some(now);

        info!(offset_ms = state.offset_millis, "Clock synchronized with OKX server time");
        Ok(())
    }

    async fn fetch_server_millis(&self) -> Result<i64, ExchangeError> {
        let request = HttpRequest::get(format!("{}{}", self.base_url, SERVER_TIME_PATH), self.timeout);
        let rows: Vec<RawServerTime> = fetch_public(self.transport.as_ref(), request).await?;
        let row = rows
            .first()
            .ok_or_else(|| ExchangeError::Decode("Server time response has no data".to_string()))?;
        row.ts
            .parse::<i64>()
            .map_err(|e| ExchangeError::Decode(format!("Invalid server timestamp '{}': {}", row.ts, e)))
    }

    /// Current server-adjusted time, formatted for the `OK-ACCESS-TIMESTAMP` header.
    pub async fn timestamp(&self) -> String {
        if let Err(e) = self.sync().await {
            warn!(error = %e, "Clock sync failed, keeping previous offset");
        }
        let offset = self.offset_millis().await;
        format_timestamp(self.clock.now() + chrono::Duration::milliseconds(offset))
    }
}

/// ISO-8601 UTC with millisecond precision, e.g. `2024-01-15T08:00:00.123Z`.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;

    fn time_body(ms: i64) -> String {
        ok_envelope(&format!(r#"[{{"ts":"{ms}"}}]"#))
    }

    fn clock_sync(transport: &Arc<FakeTransport>, clock: &Arc<ManualClock>) -> ClockSync {
        ClockSync::new(
            transport.clone(),
            clock.clone(),
            TEST_BASE_URL,
            &SyncSettings::default(),
        )
    }

    #[test]
    fn test_format_timestamp_millis() {
        let at = DateTime::from_timestamp_millis(1_705_305_600_123).unwrap();
        assert_eq!(format_timestamp(at), "2024-01-15T08:00:00.123Z");
    }

    #[tokio::test]
    async fn test_sync_computes_offset() {
        let transport = FakeTransport::new();
        let clock = ManualClock::new();
        let local = clock.now().timestamp_millis();
        transport.push(SERVER_TIME_PATH, &time_body(local + 1_500));

        let sync = clock_sync(&transport, &clock);
        sync.sync().await.unwrap();

        assert_eq!(sync.offset_millis().await, 1_500);
        assert_eq!(sync.state().await.last_sync_at, Some(clock.now()));
        assert_eq!(sync.timestamp().await, "2024-01-15T08:00:01.500Z");
    }

    #[tokio::test]
    async fn test_sync_respects_cooldown() {
        let transport = FakeTransport::new();
        let clock = ManualClock::new();
        transport.always(SERVER_TIME_PATH, &time_body(clock.now().timestamp_millis()));
        let sync = clock_sync(&transport, &clock);

        sync.sync().await.unwrap();
        sync.sync().await.unwrap();
        clock.advance(chrono::Duration::minutes(4));
        sync.sync().await.unwrap();
        assert_eq!(transport.calls_to(SERVER_TIME_PATH), 1);

        clock.advance(chrono::Duration::minutes(1) + chrono::Duration::seconds(1));
        sync.sync().await.unwrap();
        assert_eq!(transport.calls_to(SERVER_TIME_PATH), 2);
    }

    #[tokio::test]
    async fn test_failed_sync_keeps_previous_offset() {
        let transport = FakeTransport::new();
        let clock = ManualClock::new();
        transport.push(SERVER_TIME_PATH, &time_body(clock.now().timestamp_millis() - 250));
        let sync = clock_sync(&transport, &clock);
        sync.sync().await.unwrap();

        clock.advance(chrono::Duration::minutes(10));
        transport.push_error(SERVER_TIME_PATH, ExchangeError::Transport("timed out".into()));
        assert!(sync.sync().await.is_err());
        assert_eq!(sync.offset_millis().await, -250);

        // timestamp() still produces a value with the stale offset
        transport.push(SERVER_TIME_PATH, "not json");
        let ts = sync.timestamp().await;
        assert!(ts.ends_with('Z'));
        assert_eq!(sync.offset_millis().await, -250);
    }

    struct SlowFailingTransport {
        calls: AtomicU64,
    }

    #[async_trait::async_trait]
    impl HttpTransport for SlowFailingTransport {
        async fn send(&self, _request: HttpRequest) -> Result<crate::transport::HttpResponse, ExchangeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err(ExchangeError::Transport("timed out".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_failed_fetch() {
        let transport = Arc::new(SlowFailingTransport { calls: AtomicU64::new(0) });
        let clock = ManualClock::new();
        let sync = ClockSync::new(transport.clone(), clock.clone(), TEST_BASE_URL, &SyncSettings::default());

        let started = tokio::time::Instant::now();
        let (a, b, c, d) = tokio::join!(sync.timestamp(), sync.timestamp(), sync.timestamp(), sync.timestamp());
        let waited = started.elapsed();

        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert!(waited < Duration::from_secs(10), "waited {waited:?}");
        for ts in [a, b, c, d] {
            assert_eq!(ts, "2024-01-15T08:00:00.000Z");
        }

        // A later caller retries on its own.
        assert!(sync.sync().await.is_err());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
        assert_eq!(sync.state().await.last_sync_at, None);
    }

    #[tokio::test]
    async fn test_never_synced_uses_zero_offset() {
        let transport = FakeTransport::new();
        let clock = ManualClock::new();
        let sync = clock_sync(&transport, &clock);
        assert_eq!(sync.timestamp().await, "2024-01-15T08:00:00.000Z");
        assert_eq!(sync.state().await.last_sync_at, None);
    }
}
