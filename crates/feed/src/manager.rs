use std::collections::HashMap;
use std::sync::Arc;

use alphaark_core::PriceSource;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{Subscriber, SubscriberError};

pub type SubscriberId = Uuid;

const COMMAND_CAPACITY: usize = 64;
const BROADCAST_CAPACITY: usize = 64;

enum Command {
    Register {
        id: SubscriberId,
        subscriber: Box<dyn Subscriber>,
    },
    Unregister(SubscriberId),
    /// First snapshot for one subscriber. `None` when the fetch failed.
    Prime {
        id: SubscriberId,
        payload: Option<String>,
    },
    Count(oneshot::Sender<usize>),
}

struct Entry {
    sink: Box<dyn Subscriber>,
    /// Set once the registration snapshot has been handled; broadcasts
    /// skip the entry until then.
    primed: bool,
}

/// Owns the subscriber set. Run it with [`BroadcastManager::run`].
pub struct BroadcastManager {
    subscribers: HashMap<SubscriberId, Entry>,
    commands: mpsc::Receiver<Command>,
    broadcasts: mpsc::Receiver<String>,
}

impl BroadcastManager {
    pub fn new(source: Arc<dyn PriceSource>) -> (Self, BroadcastHandle) {
        Self::with_capacity(source, BROADCAST_CAPACITY)
    }

    pub fn with_capacity(source: Arc<dyn PriceSource>, capacity: usize) -> (Self, BroadcastHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(capacity.max(1));
        let manager = Self {
            subscribers: HashMap::new(),
            commands: command_rx,
            broadcasts: broadcast_rx,
        };
        let handle = BroadcastHandle {
            commands: command_tx,
            broadcasts: broadcast_tx,
            source,
        };
        (manager, handle)
    }

    /// Build and spawn the control loop on the current runtime.
    pub fn spawn(source: Arc<dyn PriceSource>) -> BroadcastHandle {
        let (manager, handle) = Self::new(source);
        tokio::spawn(manager.run());
        handle
    }

    /// Process commands and broadcasts until every handle is dropped.
    pub async fn run(mut self) {
        info!("Broadcast manager started");
        loop {
            tokio::select! {
                // Membership changes first, so a removal is never overtaken
                // by a queued broadcast.
                biased;
                command = self.commands.recv() => match command {
                    Some(command) => self.apply(command).await,
                    None => break,
                },
                payload = self.broadcasts.recv() => match payload {
                    Some(payload) => self.fan_out(&payload).await,
                    None => break,
                },
            }
        }

        for (_, mut entry) in self.subscribers.drain() {
            entry.sink.close().await;
        }
        info!("Broadcast manager stopped");
    }

    async fn apply(&mut self, command: Command) {
        match command {
            Command::Register { id, subscriber } => {
                self.subscribers.insert(
                    id,
                    Entry {
                        sink: subscriber,
                        primed: false,
                    },
                );
                info!(%id, subscribers = self.subscribers.len(), "Subscriber registered");
            }
            Command::Unregister(id) => {
                if let Some(mut entry) = self.subscribers.remove(&id) {
                    entry.sink.close().await;
                    info!(%id, subscribers = self.subscribers.len(), "Subscriber unregistered");
                }
            }
            Command::Prime { id, payload } => {
                let Some(entry) = self.subscribers.get_mut(&id) else {
                    return;
                };
                entry.primed = true;
                if let Some(payload) = payload {
                    if let Err(e) = entry.sink.send(&payload).await {
                        self.drop_subscriber(id, e).await;
                    }
                }
            }
            Command::Count(reply) => {
                let _ = reply.send(self.subscribers.len());
            }
        }
    }

    async fn fan_out(&mut self, payload: &str) {
        let mut failed = Vec::new();
        for (id, entry) in self.subscribers.iter_mut() {
            if !entry.primed {
                continue;
            }
            if let Err(e) = entry.sink.send(payload).await {
                failed.push((*id, e));
            }
        }
        for (id, err) in failed {
            self.drop_subscriber(id, err).await;
        }
    }

    async fn drop_subscriber(&mut self, id: SubscriberId, err: SubscriberError) {
        if let Some(mut entry) = self.subscribers.remove(&id) {
            warn!(%id, error = %err, "Removing subscriber after write failure");
            entry.sink.close().await;
        }
    }
}

/// Cloneable front door to a running [`BroadcastManager`].
#[derive(Clone)]
pub struct BroadcastHandle {
    commands: mpsc::Sender<Command>,
    broadcasts: mpsc::Sender<String>,
    source: Arc<dyn PriceSource>,
}

impl BroadcastHandle {
    /// Add a subscriber. Its first message is the latest snapshot, fetched
    /// in the background; it receives no broadcast before that.
    pub async fn register(&self, subscriber: Box<dyn Subscriber>) -> Result<SubscriberId, SubscriberError> {
        let id = Uuid::new_v4();
        self.commands
            .send(Command::Register { id, subscriber })
            .await
            .map_err(|_| SubscriberError::ManagerStopped)?;

        let source = Arc::clone(&self.source);
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let payload = match source.latest().await {
                Ok(snapshot) => match serde_json::to_string(&snapshot) {
                    Ok(json) => Some(json),
                    Err(e) => {
                        warn!(%id, error = %e, "Failed to serialize initial snapshot");
                        None
                    }
                },
                Err(e) => {
                    warn!(%id, error = %e, "Initial snapshot unavailable");
                    None
                }
            };
            let _ = commands.send(Command::Prime { id, payload }).await;
        });

        Ok(id)
    }

    /// Remove a subscriber. Unknown ids are ignored.
    pub async fn unregister(&self, id: SubscriberId) {
        if self.commands.send(Command::Unregister(id)).await.is_err() {
            debug!(%id, "Unregister after manager stopped");
        }
    }

    /// Queue a payload for every subscriber. Returns `false` when the
    /// channel is full or the manager is gone; the payload is dropped.
    pub fn try_broadcast(&self, payload: String) -> bool {
        match self.broadcasts.try_send(payload) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Broadcast channel full, dropping tick");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub async fn subscriber_count(&self) -> Result<usize, SubscriberError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Count(tx))
            .await
            .map_err(|_| SubscriberError::ManagerStopped)?;
        rx.await.map_err(|_| SubscriberError::ManagerStopped)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use alphaark_core::{ExchangeError, PriceSnapshot};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    pub(crate) struct FixedSource;

    #[async_trait]
    impl PriceSource for FixedSource {
        async fn latest(&self) -> Result<PriceSnapshot, ExchangeError> {
            Ok(PriceSnapshot {
                symbol: "BTC-USDT".to_string(),
                price: "43500".to_string(),
                change24h: String::new(),
                change_percent24h: String::new(),
                volume24h: String::new(),
                high24h: String::new(),
                low24h: String::new(),
                timestamp: 1_705_305_600,
            })
        }
    }

    struct FailingSource;

    #[async_trait]
    impl PriceSource for FailingSource {
        async fn latest(&self) -> Result<PriceSnapshot, ExchangeError> {
            Err(ExchangeError::Transport("offline".into()))
        }
    }

    #[derive(Default)]
    pub(crate) struct Recorded {
        pub sent: Vec<String>,
        pub closes: usize,
    }

    pub(crate) struct RecordingSubscriber {
        log: Arc<Mutex<Recorded>>,
        /// Fail every write after this many successful ones.
        fail_after: Option<usize>,
    }

    impl RecordingSubscriber {
        pub(crate) fn new() -> (Box<dyn Subscriber>, Arc<Mutex<Recorded>>) {
            Self::failing_after(None)
        }

        fn failing_after(fail_after: Option<usize>) -> (Box<dyn Subscriber>, Arc<Mutex<Recorded>>) {
            let log = Arc::new(Mutex::new(Recorded::default()));
            (
                Box::new(Self {
                    log: log.clone(),
                    fail_after,
                }),
                log,
            )
        }
    }

    #[async_trait]
    impl Subscriber for RecordingSubscriber {
        async fn send(&mut self, payload: &str) -> Result<(), SubscriberError> {
            let mut log = self.log.lock();
            if self.fail_after.is_some_and(|n| log.sent.len() >= n) {
                return Err(SubscriberError::Write("broken pipe".into()));
            }
            log.sent.push(payload.to_string());
            Ok(())
        }

        async fn close(&mut self) {
            self.log.lock().closes += 1;
        }
    }

    pub(crate) async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_register_delivers_snapshot_first() {
        let handle = BroadcastManager::spawn(Arc::new(FixedSource));
        let (sub, log) = RecordingSubscriber::new();
        handle.register(sub).await.unwrap();
        handle.try_broadcast("tick-1".to_string());

        wait_until(|| !log.lock().sent.is_empty()).await;
        assert!(handle.try_broadcast("tick-2".to_string()));
        wait_until(|| log.lock().sent.last().map(String::as_str) == Some("tick-2")).await;

        let sent = log.lock().sent.clone();
        assert!(sent[0].contains("\"symbol\":\"BTC-USDT\""));
        assert!(sent[0].contains("\"price\":\"43500\""));
    }

    #[tokio::test]
    async fn test_failed_snapshot_still_primes_subscriber() {
        let handle = BroadcastManager::spawn(Arc::new(FailingSource));
        let (sub, log) = RecordingSubscriber::new();
        handle.register(sub).await.unwrap();

        wait_until(|| {
            handle.try_broadcast("tick".to_string());
            !log.lock().sent.is_empty()
        })
        .await;
        assert!(log.lock().sent.iter().all(|m| m == "tick"));
    }

    #[tokio::test]
    async fn test_unregister_closes_once_and_stops_delivery() {
        let handle = BroadcastManager::spawn(Arc::new(FixedSource));
        let (sub, log) = RecordingSubscriber::new();
        let id = handle.register(sub).await.unwrap();
        wait_until(|| log.lock().sent.len() == 1).await;

        handle.unregister(id).await;
        handle.unregister(id).await;
        handle.try_broadcast("after".to_string());
        assert_eq!(handle.subscriber_count().await.unwrap(), 0);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let log = log.lock();
        assert_eq!(log.closes, 1);
        assert!(!log.sent.iter().any(|m| m == "after"));
    }

    #[tokio::test]
    async fn test_write_failure_removes_only_that_subscriber() {
        let handle = BroadcastManager::spawn(Arc::new(FixedSource));
        let (good, good_log) = RecordingSubscriber::new();
        let (bad, bad_log) = RecordingSubscriber::failing_after(Some(1));
        handle.register(good).await.unwrap();
        handle.register(bad).await.unwrap();
        wait_until(|| good_log.lock().sent.len() == 1 && bad_log.lock().sent.len() == 1).await;

        handle.try_broadcast("tick-1".to_string());
        handle.try_broadcast("tick-2".to_string());
        wait_until(|| good_log.lock().sent.len() == 3).await;

        assert_eq!(handle.subscriber_count().await.unwrap(), 1);
        assert_eq!(bad_log.lock().closes, 1);
        assert_eq!(bad_log.lock().sent.len(), 1);
        assert_eq!(good_log.lock().closes, 0);
    }

    #[tokio::test]
    async fn test_saturated_channel_drops_ticks() {
        let (_manager, handle) = BroadcastManager::with_capacity(Arc::new(FixedSource), 2);
        assert!(handle.try_broadcast("a".into()));
        assert!(handle.try_broadcast("b".into()));
        assert!(!handle.try_broadcast("c".into()));
    }

    #[tokio::test]
    async fn test_dropping_handles_stops_manager_and_closes_sinks() {
        let (manager, handle) = BroadcastManager::new(Arc::new(FailingSource));
        let task = tokio::spawn(manager.run());
        let (sub, log) = RecordingSubscriber::new();
        handle.register(sub).await.unwrap();
        assert_eq!(handle.subscriber_count().await.unwrap(), 1);

        drop(handle);
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert_eq!(log.lock().closes, 1);
    }
}
