//! Live price fan-out.
//!
//! A single control loop owns the subscriber set; membership changes and
//! deliveries are processed one at a time, so a subscriber is never written
//! to after it has been removed. A poller feeds snapshots into the loop on a
//! fixed interval.

pub mod manager;
pub mod poller;

use async_trait::async_trait;

pub use manager::{BroadcastHandle, BroadcastManager, SubscriberId};
pub use poller::{spawn_poller, PollerHandle};

#[derive(Debug, thiserror::Error)]
pub enum SubscriberError {
    #[error("Subscriber write failed: {0}")]
    Write(String),
    #[error("Broadcast manager is not running")]
    ManagerStopped,
}

/// An output sink that receives serialized snapshots.
#[async_trait]
pub trait Subscriber: Send {
    async fn send(&mut self, payload: &str) -> Result<(), SubscriberError>;

    /// Release the underlying sink. Called exactly once, on removal.
    async fn close(&mut self);
}
