//! Origin-tagged, topic-keyed broadcast bus.
//!
//! Models the named broadcast channel shared by every window of one origin:
//! any participant may publish or subscribe, delivery is best effort, and a
//! publish with nobody listening is silently dropped — the same contract a
//! window broadcast gives a page whose peer has already navigated away.

use std::collections::HashMap;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

/// One message on a named channel, stamped with the publishing window's
/// origin so receivers can enforce same-origin acceptance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub origin: String,
    pub payload: Bytes,
}

impl BusMessage {
    /// Decodes the payload as JSON into a typed message.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, BusError> {
        serde_json::from_slice(&self.payload).map_err(|err| BusError::Codec(err.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus payload codec error: {0}")]
    Codec(String),
}

pub type BusResult<T> = Result<T, BusError>;

pub trait Bus: Send + Sync {
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage>;
    fn publish(&self, topic: &str, origin: &str, payload: Bytes) -> BusResult<()>;
}

/// Serialize-and-publish convenience shared by both ends of a handoff.
pub fn publish_json<B, T>(bus: &B, topic: &str, origin: &str, value: &T) -> BusResult<()>
where
    B: Bus + ?Sized,
    T: Serialize,
{
    let payload = serde_json::to_vec(value).map_err(|err| BusError::Codec(err.to_string()))?;
    bus.publish(topic, origin, Bytes::from(payload))
}

/// In-process bus used by tests and by embedders that host every window in
/// one process.
#[derive(Debug, Default)]
pub struct WindowBus {
    topics: parking_lot::RwLock<HashMap<String, broadcast::Sender<BusMessage>>>,
}

impl WindowBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<BusMessage> {
        let mut guard = self.topics.write();
        guard
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }
}

impl Bus for WindowBus {
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage> {
        self.sender_for(topic).subscribe()
    }

    fn publish(&self, topic: &str, origin: &str, payload: Bytes) -> BusResult<()> {
        let sender = self.sender_for(topic);
        // A send with no receivers is not an error: the peer window may have
        // closed or never subscribed, and the channel contract is best effort.
        let _ = sender.send(BusMessage {
            topic: topic.to_string(),
            origin: origin.to_string(),
            payload,
        });
        Ok(())
    }
}
