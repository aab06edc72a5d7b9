use bytes::Bytes;
use dashmap::DashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::TransportError;
use crate::protocol::Topic;

const CHANNEL_CAPACITY: usize = 256;

/// One message as delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub topic: Topic,
    pub payload: Bytes,
}

/// Best-effort bidirectional message channel between host and companion.
///
/// `send` may silently drop, gives no ordering across topics and never
/// blocks, so it can be called while holding a lock.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    fn send(&self, topic: Topic, payload: Bytes) -> Result<(), TransportError>;

    /// Receives every message the peer sends from now on.
    fn subscribe(&self) -> broadcast::Receiver<Envelope>;

    /// Largest payload accepted by `send`.
    fn max_payload(&self) -> usize;
}

/// In-memory link used by tests and the demo binary.
pub struct LocalLink;

impl LocalLink {
    /// Two connected endpoints. `loss` is the probability (0.0..=1.0) that a
    /// sent message silently disappears.
    pub fn pair(max_payload: usize, loss: f64) -> (LocalEndpoint, LocalEndpoint) {
        let (a_to_b, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (b_to_a, _) = broadcast::channel(CHANNEL_CAPACITY);
        let connected = Arc::new(AtomicBool::new(true));
        let loss = loss.clamp(0.0, 1.0);

        let a = LocalEndpoint {
            name: "host",
            outbound: a_to_b.clone(),
            inbound: b_to_a.clone(),
            max_payload,
            loss,
            connected: connected.clone(),
            sent: DashMap::new(),
        };
        let b = LocalEndpoint {
            name: "companion",
            outbound: b_to_a,
            inbound: a_to_b,
            max_payload,
            loss,
            connected,
            sent: DashMap::new(),
        };
        (a, b)
    }
}

#[derive(Debug)]
pub struct LocalEndpoint {
    name: &'static str,
    outbound: broadcast::Sender<Envelope>,
    inbound: broadcast::Sender<Envelope>,
    max_payload: usize,
    loss: f64,
    connected: Arc<AtomicBool>,
    sent: DashMap<Topic, u64>,
}

impl LocalEndpoint {
    /// Simulates the peer going away (or coming back) for both endpoints.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Messages accepted by `send` on `topic`, including the ones lost in transit.
    pub fn sent_count(&self, topic: Topic) -> u64 {
        self.sent.get(&topic).map(|count| *count).unwrap_or(0)
    }
}

impl Transport for LocalEndpoint {
    fn send(&self, topic: Topic, payload: Bytes) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        if payload.len() > self.max_payload {
            return Err(TransportError::PayloadTooLarge {
                size: payload.len(),
                limit: self.max_payload,
            });
        }

        *self.sent.entry(topic).or_insert(0) += 1;

        if self.loss > 0.0 && fastrand::f64() < self.loss {
            debug!("📉 [{}] `{}` lost in transit", self.name, topic);
            return Ok(());
        }

        self.outbound
            .send(Envelope { topic, payload })
            .map(|_| ())
            .map_err(|_| TransportError::Closed)
    }

    fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.inbound.subscribe()
    }

    fn max_payload(&self) -> usize {
        self.max_payload
    }
}
