//! In-process broadcast bus.
//!
//! One `tokio::sync::broadcast` topic per channel name. Every port gets a
//! random origin id and never sees its own posts, like a browser
//! `BroadcastChannel`. Delivery is at-most-once; a lagging port loses the
//! oldest frames.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

const TOPIC_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct BusFrame {
    origin: Uuid,
    payload: Value,
}

/// Shared bus handle. Cheap to clone.
#[derive(Clone, Default)]
pub struct LocalBus {
    topics: Arc<Mutex<HashMap<String, broadcast::Sender<BusFrame>>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to `channel`. Frames posted after this call are delivered.
    pub fn port(&self, channel: &str) -> BusPort {
        let tx = self
            .topics
            .lock()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone();
        let rx = tx.subscribe();
        BusPort {
            sender: BusSender {
                origin: Uuid::new_v4(),
                tx,
            },
            rx,
        }
    }
}

/// Posting half of a port.
#[derive(Clone)]
pub struct BusSender {
    origin: Uuid,
    tx: broadcast::Sender<BusFrame>,
}

impl BusSender {
    pub fn post(&self, payload: Value) {
        // No subscribers is fine; the bus is fire-and-forget.
        let _ = self.tx.send(BusFrame {
            origin: self.origin,
            payload,
        });
    }
}

pub struct BusPort {
    sender: BusSender,
    rx: broadcast::Receiver<BusFrame>,
}

impl BusPort {
    pub fn sender(&self) -> BusSender {
        self.sender.clone()
    }

    pub fn post(&self, payload: Value) {
        self.sender.post(payload);
    }

    /// Next frame from another participant; `None` once the topic is gone.
    pub async fn recv(&mut self) -> Option<Value> {
        loop {
            match self.rx.recv().await {
                Ok(frame) if frame.origin == self.sender.origin => continue,
                Ok(frame) => return Some(frame.payload),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("bus port lagged, {skipped} frames dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn ports_do_not_hear_themselves() {
        let bus = LocalBus::new();
        let mut a = bus.port("room");
        let mut b = bus.port("room");
        a.post(json!({"from": "a"}));
        b.post(json!({"from": "b"}));
        assert_eq!(b.recv().await, Some(json!({"from": "a"})));
        assert_eq!(a.recv().await, Some(json!({"from": "b"})));
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let bus = LocalBus::new();
        let mut a = bus.port("one");
        let other = bus.port("two");
        let same = bus.port("one");
        other.post(json!(1));
        same.post(json!(2));
        assert_eq!(a.recv().await, Some(json!(2)));
    }
}
