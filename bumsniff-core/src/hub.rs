//! Publish/subscribe hub between the ingest pipeline and streaming sessions.
//! Fan-out is lossy: a subscriber that cannot keep up misses frames, and the
//! publisher never waits.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};
use uuid::Uuid;

/// Default per-subscriber channel capacity.
const DEFAULT_CAPACITY: usize = 1000;

/// A decoded BUM frame enriched with its provider-side context. `data` holds
/// the inner Ethernet frame, already copied out of the capture buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BumFrame {
    pub data: Bytes,
    /// The VPLS service label the frame arrived on.
    pub label: u32,
    /// Bridge domain the label belongs to.
    pub domain: String,
    /// Remote PE the frame ingressed from.
    pub remote: String,
    /// Capture time.
    pub timestamp: SystemTime,
}

/// The fan-out dispatcher: a registry of subscriber channels fed by a single
/// publisher.
pub struct Hub {
    capacity: usize,
    subscribers: RwLock<HashMap<String, mpsc::Sender<Arc<BumFrame>>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a hub with a non-default per-subscriber channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new subscriber, returning its id and the receiving end of
    /// its channel. The subscriber sees every publish that starts after this
    /// call returns.
    pub fn subscribe(&self) -> (String, mpsc::Receiver<Arc<BumFrame>>) {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(self.capacity);
        info!(id = %id, "register a new stream");
        self.subscribers.write().insert(id.clone(), tx);
        (id, rx)
    }

    /// Remove a subscriber and close its channel. Once this returns no
    /// further publish will enqueue to it.
    pub fn unsubscribe(&self, id: &str) {
        if self.subscribers.write().remove(id).is_some() {
            info!(id = %id, "unregister the stream");
        }
    }

    /// Deliver `frame` to every subscriber with room in its channel. A
    /// subscriber whose channel is full misses this frame.
    pub fn publish(&self, frame: Arc<BumFrame>) {
        let subscribers = self.subscribers.read();
        for (id, tx) in subscribers.iter() {
            match tx.try_send(frame.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    debug!(id = %id, label = frame.label, "subscriber is slow, dropping frame");
                }
                // Lost the race with an unsubscribe; nothing to do.
                Err(TrySendError::Closed(_)) => {}
            }
        }
    }

    /// Drop every subscriber channel. Receivers observe end-of-stream; used
    /// when ingest terminates.
    pub fn close(&self) {
        self.subscribers.write().clear();
    }

    /// Number of live subscribers.
    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(label: u32, domain: &str) -> Arc<BumFrame> {
        Arc::new(BumFrame {
            data: Bytes::from_static(&[0xff; 64]),
            label,
            domain: domain.to_string(),
            remote: "pe1".to_string(),
            timestamp: SystemTime::UNIX_EPOCH,
        })
    }

    #[test]
    fn test_publish_preserves_order() {
        tokio_test::block_on(async {
            let hub = Hub::new();
            let (_id, mut rx) = hub.subscribe();
            for label in [1, 2, 3] {
                hub.publish(frame(label, "blue"));
            }
            assert_eq!(1, rx.recv().await.unwrap().label);
            assert_eq!(2, rx.recv().await.unwrap().label);
            assert_eq!(3, rx.recv().await.unwrap().label);
        });
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        tokio_test::block_on(async {
            let hub = Hub::new();
            let (id, mut rx) = hub.subscribe();
            assert_eq!(1, hub.len());

            hub.publish(frame(1, "blue"));
            hub.unsubscribe(&id);
            hub.publish(frame(2, "blue"));

            // The frame published before the unsubscribe is still buffered;
            // afterwards the channel is closed.
            assert_eq!(1, rx.recv().await.unwrap().label);
            assert_eq!(None, rx.recv().await);
            assert!(hub.is_empty());
        });
    }

    #[test]
    fn test_slow_subscriber_drops_frames() {
        tokio_test::block_on(async {
            let hub = Hub::with_capacity(1);
            let (_slow, mut slow_rx) = hub.subscribe();
            let (_fast, mut fast_rx) = hub.subscribe();

            for label in [1, 2, 3] {
                hub.publish(frame(label, "blue"));
                // The fast subscriber drains between publishes.
                assert_eq!(label, fast_rx.recv().await.unwrap().label);
            }

            // The slow subscriber kept only the first frame.
            hub.close();
            assert_eq!(1, slow_rx.recv().await.unwrap().label);
            assert_eq!(None, slow_rx.recv().await);
        });
    }

    #[test]
    fn test_close_ends_every_stream() {
        tokio_test::block_on(async {
            let hub = Hub::new();
            let (_a, mut rx_a) = hub.subscribe();
            let (_b, mut rx_b) = hub.subscribe();
            hub.close();
            assert_eq!(None, rx_a.recv().await);
            assert_eq!(None, rx_b.recv().await);
            assert!(hub.is_empty());
        });
    }
}
