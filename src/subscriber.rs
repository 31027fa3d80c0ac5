use std::collections::HashMap;
use std::sync::Mutex;

use log::warn;
use tokio::sync::mpsc;

pub type ClientId = u32;

/// A broadcast message, stamped with the server-assigned Lamport timestamp.
#[derive(Debug, Clone)]
pub struct TextMessage {
    pub client_id_from: ClientId,
    pub content: String,
    pub lamport_timestamp: u64,
}

/// Bounded outbound queue depth per subscriber. A full queue drops the
/// message for that subscriber only; the non-blocking enqueue is realized
/// here with `try_send` against a bounded `mpsc` channel.
const SUBSCRIBER_QUEUE_CAPACITY: usize = 64;

/// Bookkeeping for one connected client: its outbound queue. The sending
/// half lives here; the session handler holds the receiving half for as
/// long as the stream is alive.
struct SubscriberSlot {
    sender: mpsc::Sender<TextMessage>,
}

/// Mapping `ClientId -> SubscriberSlot`, guarded by a single mutex. The
/// next-id counter is monotonic and never recycles within a process
/// lifetime.
pub struct SubscriberRegistry {
    next_id: Mutex<ClientId>,
    slots: Mutex<HashMap<ClientId, SubscriberSlot>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        SubscriberRegistry {
            next_id: Mutex::new(1),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Allocates a new `ClientId` and installs its queue, returning the
    /// receiving half for the session handler's stream loop.
    pub fn register(&self) -> (ClientId, mpsc::Receiver<TextMessage>) {
        let id = {
            let mut guard = self.next_id.lock().unwrap();
            let id = *guard;
            *guard += 1;
            id
        };
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        self.slots.lock().unwrap().insert(id, SubscriberSlot { sender: tx });
        (id, rx)
    }

    /// Removes the slot, dropping its queue. Called on stream termination
    /// (deliberate close or transport error), under this mutex.
    pub fn unregister(&self, id: ClientId) {
        self.slots.lock().unwrap().remove(&id);
    }

    /// Enqueues `msg` on every currently-live subscriber except `exclude`.
    /// A full queue is logged and the send dropped for that subscriber
    /// only; other subscribers are unaffected.
    pub fn fan_out(&self, msg: &TextMessage, exclude: ClientId) {
        let slots = self.slots.lock().unwrap();
        for (&id, slot) in slots.iter() {
            if id == exclude {
                continue;
            }
            if let Err(mpsc::error::TrySendError::Full(_)) = slot.sender.try_send(msg.clone()) {
                warn!("subscriber {}: queue full, dropping message", id);
            }
            // A `Closed` error means the stream already tore down; its
            // slot will be removed by `unregister` shortly and does not
            // need to be treated as a drop-and-log event.
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Synthetic control message content prefixes.
pub fn redirect_content(leader_address: &str) -> String {
    format!("REDIRECT:{}", leader_address)
}

pub fn assigned_id_content(id: ClientId) -> String {
    format!("ID Atribuido:{}", id)
}

/// A control message is addressed from no real client; `0` is reserved for
/// it, since real client ids are assigned starting at 1.
pub const CONTROL_SENDER: ClientId = 0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_assigns_increasing_ids() {
        let registry = SubscriberRegistry::new();
        let (id1, _rx1) = registry.register();
        let (id2, _rx2) = registry.register();
        assert_eq!(id1, 1);
        assert_eq!(id2, 2);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn unregister_removes_slot() {
        let registry = SubscriberRegistry::new();
        let (id, _rx) = registry.register();
        registry.unregister(id);
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn fan_out_excludes_sender() {
        let registry = SubscriberRegistry::new();
        let (a, mut rx_a) = registry.register();
        let (_b, mut rx_b) = registry.register();

        let msg = TextMessage { client_id_from: a, content: "hello".into(), lamport_timestamp: 3 };
        registry.fan_out(&msg, a);

        assert!(rx_a.try_recv().is_err(), "sender must not receive its own message");
        let received = rx_b.try_recv().expect("other subscriber should receive it");
        assert_eq!(received.content, "hello");
    }

    #[tokio::test]
    async fn full_queue_is_dropped_without_disconnecting() {
        let registry = SubscriberRegistry::new();
        let (_id, mut rx) = registry.register();

        for i in 0..(SUBSCRIBER_QUEUE_CAPACITY + 5) {
            let msg = TextMessage { client_id_from: 99, content: format!("{}", i), lamport_timestamp: i as u64 };
            registry.fan_out(&msg, 99);
        }

        assert_eq!(registry.len(), 1, "overflow must not drop the subscriber slot");
        let mut seen = 0;
        while rx.try_recv().is_ok() {
            seen += 1;
        }
        assert_eq!(seen, SUBSCRIBER_QUEUE_CAPACITY);
    }
}
