use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::clock::LamportClock;
use crate::subscriber::{ClientId, SubscriberRegistry, TextMessage};

/// `MessageHistory` never holds more than this many entries. Oldest
/// entries are evicted FIFO.
const MESSAGE_HISTORY_CAPACITY: usize = 100;

/// FIFO of at most `MESSAGE_HISTORY_CAPACITY` accepted messages, newest
/// appended, oldest evicted. Guarded by its own mutex, independent of the
/// subscriber mutex (lock order: subscriber mutex before history mutex,
/// never the reverse — in practice the two are never held at once here).
struct MessageHistory {
    entries: Mutex<VecDeque<TextMessage>>,
}

impl MessageHistory {
    fn new() -> Self {
        MessageHistory { entries: Mutex::new(VecDeque::with_capacity(MESSAGE_HISTORY_CAPACITY)) }
    }

    fn push(&self, msg: TextMessage) {
        let mut entries = self.entries.lock().unwrap();
        entries.push_back(msg);
        while entries.len() > MESSAGE_HISTORY_CAPACITY {
            entries.pop_front();
        }
    }

    /// Entries whose Lamport timestamp exceeds `last_timestamp`, oldest
    /// first.
    fn since(&self, last_timestamp: u64) -> Vec<TextMessage> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.lamport_timestamp > last_timestamp)
            .cloned()
            .collect()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

/// Leader-only accept/fan-out path. Stamps an inbound message with a
/// freshly observed server timestamp, appends it to history, and delivers
/// it to every subscriber but the sender.
pub struct BroadcastEngine {
    clock: Arc<LamportClock>,
    subscribers: Arc<SubscriberRegistry>,
    history: MessageHistory,
}

impl BroadcastEngine {
    pub fn new(clock: Arc<LamportClock>, subscribers: Arc<SubscriberRegistry>) -> Self {
        BroadcastEngine { clock, subscribers, history: MessageHistory::new() }
    }

    /// Observes the sender's Lamport timestamp to obtain the server-assigned
    /// timestamp, builds the outbound message, appends it to history
    /// (evicting past capacity), and fans it out to every subscriber except
    /// `sender`. Returns the stamped message so the caller can echo
    /// `client_id_from`/content back to the accepting RPC's status response.
    pub fn accept(&self, sender: ClientId, content: String, sender_ts: u64) -> TextMessage {
        let ts = self.clock.observe(sender_ts);
        let msg = TextMessage { client_id_from: sender, content, lamport_timestamp: ts };
        self.history.push(msg.clone());
        self.subscribers.fan_out(&msg, sender);
        msg
    }

    /// Backing implementation for the `SyncState` extension hook: never
    /// invoked by the core itself, reserved for replica catch-up.
    pub fn history_since(&self, last_timestamp: u64) -> Vec<TextMessage> {
        self.history.since(last_timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> BroadcastEngine {
        BroadcastEngine::new(Arc::new(LamportClock::new()), Arc::new(SubscriberRegistry::new()))
    }

    #[test]
    fn accept_stamps_a_fresh_timestamp_greater_than_the_sender() {
        let engine = engine();
        let msg = engine.accept(1, "hello".to_string(), 5);
        assert!(msg.lamport_timestamp > 5);
    }

    #[test]
    fn consecutive_accepts_get_strictly_increasing_timestamps() {
        let engine = engine();
        let first = engine.accept(1, "a".to_string(), 0);
        let second = engine.accept(1, "b".to_string(), 0);
        assert!(second.lamport_timestamp > first.lamport_timestamp);
    }

    #[test]
    fn history_never_exceeds_capacity() {
        let engine = engine();
        for i in 0..(MESSAGE_HISTORY_CAPACITY + 20) {
            engine.accept(1, format!("msg-{}", i), 0);
        }
        assert_eq!(engine.history.len(), MESSAGE_HISTORY_CAPACITY);
    }

    #[test]
    fn history_since_only_returns_newer_entries() {
        let engine = engine();
        let first = engine.accept(1, "a".to_string(), 0);
        let second = engine.accept(1, "b".to_string(), 0);
        let since = engine.history_since(first.lamport_timestamp);
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].lamport_timestamp, second.lamport_timestamp);
    }

    #[test]
    fn broadcast_excludes_sender_and_reaches_other_subscribers() {
        let subscribers = Arc::new(SubscriberRegistry::new());
        let (a, mut rx_a) = subscribers.register();
        let (_b, mut rx_b) = subscribers.register();
        let engine = BroadcastEngine::new(Arc::new(LamportClock::new()), subscribers);

        engine.accept(a, "hi".to_string(), 0);

        assert!(rx_a.try_recv().is_err());
        let received = rx_b.try_recv().expect("other subscriber receives the broadcast");
        assert_eq!(received.content, "hi");
    }
}
