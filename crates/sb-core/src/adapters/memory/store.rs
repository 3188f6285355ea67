//! Message storage for one queue or subscription.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

use crate::domain::{OutboundMessage, Properties, ReceivedMessage};

/// A message at rest in an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub message_id: String,
    pub sequence_number: u64,
    pub enqueued_at: DateTime<Utc>,
    pub delivery_count: u32,
    pub label: Option<String>,
    pub properties: Properties,
    pub body: Vec<u8>,
}

impl StoredMessage {
    fn received(&self, lock_token: Option<Uuid>) -> ReceivedMessage {
        ReceivedMessage {
            message_id: self.message_id.clone(),
            sequence_number: self.sequence_number,
            enqueued_at: self.enqueued_at,
            delivery_count: self.delivery_count,
            label: self.label.clone(),
            properties: self.properties.clone(),
            body: self.body.clone(),
            lock_token,
        }
    }

    /// Back to an outbound message, for forwarding.
    #[must_use]
    pub fn into_outbound(self) -> OutboundMessage {
        OutboundMessage {
            message_id: self.message_id,
            label: self.label,
            properties: self.properties,
            body: self.body,
        }
    }
}

/// Serializable content of an [`EntityStore`]. Locked messages are saved
/// as active.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub next_sequence: u64,
    pub active: Vec<StoredMessage>,
    pub dead_letters: Vec<StoredMessage>,
}

/// What happened to a message whose lock was released.
#[derive(Debug)]
pub enum Released {
    /// Back in the active set for redelivery.
    Requeued,
    /// Out of deliveries; the caller routes it to the dead-letter target.
    Exhausted(StoredMessage),
    /// Lock unknown (already completed or released).
    Unknown,
}

#[derive(Default)]
struct Inner {
    next_sequence: u64,
    active: VecDeque<StoredMessage>,
    locked: HashMap<Uuid, StoredMessage>,
    dead_letters: Vec<StoredMessage>,
}

impl Inner {
    fn stamp(&mut self, message: OutboundMessage) -> StoredMessage {
        self.next_sequence += 1;
        StoredMessage {
            message_id: message.message_id,
            sequence_number: self.next_sequence,
            enqueued_at: Utc::now(),
            delivery_count: 0,
            label: message.label,
            properties: message.properties,
            body: message.body,
        }
    }

    /// Keep `active` ordered by sequence number.
    fn reinsert(&mut self, message: StoredMessage) {
        let index = self
            .active
            .partition_point(|m| m.sequence_number < message.sequence_number);
        self.active.insert(index, message);
    }
}

/// Active, locked and dead-lettered messages of one entity.
///
/// Every change bumps a version on a watch channel; receivers wait on it.
/// Dropping the store closes the channel, which ends their receive loops.
pub struct EntityStore {
    inner: Mutex<Inner>,
    version: watch::Sender<u64>,
    max_delivery_count: u32,
}

impl EntityStore {
    #[must_use]
    pub fn new(max_delivery_count: u32) -> Arc<Self> {
        Self::from_snapshot(max_delivery_count, StoreSnapshot::default())
    }

    #[must_use]
    pub fn from_snapshot(max_delivery_count: u32, snapshot: StoreSnapshot) -> Arc<Self> {
        let (version, _) = watch::channel(0);
        let mut inner = Inner {
            next_sequence: snapshot.next_sequence,
            dead_letters: snapshot.dead_letters,
            ..Inner::default()
        };
        for message in snapshot.active {
            inner.reinsert(message);
        }
        Arc::new(Self {
            inner: Mutex::new(inner),
            version,
            max_delivery_count: max_delivery_count.max(1),
        })
    }

    #[must_use]
    pub fn snapshot(&self) -> StoreSnapshot {
        let inner = self.inner.lock();
        let mut active: Vec<StoredMessage> = inner.active.iter().cloned().collect();
        active.extend(inner.locked.values().cloned());
        active.sort_by_key(|m| m.sequence_number);
        StoreSnapshot {
            next_sequence: inner.next_sequence,
            active,
            dead_letters: inner.dead_letters.clone(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    fn notify(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }

    /// Append a message and return its sequence number.
    pub fn enqueue(&self, message: OutboundMessage) -> u64 {
        let sequence_number = {
            let mut inner = self.inner.lock();
            let stored = inner.stamp(message);
            let sequence_number = stored.sequence_number;
            inner.active.push_back(stored);
            sequence_number
        };
        self.notify();
        sequence_number
    }

    pub fn dead_letter(&self, message: StoredMessage) {
        self.inner.lock().dead_letters.push(message);
    }

    /// Dead-letter a message that never made it into the active set.
    pub fn dead_letter_new(&self, message: OutboundMessage) {
        let mut inner = self.inner.lock();
        let stored = inner.stamp(message);
        inner.dead_letters.push(stored);
    }

    /// Take the oldest active message under a fresh lock.
    pub fn lock_next(&self) -> Option<ReceivedMessage> {
        let mut inner = self.inner.lock();
        let mut message = inner.active.pop_front()?;
        message.delivery_count += 1;
        let token = Uuid::new_v4();
        let received = message.received(Some(token));
        inner.locked.insert(token, message);
        Some(received)
    }

    /// Oldest message past `cursor`, left in place.
    pub fn browse_after(&self, cursor: u64) -> Option<ReceivedMessage> {
        let inner = self.inner.lock();
        inner
            .active
            .iter()
            .chain(inner.locked.values())
            .filter(|m| m.sequence_number > cursor)
            .min_by_key(|m| m.sequence_number)
            .map(|m| m.received(None))
    }

    /// Remove a locked message for good. False if the lock is unknown.
    pub fn complete(&self, lock_token: Uuid) -> bool {
        self.inner.lock().locked.remove(&lock_token).is_some()
    }

    /// Give up a lock. Exhausted messages are handed back, not stored.
    pub fn release(&self, lock_token: Uuid) -> Released {
        let outcome = {
            let mut inner = self.inner.lock();
            match inner.locked.remove(&lock_token) {
                None => Released::Unknown,
                Some(message) if message.delivery_count >= self.max_delivery_count => {
                    Released::Exhausted(message)
                }
                Some(message) => {
                    inner.reinsert(message);
                    Released::Requeued
                }
            }
        };
        if matches!(outcome, Released::Requeued) {
            self.notify();
        }
        outcome
    }

    /// Active (including locked) and dead-letter counts.
    #[must_use]
    pub fn counts(&self) -> (u64, u64) {
        let inner = self.inner.lock();
        (
            (inner.active.len() + inner.locked.len()) as u64,
            inner.dead_letters.len() as u64,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(body: &str) -> OutboundMessage {
        OutboundMessage::new(body.as_bytes().to_vec())
    }

    #[test]
    fn test_lock_complete_removes() {
        let store = EntityStore::new(10);
        store.enqueue(message("a"));

        let received = store.lock_next().expect("message");
        assert_eq!(received.delivery_count, 1);
        assert_eq!(store.counts(), (1, 0));

        assert!(store.complete(received.lock_token.expect("locked")));
        assert_eq!(store.counts(), (0, 0));
        assert!(!store.complete(Uuid::new_v4()));
    }

    #[test]
    fn test_release_requeues_in_order() {
        let store = EntityStore::new(10);
        store.enqueue(message("a"));
        store.enqueue(message("b"));

        let first = store.lock_next().expect("a");
        assert!(matches!(
            store.release(first.lock_token.expect("locked")),
            Released::Requeued
        ));

        let again = store.lock_next().expect("a again");
        assert_eq!(again.body, b"a");
        assert_eq!(again.delivery_count, 2);
    }

    #[test]
    fn test_release_exhausts_at_max_delivery_count() {
        let store = EntityStore::new(2);
        store.enqueue(message("a"));

        let token = store.lock_next().and_then(|m| m.lock_token).expect("lock");
        assert!(matches!(store.release(token), Released::Requeued));

        let token = store.lock_next().and_then(|m| m.lock_token).expect("lock");
        match store.release(token) {
            Released::Exhausted(message) => assert_eq!(message.delivery_count, 2),
            other => panic!("expected exhausted, got {other:?}"),
        }
        assert_eq!(store.counts(), (0, 0));
    }

    #[test]
    fn test_browse_leaves_messages() {
        let store = EntityStore::new(10);
        let first = store.enqueue(message("a"));
        store.enqueue(message("b"));

        let peeked = store.browse_after(0).expect("a");
        assert_eq!(peeked.sequence_number, first);
        assert!(peeked.lock_token.is_none());

        let next = store.browse_after(peeked.sequence_number).expect("b");
        assert_eq!(next.body, b"b");
        assert!(store.browse_after(next.sequence_number).is_none());
        assert_eq!(store.counts(), (2, 0));
    }

    #[test]
    fn test_snapshot_returns_locked_messages_to_active() {
        let store = EntityStore::new(10);
        store.enqueue(message("a"));
        store.enqueue(message("b"));
        let _locked = store.lock_next();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.active.len(), 2);
        assert_eq!(snapshot.next_sequence, 2);

        let restored = EntityStore::from_snapshot(10, snapshot);
        assert_eq!(restored.enqueue(message("c")), 3);
        assert_eq!(restored.lock_next().map(|m| m.body), Some(b"a".to_vec()));
    }

    #[tokio::test]
    async fn test_enqueue_wakes_watchers() {
        let store = EntityStore::new(10);
        let mut changes = store.subscribe();
        changes.borrow_and_update();

        store.enqueue(message("a"));
        tokio::time::timeout(std::time::Duration::from_secs(1), changes.changed())
            .await
            .expect("woken")
            .expect("store alive");
    }
}
