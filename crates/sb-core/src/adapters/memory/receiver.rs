//! Receive loop over one in-memory queue or subscription.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use super::namespace::Shared;
use super::store::{EntityStore, Released};
use crate::domain::{BrokerFault, EntityPath, ReceivedMessage};
use crate::ports::{MessageReceiver, ReceiveMode};

/// Receiver handle. Locks still held when it is closed or dropped are
/// released for redelivery.
pub struct InMemoryReceiver {
    source: EntityPath,
    mode: ReceiveMode,
    store: Weak<EntityStore>,
    namespace: Weak<Shared>,
    changes: watch::Receiver<u64>,
    /// Highest sequence number already browsed.
    cursor: u64,
    held: HashSet<Uuid>,
    closed: bool,
}

impl InMemoryReceiver {
    pub(super) fn new(
        source: EntityPath,
        mode: ReceiveMode,
        store: &Arc<EntityStore>,
        namespace: Weak<Shared>,
    ) -> Self {
        Self {
            source,
            mode,
            store: Arc::downgrade(store),
            namespace,
            changes: store.subscribe(),
            cursor: 0,
            held: HashSet::new(),
            closed: false,
        }
    }

    fn release_held(&mut self) {
        if self.held.is_empty() {
            return;
        }
        let Some(store) = self.store.upgrade() else {
            self.held.clear();
            return;
        };
        for token in self.held.drain() {
            if let Released::Exhausted(message) = store.release(token) {
                match self.namespace.upgrade() {
                    Some(namespace) => namespace.route_dead_letter(&self.source, message),
                    None => store.dead_letter(message),
                }
            }
        }
    }
}

#[async_trait]
impl MessageReceiver for InMemoryReceiver {
    async fn receive(&mut self) -> Result<Option<ReceivedMessage>, BrokerFault> {
        loop {
            if self.closed {
                return Ok(None);
            }
            let Some(store) = self.store.upgrade() else {
                return Ok(None);
            };

            // Mark seen before looking, so an enqueue in between still wakes us.
            self.changes.borrow_and_update();
            let next = match self.mode {
                ReceiveMode::PeekLock => store.lock_next(),
                ReceiveMode::Browse => store.browse_after(self.cursor),
            };
            drop(store);

            if let Some(message) = next {
                match message.lock_token {
                    Some(token) => {
                        self.held.insert(token);
                    }
                    None => self.cursor = message.sequence_number,
                }
                return Ok(Some(message));
            }

            if self.changes.changed().await.is_err() {
                debug!(source = %self.source, "Entity removed, receiver finished");
                return Ok(None);
            }
        }
    }

    async fn complete(&mut self, message: &ReceivedMessage) -> Result<(), BrokerFault> {
        let Some(token) = message.lock_token else {
            return Ok(());
        };
        self.held.remove(&token);
        let store = self
            .store
            .upgrade()
            .ok_or_else(|| BrokerFault::NotFound(self.source.clone()))?;
        if store.complete(token) {
            Ok(())
        } else {
            Err(BrokerFault::Rejected(format!(
                "lock on message {} from {} was lost",
                message.message_id, self.source
            )))
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.release_held();
            debug!(source = %self.source, "Receiver closed");
        }
    }
}

impl Drop for InMemoryReceiver {
    fn drop(&mut self) {
        self.release_held();
    }
}
