//! # In-Memory Broker
//!
//! A complete broker behind the outbound ports, used by the test suites
//! and by `sbctl` as a local, file-backed emulator.

mod filter;
mod namespace;
mod receiver;
mod snapshot;
mod store;

pub use filter::SqlFilter;
pub use namespace::{InMemoryNamespace, MAX_FORWARD_HOPS};
pub use receiver::InMemoryReceiver;
pub use snapshot::{
    NamespaceSnapshot, QueueSnapshot, SnapshotError, SubscriptionSnapshot, TopicSnapshot,
};
pub use store::{StoreSnapshot, StoredMessage};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::config::ConnectionString;
use crate::domain::BrokerFault;
use crate::ports::{BrokerConnector, Namespace};

/// Connector that hands out in-memory namespaces keyed by endpoint.
///
/// Connecting twice to the same endpoint yields the same namespace.
pub struct InMemoryConnector {
    namespaces: Mutex<HashMap<String, InMemoryNamespace>>,
    reachable: AtomicBool,
}

impl InMemoryConnector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            namespaces: Mutex::new(HashMap::new()),
            reachable: AtomicBool::new(true),
        }
    }

    /// Serve `namespace` for the endpoint of `connection`.
    pub fn insert(&self, connection: &ConnectionString, namespace: InMemoryNamespace) {
        self.namespaces
            .lock()
            .insert(connection.endpoint.clone(), namespace);
    }

    /// Namespace served for `connection`, if one was created or inserted.
    #[must_use]
    pub fn namespace(&self, connection: &ConnectionString) -> Option<InMemoryNamespace> {
        self.namespaces.lock().get(&connection.endpoint).cloned()
    }

    /// Make every subsequent `connect` fail with `Unreachable`.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }
}

impl Default for InMemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerConnector for InMemoryConnector {
    async fn connect(&self, connection: &ConnectionString) -> Result<Namespace, BrokerFault> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(BrokerFault::Unreachable(format!(
                "no route to {}",
                connection.endpoint
            )));
        }
        if connection.key.as_deref().map_or(true, str::is_empty) {
            return Err(BrokerFault::Rejected(
                "unauthorized: connection string has no SharedAccessKey".into(),
            ));
        }

        let namespace = self
            .namespaces
            .lock()
            .entry(connection.endpoint.clone())
            .or_insert_with(|| InMemoryNamespace::new(&connection.namespace))
            .clone();
        debug!(namespace = %connection.namespace, "Connected to in-memory namespace");
        Ok(Arc::new(namespace))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::BrokerNamespace;

    fn connection() -> ConnectionString {
        ConnectionString::parse("Endpoint=sb://local.example/;SharedAccessKey=k").unwrap()
    }

    #[tokio::test]
    async fn test_connect_is_keyed_by_endpoint() {
        let connector = InMemoryConnector::new();
        let first = connector.connect(&connection()).await.unwrap();
        let second = connector.connect(&connection()).await.unwrap();

        assert_eq!(first.name(), "local");
        first
            .create_queue(&crate::domain::QueueDescription {
                name: "jobs".into(),
                settings: Default::default(),
                forward_to: None,
                forward_dead_letter_to: None,
            })
            .await
            .unwrap();
        assert!(second.get_queue("jobs").await.unwrap().is_some());
        assert!(connector.namespace(&connection()).is_some());
    }

    #[tokio::test]
    async fn test_unreachable_and_unauthorized() {
        let connector = InMemoryConnector::new();
        connector.set_reachable(false);
        assert!(matches!(
            connector.connect(&connection()).await.err(),
            Some(BrokerFault::Unreachable(_))
        ));

        connector.set_reachable(true);
        let keyless = ConnectionString::parse("Endpoint=sb://local.example/").unwrap();
        assert!(matches!(
            connector.connect(&keyless).await.err(),
            Some(BrokerFault::Rejected(_))
        ));
    }

    #[test]
    fn test_snapshot_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        assert!(NamespaceSnapshot::load(&path).unwrap().is_none());

        let snapshot = InMemoryNamespace::new("local").snapshot();
        snapshot.save(&path).unwrap();
        assert_eq!(NamespaceSnapshot::load(&path).unwrap(), Some(snapshot));
    }
}
