//! Lazily connected, process-wide namespace handle.

use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{error, info};

use super::{bounded, EntityManager, MessageSender, ShutdownCoordinator, SubscriptionManager};
use crate::config::{ConnectionString, CoordinatorConfig};
use crate::domain::{CoordinatorError, CoordinatorResult};
use crate::ports::{BrokerConnector, Namespace};

/// Owns the connection to one broker namespace.
///
/// The first successful [`connect`](Self::connect) performs the handshake;
/// every later call returns the same handle. A failed attempt is not
/// cached, the next call tries again.
pub struct NamespaceClient {
    config: CoordinatorConfig,
    connector: Arc<dyn BrokerConnector>,
    namespace: OnceCell<Namespace>,
}

impl NamespaceClient {
    pub fn new(config: CoordinatorConfig, connector: Arc<dyn BrokerConnector>) -> Self {
        Self {
            config,
            connector,
            namespace: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub async fn connect(&self) -> CoordinatorResult<Namespace> {
        self.namespace
            .get_or_try_init(|| self.handshake())
            .await
            .cloned()
    }

    async fn handshake(&self) -> CoordinatorResult<Namespace> {
        self.config.validate()?;
        let connection = ConnectionString::parse(&self.config.connection_string)?;

        info!(namespace = %connection.namespace, "Connecting to namespace");
        let namespace = bounded(
            "connect",
            self.config.operation_timeout(),
            self.connector.connect(&connection),
        )
        .await
        .map_err(|fault| {
            error!(namespace = %connection.namespace, error = %fault, "Connection failed");
            CoordinatorError::Connection(fault.to_string())
        })?;

        info!(namespace = %namespace.name(), "Connected");
        Ok(namespace)
    }

    pub async fn entities(&self) -> CoordinatorResult<EntityManager> {
        Ok(EntityManager::new(
            self.connect().await?,
            self.config.operation_timeout(),
        ))
    }

    pub async fn subscriptions(&self) -> CoordinatorResult<SubscriptionManager> {
        Ok(SubscriptionManager::new(
            self.connect().await?,
            self.config.operation_timeout(),
            self.config.tap_subscription.clone(),
        ))
    }

    pub async fn sender(&self) -> CoordinatorResult<MessageSender> {
        Ok(MessageSender::new(
            self.connect().await?,
            self.config.operation_timeout(),
        ))
    }

    pub async fn coordinator(&self) -> CoordinatorResult<ShutdownCoordinator> {
        Ok(ShutdownCoordinator::new(self.connect().await?, &self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryConnector;

    const RAW: &str = "Endpoint=sb://local.example/;SharedAccessKeyName=root;SharedAccessKey=k";

    #[tokio::test]
    async fn test_connect_returns_same_handle() {
        let config = CoordinatorConfig::default().with_connection_string(RAW);
        let client = NamespaceClient::new(config, Arc::new(InMemoryConnector::new()));

        let first = client.connect().await.unwrap();
        let second = client.connect().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.name(), "local");
    }

    #[tokio::test]
    async fn test_connect_failure_is_connection_error_and_not_cached() {
        let connector = Arc::new(InMemoryConnector::new());
        connector.set_reachable(false);
        let config = CoordinatorConfig::default().with_connection_string(RAW);
        let client = NamespaceClient::new(config, connector.clone());

        assert!(matches!(
            client.connect().await,
            Err(CoordinatorError::Connection(_))
        ));

        connector.set_reachable(true);
        assert!(client.connect().await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_connection_string_is_rejected() {
        let client = NamespaceClient::new(
            CoordinatorConfig::default(),
            Arc::new(InMemoryConnector::new()),
        );
        assert!(matches!(
            client.connect().await,
            Err(CoordinatorError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_connection_string() {
        let config = CoordinatorConfig::default().with_connection_string("Endpoint=http://x");
        let client = NamespaceClient::new(config, Arc::new(InMemoryConnector::new()));
        assert!(matches!(
            client.connect().await,
            Err(CoordinatorError::Connection(_))
        ));
    }
}
