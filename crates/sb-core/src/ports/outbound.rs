//! Outbound (driven) ports: what the coordinator needs from a broker.
//!
//! Adapters implement these; the services only ever see the traits.

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::ConnectionString;
use crate::domain::{
    BrokerFault, EntityListing, EntityPath, MessageEnvelope, OutboundMessage, QueueDescription,
    ReceivedMessage, Rule, SubscriptionDescription, TopicDescription,
};

/// Shared, read-only handle to one connected namespace.
pub type Namespace = Arc<dyn BrokerNamespace>;

/// How a receiver takes messages off an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveMode {
    /// Lock each message; the caller completes it after handling.
    PeekLock,
    /// Non-destructive cursor read. Nothing is locked or removed.
    Browse,
}

/// Factory for namespace connections (the transport).
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Perform the handshake with the namespace named by `connection`.
    async fn connect(&self, connection: &ConnectionString) -> Result<Namespace, BrokerFault>;
}

/// Administrative and data-plane calls against one namespace.
///
/// Every `get_*` returns `Ok(None)` for an absent entity; `delete_*` and
/// the rule calls return `BrokerFault::NotFound` instead.
#[async_trait]
pub trait BrokerNamespace: Send + Sync {
    /// Namespace name, for messages and logs.
    fn name(&self) -> &str;

    async fn get_topic(&self, name: &str) -> Result<Option<TopicDescription>, BrokerFault>;
    async fn create_topic(&self, topic: &TopicDescription) -> Result<(), BrokerFault>;
    async fn delete_topic(&self, name: &str) -> Result<(), BrokerFault>;
    async fn list_topics(&self) -> Result<Vec<EntityListing>, BrokerFault>;

    async fn get_queue(&self, name: &str) -> Result<Option<QueueDescription>, BrokerFault>;
    async fn create_queue(&self, queue: &QueueDescription) -> Result<(), BrokerFault>;
    async fn delete_queue(&self, name: &str) -> Result<(), BrokerFault>;
    async fn list_queues(&self) -> Result<Vec<EntityListing>, BrokerFault>;

    async fn get_subscription(
        &self,
        topic: &str,
        name: &str,
    ) -> Result<Option<SubscriptionDescription>, BrokerFault>;
    /// Creates the subscription with the broker default rule attached.
    async fn create_subscription(
        &self,
        subscription: &SubscriptionDescription,
    ) -> Result<(), BrokerFault>;
    async fn delete_subscription(&self, topic: &str, name: &str) -> Result<(), BrokerFault>;
    async fn list_subscriptions(&self, topic: &str) -> Result<Vec<EntityListing>, BrokerFault>;

    async fn list_rules(&self, topic: &str, subscription: &str) -> Result<Vec<Rule>, BrokerFault>;
    /// Insert or replace the rule with the same name.
    async fn put_rule(&self, topic: &str, subscription: &str, rule: &Rule)
        -> Result<(), BrokerFault>;
    async fn delete_rule(
        &self,
        topic: &str,
        subscription: &str,
        rule_name: &str,
    ) -> Result<(), BrokerFault>;

    /// Send to a topic or queue. Returns the broker message id.
    async fn send(&self, target: &EntityPath, message: OutboundMessage)
        -> Result<String, BrokerFault>;

    /// Open a receive loop on a queue or subscription.
    async fn open_receiver(
        &self,
        source: &EntityPath,
        mode: ReceiveMode,
    ) -> Result<Box<dyn MessageReceiver>, BrokerFault>;
}

/// One open receive loop, owned by exactly one listener.
#[async_trait]
pub trait MessageReceiver: Send {
    /// Wait for the next message.
    ///
    /// Returns `Ok(None)` once the source entity is gone or the receiver was
    /// closed. Must be cancel-safe: dropping the future before it resolves
    /// never consumes a message.
    async fn receive(&mut self) -> Result<Option<ReceivedMessage>, BrokerFault>;

    /// Acknowledge a locked message, removing it from the entity.
    async fn complete(&mut self, message: &ReceivedMessage) -> Result<(), BrokerFault>;

    /// Stop receiving and release any locks still held.
    async fn close(&mut self);
}

/// Sink for every message a listener handles.
///
/// The only data that leaves the core for display.
pub trait MessageObserver: Send + Sync {
    fn on_message(&self, envelope: &MessageEnvelope);
}

impl<F> MessageObserver for F
where
    F: Fn(&MessageEnvelope) + Send + Sync,
{
    fn on_message(&self, envelope: &MessageEnvelope) {
        self(envelope)
    }
}
