//! Topic and queue administration.

use std::time::Duration;
use tracing::{error, info};

use super::{BrokerCalls, ForwardingResolver};
use crate::domain::{
    validate_name, CoordinatorError, CoordinatorResult, EntityKind, EntityListing, EntityPath,
    QueueDescription, QueueRef, TopicDescription, TopicRef,
};
use crate::ports::Namespace;

/// Existence checks, create, delete and listing for topics and queues.
///
/// Every call asks the broker; nothing is cached between calls.
#[derive(Clone)]
pub struct EntityManager {
    calls: BrokerCalls,
    resolver: ForwardingResolver,
}

impl EntityManager {
    pub fn new(namespace: Namespace, operation_timeout: Duration) -> Self {
        Self {
            resolver: ForwardingResolver::new(namespace.clone(), operation_timeout),
            calls: BrokerCalls::new(namespace, operation_timeout),
        }
    }

    pub async fn exists(&self, kind: EntityKind, name: &str) -> CoordinatorResult<bool> {
        match kind {
            EntityKind::Topic => self.topic_exists(name).await,
            EntityKind::Queue => self.queue_exists(name).await,
        }
    }

    pub async fn topic_exists(&self, name: &str) -> CoordinatorResult<bool> {
        validate_name("topic", name)?;
        let topic = self
            .calls
            .call("get_topic", self.calls.namespace().get_topic(name))
            .await?;
        Ok(topic.is_some())
    }

    pub async fn queue_exists(&self, name: &str) -> CoordinatorResult<bool> {
        validate_name("queue", name)?;
        let queue = self
            .calls
            .call("get_queue", self.calls.namespace().get_queue(name))
            .await?;
        Ok(queue.is_some())
    }

    /// Fail with `NotFound` unless the entity exists.
    pub async fn require(&self, kind: EntityKind, name: &str) -> CoordinatorResult<()> {
        if self.exists(kind, name).await? {
            Ok(())
        } else {
            Err(self.not_found(EntityPath::of_kind(kind, name)))
        }
    }

    /// Create a topic. An existing topic is never overwritten.
    pub async fn create_topic(&self, topic: &TopicRef) -> CoordinatorResult<()> {
        let path = EntityPath::topic(&topic.name);
        if self.topic_exists(&topic.name).await? {
            return Err(self.already_exists(path));
        }

        let description = TopicDescription {
            name: topic.name.clone(),
            settings: topic.settings.clone(),
        };
        self.calls
            .call("create_topic", self.calls.namespace().create_topic(&description))
            .await
            .inspect_err(|e| error!(topic = %topic.name, error = %e, "Topic create failed"))?;

        info!(topic = %topic.name, namespace = %self.calls.namespace_name(), "Topic created");
        Ok(())
    }

    /// Create a queue. Forward targets are resolved first; a missing
    /// target leaves nothing created.
    pub async fn create_queue(&self, queue: &QueueRef) -> CoordinatorResult<()> {
        let path = EntityPath::queue(&queue.name);
        if self.queue_exists(&queue.name).await? {
            return Err(self.already_exists(path));
        }

        let forward_to = self
            .resolver
            .resolve_optional(queue.forward_to.as_deref(), EntityKind::Queue)
            .await?;
        let forward_dead_letter_to = self
            .resolver
            .resolve_optional(queue.forward_dead_letter_to.as_deref(), EntityKind::Queue)
            .await?;

        let description = QueueDescription {
            name: queue.name.clone(),
            settings: queue.settings.clone(),
            forward_to,
            forward_dead_letter_to,
        };
        self.calls
            .call("create_queue", self.calls.namespace().create_queue(&description))
            .await
            .inspect_err(|e| error!(queue = %queue.name, error = %e, "Queue create failed"))?;

        info!(
            queue = %queue.name,
            namespace = %self.calls.namespace_name(),
            forward_to = ?description.forward_to.as_ref().map(ToString::to_string),
            "Queue created"
        );
        Ok(())
    }

    pub async fn delete_topic(&self, name: &str) -> CoordinatorResult<()> {
        validate_name("topic", name)?;
        self.calls
            .call("delete_topic", self.calls.namespace().delete_topic(name))
            .await?;
        info!(topic = %name, "Topic deleted");
        Ok(())
    }

    pub async fn delete_queue(&self, name: &str) -> CoordinatorResult<()> {
        validate_name("queue", name)?;
        self.calls
            .call("delete_queue", self.calls.namespace().delete_queue(name))
            .await?;
        info!(queue = %name, "Queue deleted");
        Ok(())
    }

    pub async fn list_topics(&self) -> CoordinatorResult<Vec<EntityListing>> {
        self.calls
            .call("list_topics", self.calls.namespace().list_topics())
            .await
    }

    pub async fn list_queues(&self) -> CoordinatorResult<Vec<EntityListing>> {
        self.calls
            .call("list_queues", self.calls.namespace().list_queues())
            .await
    }

    pub async fn topic(&self, name: &str) -> CoordinatorResult<TopicDescription> {
        validate_name("topic", name)?;
        self.calls
            .call("get_topic", self.calls.namespace().get_topic(name))
            .await?
            .ok_or_else(|| self.not_found(EntityPath::topic(name)))
    }

    pub async fn queue(&self, name: &str) -> CoordinatorResult<QueueDescription> {
        validate_name("queue", name)?;
        self.calls
            .call("get_queue", self.calls.namespace().get_queue(name))
            .await?
            .ok_or_else(|| self.not_found(EntityPath::queue(name)))
    }

    fn not_found(&self, entity: EntityPath) -> CoordinatorError {
        CoordinatorError::NotFound {
            entity,
            namespace: self.calls.namespace_name().to_string(),
        }
    }

    fn already_exists(&self, entity: EntityPath) -> CoordinatorError {
        CoordinatorError::AlreadyExists {
            entity,
            namespace: self.calls.namespace_name().to_string(),
        }
    }
}
