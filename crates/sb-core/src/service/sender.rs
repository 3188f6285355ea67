//! Message sends to topics and queues.

use std::time::Duration;
use tracing::{error, info};

use super::BrokerCalls;
use crate::domain::{
    CoordinatorError, CoordinatorResult, EntityPath, OutboundMessage, Properties, SentMessage,
};
use crate::ports::Namespace;

/// Sends JSON bodies with user properties.
#[derive(Clone)]
pub struct MessageSender {
    calls: BrokerCalls,
}

impl MessageSender {
    pub fn new(namespace: Namespace, operation_timeout: Duration) -> Self {
        Self {
            calls: BrokerCalls::new(namespace, operation_timeout),
        }
    }

    /// Send `body` as indented JSON to a topic or queue.
    ///
    /// The target must exist. Returns the message id and the exact body
    /// that was transmitted.
    pub async fn send(
        &self,
        target: &EntityPath,
        body: &serde_json::Value,
        label: Option<&str>,
        properties: Properties,
    ) -> CoordinatorResult<SentMessage> {
        let namespace = self.calls.namespace();
        let exists = match target {
            EntityPath::Topic(name) => self
                .calls
                .call("get_topic", namespace.get_topic(name))
                .await?
                .is_some(),
            EntityPath::Queue(name) => self
                .calls
                .call("get_queue", namespace.get_queue(name))
                .await?
                .is_some(),
            EntityPath::Subscription { .. } => {
                return Err(CoordinatorError::InvalidArgument(format!(
                    "cannot send to {target}, send to its topic instead"
                )))
            }
        };
        if !exists {
            return Err(CoordinatorError::NotFound {
                entity: target.clone(),
                namespace: self.calls.namespace_name().to_string(),
            });
        }

        let serialized = serde_json::to_string_pretty(body)?;
        let mut message =
            OutboundMessage::new(serialized.clone().into_bytes()).with_properties(properties);
        if let Some(label) = label.filter(|l| !l.is_empty()) {
            message = message.with_label(label);
        }

        let message_id = self
            .calls
            .call("send", namespace.send(target, message))
            .await
            .inspect_err(|e| error!(target = %target, error = %e, "Send failed"))?;

        info!(target = %target, message_id = %message_id, "Message sent");
        Ok(SentMessage {
            message_id,
            body: serialized,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{uno_properties, QueueRef};
    use crate::ports::{BrokerNamespace, ReceiveMode};
    use crate::service::{test_support, EntityManager};

    #[tokio::test]
    async fn test_send_returns_indented_body() {
        let (memory, namespace) = test_support::namespace();
        let timeout = Duration::from_secs(5);
        EntityManager::new(namespace.clone(), timeout)
            .create_queue(&QueueRef::new("jobs"))
            .await
            .unwrap();
        let sender = MessageSender::new(namespace, timeout);

        let body = serde_json::json!({"a": 1});
        let sent = sender
            .send(
                &EntityPath::queue("jobs"),
                &body,
                Some("jobs"),
                uno_properties(""),
            )
            .await
            .unwrap();
        assert_eq!(sent.body, "{\n  \"a\": 1\n}");

        let mut receiver = memory
            .open_receiver(&EntityPath::queue("jobs"), ReceiveMode::PeekLock)
            .await
            .unwrap();
        let received = receiver.receive().await.unwrap().unwrap();
        assert_eq!(received.message_id, sent.message_id);
        assert_eq!(received.label.as_deref(), Some("jobs"));
        assert_eq!(received.body, sent.body.as_bytes());
        assert_eq!(received.properties["Serialization"].as_str(), Some("1"));
    }

    #[tokio::test]
    async fn test_send_to_missing_target() {
        let (_, namespace) = test_support::namespace();
        let sender = MessageSender::new(namespace, Duration::from_secs(5));
        let err = sender
            .send(
                &EntityPath::topic("ghost"),
                &serde_json::json!({}),
                None,
                Properties::new(),
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_send_to_subscription_is_invalid() {
        let (_, namespace) = test_support::namespace();
        let sender = MessageSender::new(namespace, Duration::from_secs(5));
        let err = sender
            .send(
                &EntityPath::subscription("events", "tap"),
                &serde_json::json!({}),
                None,
                Properties::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidArgument(_)));
    }
}
