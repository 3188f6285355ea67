//! Subscription administration, rules and the tap lifecycle.

use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{BrokerCalls, ForwardingResolver};
use crate::domain::{
    validate_name, CoordinatorError, CoordinatorResult, EntityKind, EntityListing, EntityPath,
    Rule, SubscriptionDescription, SubscriptionRef, DEFAULT_RULE_NAME,
};
use crate::ports::Namespace;

/// A subscription a listener is attached to.
///
/// `owns_tap` is set only when this binding created the subscription as a
/// tap; [`SubscriptionManager::teardown_tap`] consumes the binding, so a
/// tap can be torn down at most once.
#[derive(Debug, PartialEq, Eq)]
pub struct SubscriptionBinding {
    topic: String,
    name: String,
    owns_tap: bool,
}

impl SubscriptionBinding {
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn owns_tap(&self) -> bool {
        self.owns_tap
    }

    #[must_use]
    pub fn path(&self) -> EntityPath {
        EntityPath::subscription(&self.topic, &self.name)
    }
}

/// Subscription CRUD scoped to a topic, plus rules and taps.
#[derive(Clone)]
pub struct SubscriptionManager {
    calls: BrokerCalls,
    resolver: ForwardingResolver,
    tap_name: String,
}

impl SubscriptionManager {
    pub fn new(namespace: Namespace, operation_timeout: Duration, tap_name: String) -> Self {
        Self {
            resolver: ForwardingResolver::new(namespace.clone(), operation_timeout),
            calls: BrokerCalls::new(namespace, operation_timeout),
            tap_name,
        }
    }

    /// Name given to auto-created tap subscriptions.
    #[must_use]
    pub fn tap_name(&self) -> &str {
        &self.tap_name
    }

    /// True if the subscription exists. A missing topic is `NotFound`.
    pub async fn exists(&self, topic: &str, name: &str) -> CoordinatorResult<bool> {
        validate_name("topic", topic)?;
        validate_name("subscription", name)?;
        let subscription = self
            .calls
            .call(
                "get_subscription",
                self.calls.namespace().get_subscription(topic, name),
            )
            .await?;
        Ok(subscription.is_some())
    }

    pub async fn get(&self, topic: &str, name: &str) -> CoordinatorResult<SubscriptionDescription> {
        validate_name("topic", topic)?;
        validate_name("subscription", name)?;
        self.calls
            .call(
                "get_subscription",
                self.calls.namespace().get_subscription(topic, name),
            )
            .await?
            .ok_or_else(|| CoordinatorError::NotFound {
                entity: EntityPath::subscription(topic, name),
                namespace: self.calls.namespace_name().to_string(),
            })
    }

    /// Create a subscription with its rules.
    ///
    /// Fails with `AlreadyExists` instead of overwriting. Forward targets
    /// are resolved before anything is created. Once any custom rule is
    /// attached the broker default rule is removed.
    pub async fn create(&self, subscription: &SubscriptionRef) -> CoordinatorResult<()> {
        let path = subscription.path();
        if self.exists(&subscription.topic, &subscription.name).await? {
            return Err(CoordinatorError::AlreadyExists {
                entity: path,
                namespace: self.calls.namespace_name().to_string(),
            });
        }

        let forward_to = self
            .resolver
            .resolve_optional(subscription.forward_to.as_deref(), EntityKind::Topic)
            .await?;
        let forward_dead_letter_to = self
            .resolver
            .resolve_optional(
                subscription.forward_dead_letter_to.as_deref(),
                EntityKind::Topic,
            )
            .await?;

        let description = SubscriptionDescription {
            topic: subscription.topic.clone(),
            name: subscription.name.clone(),
            settings: subscription.settings.clone(),
            forward_to,
            forward_dead_letter_to,
        };
        self.calls
            .call(
                "create_subscription",
                self.calls.namespace().create_subscription(&description),
            )
            .await
            .inspect_err(|e| {
                error!(
                    topic = %subscription.topic,
                    subscription = %subscription.name,
                    error = %e,
                    "Subscription create failed"
                )
            })?;

        info!(
            topic = %subscription.topic,
            subscription = %subscription.name,
            rules = subscription.rules.len(),
            "Subscription created"
        );

        for rule in subscription.rules.iter() {
            if let Err(e) = self
                .add_rule(&subscription.topic, &subscription.name, rule)
                .await
            {
                self.roll_back(&subscription.topic, &subscription.name, &rule.name)
                    .await;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Best-effort delete of a subscription whose rules could not be put.
    /// Left in place it would keep only the catch-all default rule.
    async fn roll_back(&self, topic: &str, name: &str, rule: &str) {
        let deleted = self
            .calls
            .call(
                "delete_subscription",
                self.calls.namespace().delete_subscription(topic, name),
            )
            .await;
        match deleted {
            Ok(()) => error!(
                topic = %topic,
                subscription = %name,
                rule = %rule,
                "Rule put failed, subscription deleted"
            ),
            Err(e) => error!(
                topic = %topic,
                subscription = %name,
                rule = %rule,
                error = %e,
                "Rule put failed and the subscription could not be deleted"
            ),
        }
    }

    /// Put `rule`, then drop the broker default rule if a custom rule now
    /// exists next to it.
    pub async fn add_rule(&self, topic: &str, name: &str, rule: &Rule) -> CoordinatorResult<()> {
        validate_name("rule", &rule.name)?;
        let namespace = self.calls.namespace();

        let mut effective = rule.clone();
        effective.filter = rule.effective_filter().to_string();
        self.calls
            .call("put_rule", namespace.put_rule(topic, name, &effective))
            .await?;
        debug!(topic = %topic, subscription = %name, rule = %rule.name, "Rule added");

        let rules = self
            .calls
            .call("list_rules", namespace.list_rules(topic, name))
            .await?;
        let has_custom = rules.iter().any(|r| !r.is_default());
        let has_default = rules.iter().any(Rule::is_default);
        if has_custom && has_default {
            self.calls
                .call(
                    "delete_rule",
                    namespace.delete_rule(topic, name, DEFAULT_RULE_NAME),
                )
                .await?;
            debug!(topic = %topic, subscription = %name, "Default rule removed");
        }
        Ok(())
    }

    pub async fn rules(&self, topic: &str, name: &str) -> CoordinatorResult<Vec<Rule>> {
        self.calls
            .call("list_rules", self.calls.namespace().list_rules(topic, name))
            .await
    }

    pub async fn delete(&self, topic: &str, name: &str) -> CoordinatorResult<()> {
        validate_name("topic", topic)?;
        validate_name("subscription", name)?;
        self.calls
            .call(
                "delete_subscription",
                self.calls.namespace().delete_subscription(topic, name),
            )
            .await?;
        info!(topic = %topic, subscription = %name, "Subscription deleted");
        Ok(())
    }

    pub async fn list(&self, topic: &str) -> CoordinatorResult<Vec<EntityListing>> {
        validate_name("topic", topic)?;
        self.calls
            .call(
                "list_subscriptions",
                self.calls.namespace().list_subscriptions(topic),
            )
            .await
    }

    /// Attach to `topic/name`, creating it as a pass-through tap when it is
    /// missing and `is_tap` is set. Without `is_tap` a missing subscription
    /// is `NotFound`; subscriptions are never created implicitly.
    pub async fn ensure(
        &self,
        topic: &str,
        name: &str,
        is_tap: bool,
    ) -> CoordinatorResult<SubscriptionBinding> {
        let binding = |owns_tap| SubscriptionBinding {
            topic: topic.to_string(),
            name: name.to_string(),
            owns_tap,
        };

        if self.exists(topic, name).await? {
            return Ok(binding(false));
        }
        if !is_tap {
            return Err(CoordinatorError::NotFound {
                entity: EntityPath::subscription(topic, name),
                namespace: self.calls.namespace_name().to_string(),
            });
        }

        match self.create(&SubscriptionRef::new(topic, name)).await {
            Ok(()) => {
                info!(topic = %topic, subscription = %name, "Tap subscription created");
                Ok(binding(true))
            }
            // Created concurrently by someone else; theirs to delete.
            Err(e) if e.is_already_exists() => Ok(binding(false)),
            Err(e) => Err(e),
        }
    }

    /// Delete a tap this process created. Bindings that do not own a tap
    /// are left alone. Returns whether a subscription was deleted.
    pub async fn teardown_tap(&self, binding: SubscriptionBinding) -> CoordinatorResult<bool> {
        if !binding.owns_tap {
            return Ok(false);
        }
        match self.delete(&binding.topic, &binding.name).await {
            Ok(()) => {
                info!(
                    topic = %binding.topic,
                    subscription = %binding.name,
                    "Tap subscription deleted"
                );
                Ok(true)
            }
            Err(e) if e.is_not_found() => {
                warn!(
                    topic = %binding.topic,
                    subscription = %binding.name,
                    "Tap subscription already gone"
                );
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BrokerFault, TopicRef};
    use crate::service::{test_support, EntityManager};

    async fn managers() -> (EntityManager, SubscriptionManager) {
        let (_, namespace) = test_support::namespace();
        let timeout = Duration::from_secs(5);
        let entities = EntityManager::new(namespace.clone(), timeout);
        entities.create_topic(&TopicRef::new("events")).await.unwrap();
        (
            entities,
            SubscriptionManager::new(namespace, timeout, "tap".into()),
        )
    }

    #[tokio::test]
    async fn test_no_rules_keeps_default() {
        let (_, subs) = managers().await;
        subs.create(&SubscriptionRef::new("events", "all")).await.unwrap();
        assert_eq!(
            subs.rules("events", "all").await.unwrap(),
            vec![Rule::default_rule()]
        );
    }

    #[tokio::test]
    async fn test_custom_rules_remove_default() {
        let (_, subs) = managers().await;
        let sub = SubscriptionRef::new("events", "eu")
            .with_rule("region:Region = 'eu'")
            .with_rule("region:AND Priority > 3")
            .with_rule("tag::SET Tagged = 1");
        subs.create(&sub).await.unwrap();

        let rules = subs.rules("events", "eu").await.unwrap();
        assert_eq!(rules.len(), 2);
        assert!(rules.iter().all(|r| !r.is_default()));
        assert_eq!(rules[0].filter, "Region = 'eu' AND Priority > 3");
        assert_eq!(rules[1].filter, "1=1");
        assert_eq!(rules[1].action.as_deref(), Some("SET Tagged = 1"));
    }

    #[tokio::test]
    async fn test_create_twice_is_already_exists() {
        let (_, subs) = managers().await;
        subs.create(&SubscriptionRef::new("events", "audit")).await.unwrap();
        let err = subs
            .create(&SubscriptionRef::new("events", "audit"))
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_create_on_missing_topic_is_not_found() {
        let (_, subs) = managers().await;
        let err = subs
            .create(&SubscriptionRef::new("ghost", "audit"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::NotFound { entity: EntityPath::Topic(ref t), .. } if t == "ghost"
        ));
    }

    #[tokio::test]
    async fn test_forward_target_must_exist() {
        let (entities, subs) = managers().await;
        let err = subs
            .create(&SubscriptionRef::new("events", "relay").forward_to("audit-topic"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::ForwardTargetNotFound { .. }));
        assert!(!subs.exists("events", "relay").await.unwrap());

        entities
            .create_topic(&TopicRef::new("audit-topic"))
            .await
            .unwrap();
        subs.create(&SubscriptionRef::new("events", "relay").forward_to("audit-topic"))
            .await
            .unwrap();
        let relay = subs.get("events", "relay").await.unwrap();
        assert_eq!(relay.forward_to.map(|f| f.kind), Some(EntityKind::Topic));
    }

    #[tokio::test]
    async fn test_rejected_rule_removes_subscription() {
        let (_, subs) = managers().await;
        let broken = SubscriptionRef::new("events", "eu")
            .with_rule("region:Region = 'eu'")
            .with_rule("tier:Tier = 'gold");
        let err = subs.create(&broken).await.unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::Broker(BrokerFault::InvalidFilter { .. })
        ));
        assert!(!subs.exists("events", "eu").await.unwrap());

        let fixed = SubscriptionRef::new("events", "eu").with_rule("tier:Tier = 'gold'");
        subs.create(&fixed).await.unwrap();
        let rules = subs.rules("events", "eu").await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name, "tier");
    }

    #[tokio::test]
    async fn test_ensure_non_tap_never_creates() {
        let (_, subs) = managers().await;
        let err = subs.ensure("events", "audit", false).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!subs.exists("events", "audit").await.unwrap());
    }

    #[tokio::test]
    async fn test_tap_lifecycle() {
        let (_, subs) = managers().await;

        let binding = subs.ensure("events", "tap", true).await.unwrap();
        assert!(binding.owns_tap());
        assert!(subs.exists("events", "tap").await.unwrap());

        // A second attach to the live tap does not take ownership.
        let second = subs.ensure("events", "tap", true).await.unwrap();
        assert!(!second.owns_tap());
        assert!(!subs.teardown_tap(second).await.unwrap());
        assert!(subs.exists("events", "tap").await.unwrap());

        assert!(subs.teardown_tap(binding).await.unwrap());
        assert!(!subs.exists("events", "tap").await.unwrap());
    }

    #[tokio::test]
    async fn test_teardown_skips_existing_subscription() {
        let (_, subs) = managers().await;
        subs.create(&SubscriptionRef::new("events", "audit")).await.unwrap();

        let binding = subs.ensure("events", "audit", true).await.unwrap();
        assert!(!subs.teardown_tap(binding).await.unwrap());
        assert!(subs.exists("events", "audit").await.unwrap());
    }
}
