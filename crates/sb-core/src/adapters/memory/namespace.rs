//! # In-Memory Namespace
//!
//! Topics fan out to subscriptions through their rules; queues hold
//! messages for competing receivers. Auto-forwarding and dead-letter
//! forwarding are applied on delivery.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::filter::SqlFilter;
use super::receiver::InMemoryReceiver;
use super::snapshot::{NamespaceSnapshot, QueueSnapshot, SubscriptionSnapshot, TopicSnapshot};
use super::store::{EntityStore, StoredMessage};
use crate::domain::{
    BrokerFault, EntityListing, EntityPath, ForwardDirective, OutboundMessage, QueueDescription,
    Rule, SubscriptionDescription, TopicDescription,
};
use crate::ports::{BrokerNamespace, MessageReceiver, ReceiveMode};

/// Relays a message may take before it is dead-lettered where it stands.
pub const MAX_FORWARD_HOPS: u8 = 4;

struct CompiledRule {
    rule: Rule,
    filter: SqlFilter,
}

impl CompiledRule {
    fn compile(rule: Rule) -> Result<Self, BrokerFault> {
        let filter = SqlFilter::parse(rule.effective_filter())?;
        Ok(Self { rule, filter })
    }
}

struct SubscriptionEntry {
    description: SubscriptionDescription,
    rules: Vec<CompiledRule>,
    store: Arc<EntityStore>,
}

struct TopicEntry {
    description: TopicDescription,
    subscriptions: BTreeMap<String, SubscriptionEntry>,
}

struct QueueEntry {
    description: QueueDescription,
    store: Arc<EntityStore>,
}

#[derive(Default)]
struct NamespaceState {
    topics: BTreeMap<String, TopicEntry>,
    queues: BTreeMap<String, QueueEntry>,
}

impl NamespaceState {
    fn name_taken(&self, name: &str) -> bool {
        self.topics.contains_key(name) || self.queues.contains_key(name)
    }

    fn require_target(&self, forward: Option<&ForwardDirective>) -> Result<(), BrokerFault> {
        let Some(forward) = forward else {
            return Ok(());
        };
        let exists = match forward.path() {
            EntityPath::Topic(name) => self.topics.contains_key(&name),
            EntityPath::Queue(name) => self.queues.contains_key(&name),
            EntityPath::Subscription { .. } => false,
        };
        if exists {
            Ok(())
        } else {
            Err(BrokerFault::NotFound(forward.path()))
        }
    }

    fn subscription(&self, topic: &str, name: &str) -> Result<&SubscriptionEntry, BrokerFault> {
        self.topics
            .get(topic)
            .ok_or_else(|| BrokerFault::NotFound(EntityPath::topic(topic)))?
            .subscriptions
            .get(name)
            .ok_or_else(|| BrokerFault::NotFound(EntityPath::subscription(topic, name)))
    }

    fn subscription_mut(
        &mut self,
        topic: &str,
        name: &str,
    ) -> Result<&mut SubscriptionEntry, BrokerFault> {
        self.topics
            .get_mut(topic)
            .ok_or_else(|| BrokerFault::NotFound(EntityPath::topic(topic)))?
            .subscriptions
            .get_mut(name)
            .ok_or_else(|| BrokerFault::NotFound(EntityPath::subscription(topic, name)))
    }

    /// Store and dead-letter forward of a queue or subscription.
    fn receivable(
        &self,
        path: &EntityPath,
    ) -> Result<(Arc<EntityStore>, Option<ForwardDirective>), BrokerFault> {
        match path {
            EntityPath::Queue(name) => self
                .queues
                .get(name)
                .map(|q| (q.store.clone(), q.description.forward_dead_letter_to.clone()))
                .ok_or_else(|| BrokerFault::NotFound(path.clone())),
            EntityPath::Subscription { topic, name } => self.subscription(topic, name).map(|s| {
                (s.store.clone(), s.description.forward_dead_letter_to.clone())
            }),
            EntityPath::Topic(name) => Err(BrokerFault::Rejected(format!(
                "topic {name} cannot be received from, use one of its subscriptions"
            ))),
        }
    }

    fn deliver(
        &self,
        target: &EntityPath,
        message: OutboundMessage,
        hops: u8,
    ) -> Result<(), BrokerFault> {
        match target {
            EntityPath::Queue(name) => {
                let queue = self
                    .queues
                    .get(name)
                    .ok_or_else(|| BrokerFault::NotFound(target.clone()))?;
                self.route(
                    target,
                    &queue.store,
                    queue.description.forward_to.as_ref(),
                    message,
                    hops,
                );
                Ok(())
            }
            EntityPath::Topic(name) => {
                let topic = self
                    .topics
                    .get(name)
                    .ok_or_else(|| BrokerFault::NotFound(target.clone()))?;
                for (sub_name, sub) in &topic.subscriptions {
                    if sub.rules.iter().any(|r| r.filter.matches(&message)) {
                        self.route(
                            &EntityPath::subscription(name, sub_name),
                            &sub.store,
                            sub.description.forward_to.as_ref(),
                            message.clone(),
                            hops,
                        );
                    }
                }
                Ok(())
            }
            EntityPath::Subscription { .. } => Err(BrokerFault::Rejected(format!(
                "{target} cannot be sent to directly"
            ))),
        }
    }

    /// Enqueue locally or relay along the entity's forward.
    fn route(
        &self,
        at: &EntityPath,
        store: &EntityStore,
        forward: Option<&ForwardDirective>,
        message: OutboundMessage,
        hops: u8,
    ) {
        let Some(forward) = forward else {
            store.enqueue(message);
            return;
        };
        if hops >= MAX_FORWARD_HOPS {
            warn!(entity = %at, "Forwarding hop limit reached, dead-lettering");
            store.dead_letter_new(message);
            return;
        }
        if let Err(e) = self.deliver(&forward.path(), message.clone(), hops + 1) {
            warn!(entity = %at, target = %forward, error = %e, "Forward failed, dead-lettering");
            store.dead_letter_new(message);
        }
    }
}

pub(super) struct Shared {
    name: String,
    state: RwLock<NamespaceState>,
    reachable: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

impl Shared {
    /// Park a message that ran out of deliveries.
    pub(super) fn route_dead_letter(&self, source: &EntityPath, message: StoredMessage) {
        let state = self.state.read();
        let Ok((store, forward)) = state.receivable(source) else {
            debug!(entity = %source, "Source gone, dropping dead letter");
            return;
        };
        match forward {
            None => store.dead_letter(message),
            Some(target) => {
                if let Err(e) = state.deliver(&target.path(), message.clone().into_outbound(), 1) {
                    warn!(entity = %source, target = %target, error = %e, "Dead-letter forward failed");
                    store.dead_letter(message);
                }
            }
        }
    }
}

/// Broker namespace held entirely in process memory.
///
/// Cloning shares the same namespace.
#[derive(Clone)]
pub struct InMemoryNamespace {
    shared: Arc<Shared>,
}

impl InMemoryNamespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                state: RwLock::new(NamespaceState::default()),
                reachable: AtomicBool::new(true),
                latency: Mutex::new(None),
            }),
        }
    }

    /// Simulate an outage: every call fails with `Unreachable` while false.
    pub fn set_reachable(&self, reachable: bool) {
        self.shared.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Delay every administrative call and send by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.shared.latency.lock() = latency;
    }

    async fn gate(&self) -> Result<(), BrokerFault> {
        let latency = *self.shared.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.shared.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerFault::Unreachable(format!(
                "namespace {} is not reachable",
                self.shared.name
            )))
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> NamespaceSnapshot {
        let state = self.shared.state.read();
        NamespaceSnapshot {
            name: self.shared.name.clone(),
            topics: state
                .topics
                .values()
                .map(|topic| TopicSnapshot {
                    description: topic.description.clone(),
                    subscriptions: topic
                        .subscriptions
                        .values()
                        .map(|sub| SubscriptionSnapshot {
                            description: sub.description.clone(),
                            rules: sub.rules.iter().map(|r| r.rule.clone()).collect(),
                            messages: sub.store.snapshot(),
                        })
                        .collect(),
                })
                .collect(),
            queues: state
                .queues
                .values()
                .map(|queue| QueueSnapshot {
                    description: queue.description.clone(),
                    messages: queue.store.snapshot(),
                })
                .collect(),
        }
    }

    /// Rebuild a namespace from a snapshot. Filters are compiled again.
    pub fn restore(snapshot: NamespaceSnapshot) -> Result<Self, BrokerFault> {
        let namespace = Self::new(snapshot.name);
        {
            let mut state = namespace.shared.state.write();
            for topic in snapshot.topics {
                let mut subscriptions = BTreeMap::new();
                for sub in topic.subscriptions {
                    let rules = sub
                        .rules
                        .into_iter()
                        .map(CompiledRule::compile)
                        .collect::<Result<Vec<_>, _>>()?;
                    let store = EntityStore::from_snapshot(
                        sub.description.settings.max_delivery_count,
                        sub.messages,
                    );
                    subscriptions.insert(
                        sub.description.name.clone(),
                        SubscriptionEntry {
                            description: sub.description,
                            rules,
                            store,
                        },
                    );
                }
                state.topics.insert(
                    topic.description.name.clone(),
                    TopicEntry {
                        description: topic.description,
                        subscriptions,
                    },
                );
            }
            for queue in snapshot.queues {
                let store = EntityStore::from_snapshot(
                    queue.description.settings.max_delivery_count,
                    queue.messages,
                );
                state.queues.insert(
                    queue.description.name.clone(),
                    QueueEntry {
                        description: queue.description,
                        store,
                    },
                );
            }
        }
        Ok(namespace)
    }
}

fn listing(name: &str, forward: Option<&ForwardDirective>, store: &EntityStore) -> EntityListing {
    let (active_count, dead_letter_count) = store.counts();
    EntityListing {
        name: name.to_string(),
        forward_to: forward.map(|f| f.name.clone()),
        active_count,
        dead_letter_count,
        scheduled_count: 0,
    }
}

#[async_trait]
impl BrokerNamespace for InMemoryNamespace {
    fn name(&self) -> &str {
        &self.shared.name
    }

    async fn get_topic(&self, name: &str) -> Result<Option<TopicDescription>, BrokerFault> {
        self.gate().await?;
        let state = self.shared.state.read();
        Ok(state.topics.get(name).map(|t| t.description.clone()))
    }

    async fn create_topic(&self, topic: &TopicDescription) -> Result<(), BrokerFault> {
        self.gate().await?;
        let mut state = self.shared.state.write();
        if state.name_taken(&topic.name) {
            return Err(BrokerFault::AlreadyExists(EntityPath::topic(&topic.name)));
        }
        state.topics.insert(
            topic.name.clone(),
            TopicEntry {
                description: topic.clone(),
                subscriptions: BTreeMap::new(),
            },
        );
        debug!(topic = %topic.name, "Topic created");
        Ok(())
    }

    async fn delete_topic(&self, name: &str) -> Result<(), BrokerFault> {
        self.gate().await?;
        let mut state = self.shared.state.write();
        state
            .topics
            .remove(name)
            .ok_or_else(|| BrokerFault::NotFound(EntityPath::topic(name)))?;
        debug!(topic = %name, "Topic deleted");
        Ok(())
    }

    async fn list_topics(&self) -> Result<Vec<EntityListing>, BrokerFault> {
        self.gate().await?;
        let state = self.shared.state.read();
        Ok(state
            .topics
            .values()
            .map(|topic| {
                let (active_count, dead_letter_count) = topic
                    .subscriptions
                    .values()
                    .map(|s| s.store.counts())
                    .fold((0, 0), |acc, c| (acc.0 + c.0, acc.1 + c.1));
                EntityListing {
                    name: topic.description.name.clone(),
                    forward_to: None,
                    active_count,
                    dead_letter_count,
                    scheduled_count: 0,
                }
            })
            .collect())
    }

    async fn get_queue(&self, name: &str) -> Result<Option<QueueDescription>, BrokerFault> {
        self.gate().await?;
        let state = self.shared.state.read();
        Ok(state.queues.get(name).map(|q| q.description.clone()))
    }

    async fn create_queue(&self, queue: &QueueDescription) -> Result<(), BrokerFault> {
        self.gate().await?;
        let mut state = self.shared.state.write();
        if state.name_taken(&queue.name) {
            return Err(BrokerFault::AlreadyExists(EntityPath::queue(&queue.name)));
        }
        state.require_target(queue.forward_to.as_ref())?;
        state.require_target(queue.forward_dead_letter_to.as_ref())?;
        state.queues.insert(
            queue.name.clone(),
            QueueEntry {
                description: queue.clone(),
                store: EntityStore::new(queue.settings.max_delivery_count),
            },
        );
        debug!(queue = %queue.name, "Queue created");
        Ok(())
    }

    async fn delete_queue(&self, name: &str) -> Result<(), BrokerFault> {
        self.gate().await?;
        let mut state = self.shared.state.write();
        state
            .queues
            .remove(name)
            .ok_or_else(|| BrokerFault::NotFound(EntityPath::queue(name)))?;
        debug!(queue = %name, "Queue deleted");
        Ok(())
    }

    async fn list_queues(&self) -> Result<Vec<EntityListing>, BrokerFault> {
        self.gate().await?;
        let state = self.shared.state.read();
        Ok(state
            .queues
            .values()
            .map(|q| listing(&q.description.name, q.description.forward_to.as_ref(), &q.store))
            .collect())
    }

    async fn get_subscription(
        &self,
        topic: &str,
        name: &str,
    ) -> Result<Option<SubscriptionDescription>, BrokerFault> {
        self.gate().await?;
        let state = self.shared.state.read();
        let topic = state
            .topics
            .get(topic)
            .ok_or_else(|| BrokerFault::NotFound(EntityPath::topic(topic)))?;
        Ok(topic.subscriptions.get(name).map(|s| s.description.clone()))
    }

    async fn create_subscription(
        &self,
        subscription: &SubscriptionDescription,
    ) -> Result<(), BrokerFault> {
        self.gate().await?;
        let mut state = self.shared.state.write();
        state.require_target(subscription.forward_to.as_ref())?;
        state.require_target(subscription.forward_dead_letter_to.as_ref())?;
        let topic = state
            .topics
            .get_mut(&subscription.topic)
            .ok_or_else(|| BrokerFault::NotFound(EntityPath::topic(&subscription.topic)))?;
        if topic.subscriptions.contains_key(&subscription.name) {
            return Err(BrokerFault::AlreadyExists(EntityPath::subscription(
                &subscription.topic,
                &subscription.name,
            )));
        }
        topic.subscriptions.insert(
            subscription.name.clone(),
            SubscriptionEntry {
                description: subscription.clone(),
                rules: vec![CompiledRule::compile(Rule::default_rule())?],
                store: EntityStore::new(subscription.settings.max_delivery_count),
            },
        );
        debug!(
            topic = %subscription.topic,
            subscription = %subscription.name,
            "Subscription created"
        );
        Ok(())
    }

    async fn delete_subscription(&self, topic: &str, name: &str) -> Result<(), BrokerFault> {
        self.gate().await?;
        let mut state = self.shared.state.write();
        state
            .topics
            .get_mut(topic)
            .ok_or_else(|| BrokerFault::NotFound(EntityPath::topic(topic)))?
            .subscriptions
            .remove(name)
            .ok_or_else(|| BrokerFault::NotFound(EntityPath::subscription(topic, name)))?;
        debug!(topic = %topic, subscription = %name, "Subscription deleted");
        Ok(())
    }

    async fn list_subscriptions(&self, topic: &str) -> Result<Vec<EntityListing>, BrokerFault> {
        self.gate().await?;
        let state = self.shared.state.read();
        let topic = state
            .topics
            .get(topic)
            .ok_or_else(|| BrokerFault::NotFound(EntityPath::topic(topic)))?;
        Ok(topic
            .subscriptions
            .values()
            .map(|s| listing(&s.description.name, s.description.forward_to.as_ref(), &s.store))
            .collect())
    }

    async fn list_rules(&self, topic: &str, subscription: &str) -> Result<Vec<Rule>, BrokerFault> {
        self.gate().await?;
        let state = self.shared.state.read();
        let entry = state.subscription(topic, subscription)?;
        Ok(entry.rules.iter().map(|r| r.rule.clone()).collect())
    }

    async fn put_rule(
        &self,
        topic: &str,
        subscription: &str,
        rule: &Rule,
    ) -> Result<(), BrokerFault> {
        self.gate().await?;
        let compiled = CompiledRule::compile(rule.clone())?;
        let mut state = self.shared.state.write();
        let entry = state.subscription_mut(topic, subscription)?;
        match entry.rules.iter_mut().find(|r| r.rule.name == rule.name) {
            Some(existing) => *existing = compiled,
            None => entry.rules.push(compiled),
        }
        debug!(topic = %topic, subscription = %subscription, rule = %rule.name, "Rule put");
        Ok(())
    }

    async fn delete_rule(
        &self,
        topic: &str,
        subscription: &str,
        rule_name: &str,
    ) -> Result<(), BrokerFault> {
        self.gate().await?;
        let mut state = self.shared.state.write();
        let entry = state.subscription_mut(topic, subscription)?;
        let before = entry.rules.len();
        entry.rules.retain(|r| r.rule.name != rule_name);
        if entry.rules.len() == before {
            return Err(BrokerFault::Rejected(format!(
                "rule {rule_name} does not exist on subscription {subscription} of topic {topic}"
            )));
        }
        debug!(topic = %topic, subscription = %subscription, rule = %rule_name, "Rule deleted");
        Ok(())
    }

    async fn send(
        &self,
        target: &EntityPath,
        message: OutboundMessage,
    ) -> Result<String, BrokerFault> {
        self.gate().await?;
        let message_id = message.message_id.clone();
        let state = self.shared.state.read();
        state.deliver(target, message, 0)?;
        debug!(target = %target, message_id = %message_id, "Message sent");
        Ok(message_id)
    }

    async fn open_receiver(
        &self,
        source: &EntityPath,
        mode: ReceiveMode,
    ) -> Result<Box<dyn MessageReceiver>, BrokerFault> {
        self.gate().await?;
        let (store, _) = self.shared.state.read().receivable(source)?;
        debug!(source = %source, mode = ?mode, "Receiver opened");
        Ok(Box::new(InMemoryReceiver::new(
            source.clone(),
            mode,
            &store,
            Arc::downgrade(&self.shared),
        )))
    }
}
