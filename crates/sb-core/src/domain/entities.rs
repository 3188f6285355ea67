//! Broker entities: topics, queues, subscriptions and their listings.
//!
//! `*Ref` types are what callers ask for (forward directives still raw).
//! `*Description` types are what the broker stores (forwards resolved).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::errors::{CoordinatorError, CoordinatorResult};
use super::forward::ForwardDirective;
use super::rules::RuleSet;

/// Max delivery count applied when the caller does not pick one.
pub const DEFAULT_MAX_DELIVERY_COUNT: u32 = 10;

/// Kind of a named broker entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Topic,
    Queue,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Topic => f.write_str("topic"),
            Self::Queue => f.write_str("queue"),
        }
    }
}

/// Address of anything messages can be sent to or received from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityPath {
    Topic(String),
    Queue(String),
    Subscription { topic: String, name: String },
}

impl EntityPath {
    pub fn topic(name: impl Into<String>) -> Self {
        Self::Topic(name.into())
    }

    pub fn queue(name: impl Into<String>) -> Self {
        Self::Queue(name.into())
    }

    pub fn subscription(topic: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Subscription {
            topic: topic.into(),
            name: name.into(),
        }
    }

    /// Path of a top-level entity of the given kind.
    pub fn of_kind(kind: EntityKind, name: impl Into<String>) -> Self {
        match kind {
            EntityKind::Topic => Self::Topic(name.into()),
            EntityKind::Queue => Self::Queue(name.into()),
        }
    }

    /// The topic or queue name; for subscriptions, the owning topic.
    #[must_use]
    pub fn entity_name(&self) -> &str {
        match self {
            Self::Topic(name) | Self::Queue(name) => name,
            Self::Subscription { topic, .. } => topic,
        }
    }

    /// Subscription name, if this path addresses one.
    #[must_use]
    pub fn subscription_name(&self) -> Option<&str> {
        match self {
            Self::Subscription { name, .. } => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for EntityPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Topic(name) => write!(f, "topic {name}"),
            Self::Queue(name) => write!(f, "queue {name}"),
            Self::Subscription { topic, name } => {
                write!(f, "subscription {name} on topic {topic}")
            }
        }
    }
}

/// Reject empty or whitespace-only names.
pub fn validate_name(what: &str, name: &str) -> CoordinatorResult<()> {
    if name.trim().is_empty() {
        return Err(CoordinatorError::InvalidArgument(format!(
            "{what} name cannot be empty"
        )));
    }
    Ok(())
}

/// Delivery settings shared by queues, topics and subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySettings {
    pub lock_duration: Option<Duration>,
    pub default_message_ttl: Option<Duration>,
    pub auto_delete_on_idle: Option<Duration>,
    pub max_delivery_count: u32,
}

impl Default for EntitySettings {
    fn default() -> Self {
        Self {
            lock_duration: None,
            default_message_ttl: None,
            auto_delete_on_idle: None,
            max_delivery_count: DEFAULT_MAX_DELIVERY_COUNT,
        }
    }
}

/// A topic the caller wants created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicRef {
    pub name: String,
    pub settings: EntitySettings,
}

impl TopicRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            settings: EntitySettings::default(),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: EntitySettings) -> Self {
        self.settings = settings;
        self
    }
}

/// A queue the caller wants created. Forward directives are unresolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRef {
    pub name: String,
    pub settings: EntitySettings,
    pub forward_to: Option<String>,
    pub forward_dead_letter_to: Option<String>,
}

impl QueueRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            settings: EntitySettings::default(),
            forward_to: None,
            forward_dead_letter_to: None,
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: EntitySettings) -> Self {
        self.settings = settings;
        self
    }

    /// Forward directive, `kind:name` or bare `name` (defaults to queue).
    #[must_use]
    pub fn forward_to(mut self, directive: impl Into<String>) -> Self {
        self.forward_to = non_empty(directive.into());
        self
    }

    #[must_use]
    pub fn forward_dead_letter_to(mut self, directive: impl Into<String>) -> Self {
        self.forward_dead_letter_to = non_empty(directive.into());
        self
    }
}

/// A subscription the caller wants created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRef {
    pub topic: String,
    pub name: String,
    pub settings: EntitySettings,
    pub forward_to: Option<String>,
    pub forward_dead_letter_to: Option<String>,
    pub rules: RuleSet,
}

impl SubscriptionRef {
    pub fn new(topic: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            name: name.into(),
            settings: EntitySettings::default(),
            forward_to: None,
            forward_dead_letter_to: None,
            rules: RuleSet::default(),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: EntitySettings) -> Self {
        self.settings = settings;
        self
    }

    /// Forward directive, `kind:name` or bare `name` (defaults to topic).
    #[must_use]
    pub fn forward_to(mut self, directive: impl Into<String>) -> Self {
        self.forward_to = non_empty(directive.into());
        self
    }

    #[must_use]
    pub fn forward_dead_letter_to(mut self, directive: impl Into<String>) -> Self {
        self.forward_dead_letter_to = non_empty(directive.into());
        self
    }

    /// Apply a `name:filter[:action]` rule directive.
    #[must_use]
    pub fn with_rule(mut self, directive: &str) -> Self {
        self.rules.apply_directive(directive);
        self
    }

    #[must_use]
    pub fn path(&self) -> EntityPath {
        EntityPath::subscription(&self.topic, &self.name)
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Topic as stored on the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicDescription {
    pub name: String,
    pub settings: EntitySettings,
}

/// Queue as stored on the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDescription {
    pub name: String,
    pub settings: EntitySettings,
    pub forward_to: Option<ForwardDirective>,
    pub forward_dead_letter_to: Option<ForwardDirective>,
}

/// Subscription as stored on the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionDescription {
    pub topic: String,
    pub name: String,
    pub settings: EntitySettings,
    pub forward_to: Option<ForwardDirective>,
    pub forward_dead_letter_to: Option<ForwardDirective>,
}

/// One row of a topic, queue or subscription listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityListing {
    pub name: String,
    pub forward_to: Option<String>,
    pub active_count: u64,
    pub dead_letter_count: u64,
    pub scheduled_count: u64,
}

impl fmt::Display for EntityListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (messages: {}, dead letters: {}, scheduled: {})",
            self.name, self.active_count, self.dead_letter_count, self.scheduled_count
        )?;
        if let Some(target) = self.forward_to.as_deref().map(str::trim) {
            if !target.is_empty() {
                write!(f, " forwarding to -> {target}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_display() {
        assert_eq!(EntityPath::topic("events").to_string(), "topic events");
        assert_eq!(EntityPath::queue("jobs").to_string(), "queue jobs");
        assert_eq!(
            EntityPath::subscription("events", "audit").to_string(),
            "subscription audit on topic events"
        );
    }

    #[test]
    fn test_path_names() {
        let path = EntityPath::subscription("events", "audit");
        assert_eq!(path.entity_name(), "events");
        assert_eq!(path.subscription_name(), Some("audit"));
        assert_eq!(EntityPath::queue("jobs").subscription_name(), None);
    }

    #[test]
    fn test_listing_reports_zero_counts() {
        let listing = EntityListing {
            name: "jobs".into(),
            forward_to: None,
            active_count: 0,
            dead_letter_count: 0,
            scheduled_count: 0,
        };
        assert_eq!(
            listing.to_string(),
            "jobs (messages: 0, dead letters: 0, scheduled: 0)"
        );
    }

    #[test]
    fn test_listing_trims_forward_target() {
        let listing = EntityListing {
            name: "jobs".into(),
            forward_to: Some("  archive ".into()),
            active_count: 3,
            dead_letter_count: 1,
            scheduled_count: 0,
        };
        assert_eq!(
            listing.to_string(),
            "jobs (messages: 3, dead letters: 1, scheduled: 0) forwarding to -> archive"
        );

        let blank = EntityListing {
            forward_to: Some("   ".into()),
            ..listing
        };
        assert!(!blank.to_string().contains("forwarding"));
    }

    #[test]
    fn test_empty_forward_directive_is_dropped() {
        let queue = QueueRef::new("jobs").forward_to("").forward_dead_letter_to("  ");
        assert!(queue.forward_to.is_none());
        assert!(queue.forward_dead_letter_to.is_none());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("queue", "jobs").is_ok());
        assert!(matches!(
            validate_name("queue", "  "),
            Err(CoordinatorError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_default_settings() {
        let settings = EntitySettings::default();
        assert_eq!(settings.max_delivery_count, DEFAULT_MAX_DELIVERY_COUNT);
        assert!(settings.lock_duration.is_none());
    }
}
