//! Forward directives: `kind:name` or bare `name`.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::entities::{EntityKind, EntityPath};

/// A forwarding target: the entity a queue or subscription relays to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForwardDirective {
    pub kind: EntityKind,
    pub name: String,
}

impl ForwardDirective {
    pub fn new(kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    #[must_use]
    pub fn path(&self) -> EntityPath {
        EntityPath::of_kind(self.kind, &self.name)
    }
}

impl fmt::Display for ForwardDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.name)
    }
}

/// Outcome of parsing a directive string, before any broker lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedForward {
    /// Empty directive: no forwarding requested.
    Absent,
    /// Kind token not `topic`/`queue`, or too many separators.
    Unrecognized(String),
    Target(ForwardDirective),
}

impl ParsedForward {
    /// Parse `directive`; a bare name takes `default_kind`.
    ///
    /// The kind token is case-insensitive.
    #[must_use]
    pub fn parse(directive: &str, default_kind: EntityKind) -> Self {
        let directive = directive.trim();
        if directive.is_empty() {
            return Self::Absent;
        }

        let parts: Vec<&str> = directive.split(':').collect();
        match parts.as_slice() {
            [name] => Self::Target(ForwardDirective::new(default_kind, *name)),
            [kind, name] => {
                let name = name.trim();
                if name.is_empty() {
                    return Self::Unrecognized(directive.to_string());
                }
                match kind.trim().to_ascii_lowercase().as_str() {
                    "topic" => Self::Target(ForwardDirective::new(EntityKind::Topic, name)),
                    "queue" => Self::Target(ForwardDirective::new(EntityKind::Queue, name)),
                    _ => Self::Unrecognized(directive.to_string()),
                }
            }
            _ => Self::Unrecognized(directive.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_name_takes_default_kind() {
        assert_eq!(
            ParsedForward::parse("archive", EntityKind::Queue),
            ParsedForward::Target(ForwardDirective::new(EntityKind::Queue, "archive"))
        );
        assert_eq!(
            ParsedForward::parse("archive", EntityKind::Topic),
            ParsedForward::Target(ForwardDirective::new(EntityKind::Topic, "archive"))
        );
    }

    #[test]
    fn test_explicit_kind_is_case_insensitive() {
        assert_eq!(
            ParsedForward::parse("TOPIC:events", EntityKind::Queue),
            ParsedForward::Target(ForwardDirective::new(EntityKind::Topic, "events"))
        );
        assert_eq!(
            ParsedForward::parse("Queue:jobs", EntityKind::Topic),
            ParsedForward::Target(ForwardDirective::new(EntityKind::Queue, "jobs"))
        );
    }

    #[test]
    fn test_unknown_kind_is_unrecognized() {
        assert_eq!(
            ParsedForward::parse("bucket:jobs", EntityKind::Queue),
            ParsedForward::Unrecognized("bucket:jobs".into())
        );
        assert!(matches!(
            ParsedForward::parse("topic:a:b", EntityKind::Queue),
            ParsedForward::Unrecognized(_)
        ));
        assert!(matches!(
            ParsedForward::parse("queue:", EntityKind::Queue),
            ParsedForward::Unrecognized(_)
        ));
    }

    #[test]
    fn test_empty_is_absent() {
        assert_eq!(ParsedForward::parse("", EntityKind::Queue), ParsedForward::Absent);
        assert_eq!(ParsedForward::parse("   ", EntityKind::Topic), ParsedForward::Absent);
    }

    #[test]
    fn test_display() {
        let directive = ForwardDirective::new(EntityKind::Queue, "jobs");
        assert_eq!(directive.to_string(), "queue jobs");
        assert_eq!(directive.path(), EntityPath::queue("jobs"));
    }
}
