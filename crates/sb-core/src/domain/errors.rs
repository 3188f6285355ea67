//! Error types for broker administration and listening.
//!
//! Two layers:
//! - [`BrokerFault`] is what a broker adapter reports through the ports.
//! - [`CoordinatorError`] is what the services return to their callers.

use thiserror::Error;

use super::entities::EntityPath;
use super::forward::ForwardDirective;

/// Failure reported by a broker adapter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerFault {
    /// The addressed entity does not exist.
    #[error("{0} does not exist")]
    NotFound(EntityPath),

    /// An entity with the same path already exists.
    #[error("{0} already exists")]
    AlreadyExists(EntityPath),

    /// The namespace could not be reached.
    #[error("namespace unreachable: {0}")]
    Unreachable(String),

    /// The receiver or namespace was closed.
    #[error("receiver closed")]
    Closed,

    /// A rule filter could not be parsed.
    #[error("invalid filter expression `{expression}`: {reason}")]
    InvalidFilter { expression: String, reason: String },

    /// The call did not complete within the operation timeout.
    #[error("operation `{operation}` timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    /// The broker refused the call for any other reason.
    #[error("broker rejected the request: {0}")]
    Rejected(String),
}

/// Errors surfaced by the coordinator services.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Namespace unreachable or connection string unusable. Fatal.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Entity, subscription or rule absent.
    #[error("{entity} was not found in namespace {namespace}")]
    NotFound { entity: EntityPath, namespace: String },

    /// Duplicate create attempted.
    #[error("{entity} already exists in namespace {namespace}")]
    AlreadyExists { entity: EntityPath, namespace: String },

    /// A forward directive names an entity that does not exist.
    #[error("could not find forwarding target {target} in namespace {namespace}")]
    ForwardTargetNotFound {
        target: ForwardDirective,
        namespace: String,
    },

    /// A listener could not attach to its target.
    #[error("could not bind listener to {entity}: {reason}")]
    Binding { entity: EntityPath, reason: String },

    /// Administrative or data-plane call failed on the broker side.
    #[error(transparent)]
    Broker(#[from] BrokerFault),

    /// Caller supplied an unusable value (empty name, malformed directive).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Message body could not be serialized.
    #[error("message serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Interrupt handler could not be installed.
    #[error("signal handling failed: {0}")]
    Signal(#[from] std::io::Error),
}

impl CoordinatorError {
    /// True for both entity and forward-target absence.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::ForwardTargetNotFound { .. }
                | Self::Broker(BrokerFault::NotFound(_))
        )
    }

    /// True when a create collided with an existing entity.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            Self::AlreadyExists { .. } | Self::Broker(BrokerFault::AlreadyExists(_))
        )
    }

    /// Lift a broker fault into the typed variants where one exists.
    #[must_use]
    pub fn from_fault(fault: BrokerFault, namespace: &str) -> Self {
        match fault {
            BrokerFault::NotFound(entity) => Self::NotFound {
                entity,
                namespace: namespace.to_string(),
            },
            BrokerFault::AlreadyExists(entity) => Self::AlreadyExists {
                entity,
                namespace: namespace.to_string(),
            },
            BrokerFault::Unreachable(reason) => Self::Connection(reason),
            other => Self::Broker(other),
        }
    }
}

/// Result type for coordinator operations.
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
