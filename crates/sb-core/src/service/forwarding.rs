//! Forward directive resolution against live entities.

use std::time::Duration;
use tracing::{debug, warn};

use super::BrokerCalls;
use crate::domain::{
    CoordinatorError, CoordinatorResult, EntityKind, ForwardDirective, ParsedForward,
};
use crate::ports::Namespace;

/// Turns `kind:name` / `name` directives into checked forward targets.
#[derive(Clone)]
pub struct ForwardingResolver {
    calls: BrokerCalls,
}

impl ForwardingResolver {
    pub fn new(namespace: Namespace, operation_timeout: Duration) -> Self {
        Self {
            calls: BrokerCalls::new(namespace, operation_timeout),
        }
    }

    /// Resolve `directive` for an entity of kind `configuring`.
    ///
    /// A bare name takes the kind of the entity being configured. An
    /// unrecognized kind token yields no forward (logged at warn). A target
    /// that does not exist fails with `ForwardTargetNotFound`.
    pub async fn resolve(
        &self,
        directive: &str,
        configuring: EntityKind,
    ) -> CoordinatorResult<Option<ForwardDirective>> {
        let target = match ParsedForward::parse(directive, configuring) {
            ParsedForward::Absent => return Ok(None),
            ParsedForward::Unrecognized(raw) => {
                warn!(
                    directive = %raw,
                    "Unrecognized forward kind, expected topic or queue; no forwarding configured"
                );
                return Ok(None);
            }
            ParsedForward::Target(target) => target,
        };

        let namespace = self.calls.namespace();
        let exists = match target.kind {
            EntityKind::Topic => self
                .calls
                .call("get_topic", namespace.get_topic(&target.name))
                .await?
                .is_some(),
            EntityKind::Queue => self
                .calls
                .call("get_queue", namespace.get_queue(&target.name))
                .await?
                .is_some(),
        };

        if !exists {
            return Err(CoordinatorError::ForwardTargetNotFound {
                target,
                namespace: self.calls.namespace_name().to_string(),
            });
        }

        debug!(target = %target, "Forward target resolved");
        Ok(Some(target))
    }

    /// [`resolve`](Self::resolve) for an optional directive.
    pub async fn resolve_optional(
        &self,
        directive: Option<&str>,
        configuring: EntityKind,
    ) -> CoordinatorResult<Option<ForwardDirective>> {
        match directive {
            Some(directive) => self.resolve(directive, configuring).await,
            None => Ok(None),
        }
    }
}
