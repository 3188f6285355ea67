//! # Coordinator Services
//!
//! - `namespace_client`: one lazily connected namespace per process
//! - `forwarding`: forward directive validation against live entities
//! - `entities`: topic and queue administration
//! - `subscriptions`: subscription, rule and tap administration
//! - `sender`: message sends with templates
//! - `listener`: one receive loop per worker
//! - `shutdown`: spawning, interrupt wait and drain

pub mod entities;
pub mod forwarding;
pub mod listener;
pub mod namespace_client;
pub mod sender;
pub mod shutdown;
pub mod subscriptions;

pub use entities::EntityManager;
pub use forwarding::ForwardingResolver;
pub use listener::{ListenerWorker, WorkerReport, WorkerSpec, WorkerState};
pub use namespace_client::NamespaceClient;
pub use sender::MessageSender;
pub use shutdown::{ShutdownCoordinator, ShutdownSummary, WorkerHandle};
pub use subscriptions::{SubscriptionBinding, SubscriptionManager};

use std::future::Future;
use std::time::Duration;

use crate::domain::{BrokerFault, CoordinatorError, CoordinatorResult};
use crate::ports::Namespace;

/// Run a broker call, failing with `BrokerFault::Timeout` past `limit`.
pub(crate) async fn bounded<T, F>(
    operation: &str,
    limit: Duration,
    call: F,
) -> Result<T, BrokerFault>
where
    F: Future<Output = Result<T, BrokerFault>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(BrokerFault::Timeout {
            operation: operation.to_string(),
            secs: limit.as_secs(),
        }),
    }
}

/// Namespace handle plus the per-call time limit.
#[derive(Clone)]
pub(crate) struct BrokerCalls {
    namespace: Namespace,
    timeout: Duration,
}

impl BrokerCalls {
    pub(crate) fn new(namespace: Namespace, timeout: Duration) -> Self {
        Self { namespace, timeout }
    }

    pub(crate) fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub(crate) fn namespace_name(&self) -> &str {
        self.namespace.name()
    }

    /// Bounded call with broker faults lifted into typed errors.
    pub(crate) async fn call<T, F>(&self, operation: &str, call: F) -> CoordinatorResult<T>
    where
        F: Future<Output = Result<T, BrokerFault>>,
    {
        bounded(operation, self.timeout, call)
            .await
            .map_err(|fault| CoordinatorError::from_fault(fault, self.namespace.name()))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_bounded_times_out() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, BrokerFault>(())
        };
        let err = bounded("get_topic", Duration::from_secs(40), slow)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            BrokerFault::Timeout {
                operation: "get_topic".into(),
                secs: 40
            }
        );
    }

    #[tokio::test]
    async fn test_bounded_passes_result_through() {
        let fast = async { Ok::<_, BrokerFault>(7) };
        assert_eq!(bounded("x", Duration::from_secs(1), fast).await, Ok(7));
    }
}
