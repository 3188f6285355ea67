//! # Listener Worker
//!
//! One receive loop bound to one queue or subscription.
//!
//! ```text
//! Created -> Resolving -> Listening -> Draining -> Closed
//!                 |                                  ^
//!                 +----------- binding error --------+
//! ```
//!
//! Messages are handled strictly one at a time: the observer runs, then
//! the message is completed (normal mode) or left in place (peek mode),
//! before the next receive. Cancellation is only observed between
//! messages, so an in-flight message is always finished first.

use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{bounded, SubscriptionBinding, SubscriptionManager};
use crate::domain::{
    CoordinatorError, CoordinatorResult, EntityKind, EntityPath, MessageEnvelope, ReceivedMessage,
};
use crate::ports::{MessageObserver, MessageReceiver, Namespace, ReceiveMode};

/// Lifecycle of a worker, published on a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Created,
    Resolving,
    Listening,
    Draining,
    Closed,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Resolving => "resolving",
            Self::Listening => "listening",
            Self::Draining => "draining",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// What a worker listens to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    pub kind: EntityKind,
    pub entity: String,
    /// Subscription on a topic. For a tap, `None` means the configured tap name.
    pub subscription: Option<String>,
    pub peek: bool,
    pub tap: bool,
}

impl WorkerSpec {
    pub fn queue(name: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::Queue,
            entity: name.into(),
            subscription: None,
            peek: false,
            tap: false,
        }
    }

    pub fn subscription(topic: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::Topic,
            entity: topic.into(),
            subscription: Some(name.into()),
            peek: false,
            tap: false,
        }
    }

    /// Listen on the topic's tap subscription, creating it if needed.
    pub fn tap(topic: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::Topic,
            entity: topic.into(),
            subscription: None,
            peek: false,
            tap: true,
        }
    }

    #[must_use]
    pub fn peek(mut self, peek: bool) -> Self {
        self.peek = peek;
        self
    }

    #[must_use]
    pub fn receive_mode(&self) -> ReceiveMode {
        if self.peek {
            ReceiveMode::Browse
        } else {
            ReceiveMode::PeekLock
        }
    }
}

impl fmt::Display for WorkerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, &self.subscription) {
            (EntityKind::Queue, _) => write!(f, "queue {}", self.entity),
            (EntityKind::Topic, Some(name)) => write!(f, "subscription {name} on topic {}", self.entity),
            (EntityKind::Topic, None) => write!(f, "tap on topic {}", self.entity),
        }
    }
}

/// Outcome of one worker run.
#[derive(Debug)]
pub struct WorkerReport {
    pub spec: WorkerSpec,
    pub received: u64,
    pub completed: u64,
    pub completion_failures: u64,
    pub tap_deleted: bool,
    /// Binding, receive or teardown failure, if any.
    pub error: Option<CoordinatorError>,
}

impl WorkerReport {
    fn new(spec: WorkerSpec) -> Self {
        Self {
            spec,
            received: 0,
            completed: 0,
            completion_failures: 0,
            tap_deleted: false,
            error: None,
        }
    }
}

/// One consumption loop. Owns its receiver, binding and cancel signal.
pub struct ListenerWorker {
    id: usize,
    spec: WorkerSpec,
    namespace: Namespace,
    operation_timeout: Duration,
    subscriptions: SubscriptionManager,
    observer: Arc<dyn MessageObserver>,
    cancel: watch::Receiver<bool>,
    state: watch::Sender<WorkerState>,
}

impl ListenerWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        spec: WorkerSpec,
        namespace: Namespace,
        operation_timeout: Duration,
        subscriptions: SubscriptionManager,
        observer: Arc<dyn MessageObserver>,
        cancel: watch::Receiver<bool>,
        state: watch::Sender<WorkerState>,
    ) -> Self {
        state.send_replace(WorkerState::Created);
        Self {
            id,
            spec,
            namespace,
            operation_timeout,
            subscriptions,
            observer,
            cancel,
            state,
        }
    }

    fn transition(&self, next: WorkerState) {
        let previous = self.state.send_replace(next);
        info!(
            worker = self.id,
            target = %self.spec,
            from = %previous,
            to = %next,
            "Worker state changed"
        );
    }

    /// Drive the worker to `Closed`. Never returns early on error; the
    /// report carries it.
    pub async fn run(mut self) -> WorkerReport {
        let mut report = WorkerReport::new(self.spec.clone());

        self.transition(WorkerState::Resolving);
        let (source, binding) = match self.resolve().await {
            Ok(resolved) => resolved,
            Err(e) => {
                error!(worker = self.id, target = %self.spec, error = %e, "Worker could not bind");
                report.error = Some(e);
                self.transition(WorkerState::Closed);
                return report;
            }
        };

        let opened = bounded(
            "open_receiver",
            self.operation_timeout,
            self.namespace.open_receiver(&source, self.spec.receive_mode()),
        )
        .await;
        let mut receiver = match opened {
            Ok(receiver) => receiver,
            Err(fault) => {
                error!(worker = self.id, source = %source, error = %fault, "Receiver open failed");
                report.error = Some(binding_failure(
                    source,
                    CoordinatorError::from_fault(fault, self.namespace.name()),
                ));
                self.transition(WorkerState::Draining);
                self.teardown(binding, &mut report).await;
                self.transition(WorkerState::Closed);
                return report;
            }
        };

        self.transition(WorkerState::Listening);
        self.listen(receiver.as_mut(), &source, &mut report).await;

        self.transition(WorkerState::Draining);
        receiver.close().await;
        self.teardown(binding, &mut report).await;
        self.transition(WorkerState::Closed);

        info!(
            worker = self.id,
            target = %self.spec,
            received = report.received,
            completed = report.completed,
            "Worker finished"
        );
        report
    }

    /// Look up the queue, or ensure the subscription (creating a tap).
    async fn resolve(&self) -> CoordinatorResult<(EntityPath, Option<SubscriptionBinding>)> {
        match self.spec.kind {
            EntityKind::Queue => {
                let path = EntityPath::queue(&self.spec.entity);
                let found = bounded(
                    "get_queue",
                    self.operation_timeout,
                    self.namespace.get_queue(&self.spec.entity),
                )
                .await;
                match found {
                    Ok(Some(_)) => Ok((path, None)),
                    Ok(None) => Err(CoordinatorError::Binding {
                        entity: path,
                        reason: "queue does not exist".into(),
                    }),
                    Err(fault) => Err(binding_failure(
                        path,
                        CoordinatorError::from_fault(fault, self.namespace.name()),
                    )),
                }
            }
            EntityKind::Topic => {
                let name = match (&self.spec.subscription, self.spec.tap) {
                    (Some(name), _) => name.clone(),
                    (None, true) => self.subscriptions.tap_name().to_string(),
                    (None, false) => {
                        return Err(CoordinatorError::Binding {
                            entity: EntityPath::topic(&self.spec.entity),
                            reason: "no subscription given and tap not requested".into(),
                        })
                    }
                };
                let path = EntityPath::subscription(&self.spec.entity, &name);
                let binding = self
                    .subscriptions
                    .ensure(&self.spec.entity, &name, self.spec.tap)
                    .await
                    .map_err(|e| binding_failure(path.clone(), e))?;
                Ok((path, Some(binding)))
            }
        }
    }

    async fn listen(
        &mut self,
        receiver: &mut dyn MessageReceiver,
        source: &EntityPath,
        report: &mut WorkerReport,
    ) {
        loop {
            let next = tokio::select! {
                biased;
                () = cancelled(&mut self.cancel) => {
                    debug!(worker = self.id, "Cancellation observed");
                    break;
                }
                next = receiver.receive() => next,
            };

            match next {
                Ok(Some(message)) => self.handle(receiver, source, message, report).await,
                Ok(None) => {
                    info!(worker = self.id, source = %source, "Source closed, stopping");
                    break;
                }
                Err(fault) => {
                    error!(worker = self.id, source = %source, error = %fault, "Receive failed");
                    report.error = Some(CoordinatorError::from_fault(fault, self.namespace.name()));
                    break;
                }
            }
        }
    }

    async fn handle(
        &self,
        receiver: &mut dyn MessageReceiver,
        source: &EntityPath,
        message: ReceivedMessage,
        report: &mut WorkerReport,
    ) {
        report.received += 1;
        let envelope = MessageEnvelope {
            received_at: Utc::now(),
            enqueued_at: message.enqueued_at,
            message_id: message.message_id.clone(),
            entity_name: source.entity_name().to_string(),
            subscription_name: source.subscription_name().map(str::to_string),
            label: message.label.clone(),
            user_properties: message.properties.clone(),
            body: message.body.clone(),
        };
        self.observer.on_message(&envelope);

        if self.spec.peek {
            return;
        }
        match receiver.complete(&message).await {
            Ok(()) => report.completed += 1,
            Err(fault) => {
                warn!(
                    worker = self.id,
                    message_id = %message.message_id,
                    error = %fault,
                    "Complete failed, message will be redelivered"
                );
                report.completion_failures += 1;
            }
        }
    }

    async fn teardown(&self, binding: Option<SubscriptionBinding>, report: &mut WorkerReport) {
        let Some(binding) = binding else {
            return;
        };
        match self.subscriptions.teardown_tap(binding).await {
            Ok(deleted) => report.tap_deleted = deleted,
            Err(e) => {
                error!(worker = self.id, error = %e, "Tap teardown failed");
                report.error.get_or_insert(e);
            }
        }
    }
}

/// Connection failures keep their kind; anything else is a binding error.
fn binding_failure(entity: EntityPath, error: CoordinatorError) -> CoordinatorError {
    match error {
        CoordinatorError::Connection(_) => error,
        other => CoordinatorError::Binding {
            entity,
            reason: other.to_string(),
        },
    }
}

/// Resolves once cancellation is requested or the sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|cancelled| *cancelled).await;
}
