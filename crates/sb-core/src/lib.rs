//! # Service Bus Coordinator Core
//!
//! Entity administration and concurrent listener coordination for a
//! publish/subscribe message broker.
//!
//! ## Components
//!
//! | Component | Responsibility |
//! |-----------|----------------|
//! | `NamespaceClient` | One lazily connected namespace handle per process |
//! | `ForwardingResolver` | `kind:name` forward directives checked against live entities |
//! | `EntityManager` | Topic and queue exists/create/delete/list |
//! | `SubscriptionManager` | Subscriptions, rules, tap create and teardown |
//! | `MessageSender` | JSON sends with user properties |
//! | `ListenerWorker` | One receive loop per queue or subscription |
//! | `ShutdownCoordinator` | Spawn, interrupt, cancel and drain |
//!
//! ## Worker Lifecycle
//!
//! ```text
//! Created ──→ Resolving ──→ Listening ──cancel──→ Draining ──→ Closed
//!                 │                                   ↑
//!                 └──────────── binding error ────────┘
//! ```
//!
//! A tap subscription created by a worker is deleted in `Draining`, so a
//! drained process never leaves a tap behind.
//!
//! ## Module Structure (Hexagonal Architecture)
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  adapters/ - in-memory broker (namespace, filters, stores)  │
//! └─────────────────────────────────────────────────────────────┘
//!                        ↑ implements ↑
//! ┌─────────────────────────────────────────────────────────────┐
//! │  ports/outbound.rs - BrokerConnector, BrokerNamespace,      │
//! │                      MessageReceiver, MessageObserver       │
//! └─────────────────────────────────────────────────────────────┘
//!                          ↑ uses ↑
//! ┌─────────────────────────────────────────────────────────────┐
//! │  service/ - the coordinator components above                │
//! │  domain/  - entities, rules, forwards, messages, errors     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
pub mod service;

pub use adapters::{InMemoryConnector, InMemoryNamespace};
pub use config::{ConnectionString, CoordinatorConfig};
pub use domain::{BrokerFault, CoordinatorError, CoordinatorResult};
pub use ports::{BrokerConnector, BrokerNamespace, MessageObserver, MessageReceiver, ReceiveMode};
pub use service::{
    EntityManager, ForwardingResolver, ListenerWorker, MessageSender, NamespaceClient,
    ShutdownCoordinator, ShutdownSummary, SubscriptionBinding, SubscriptionManager, WorkerHandle,
    WorkerReport, WorkerSpec, WorkerState,
};
