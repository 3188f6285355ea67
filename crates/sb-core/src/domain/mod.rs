//! # Domain Layer
//!
//! Pure types and parsing; no broker calls happen here.
//!
//! - `entities`: topics, queues, subscriptions, paths, listings
//! - `forward`: forward directive parsing
//! - `rules`: SQL rule accumulation
//! - `message`: payloads, properties, templates
//! - `errors`: `BrokerFault`, `CoordinatorError`

pub mod entities;
pub mod errors;
pub mod forward;
pub mod message;
pub mod rules;

pub use entities::*;
pub use errors::*;
pub use forward::*;
pub use message::*;
pub use rules::*;
