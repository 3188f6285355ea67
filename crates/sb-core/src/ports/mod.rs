//! Ports layer.
//!
//! Only outbound (driven) ports exist: the broker transport, the namespace
//! API, receive loops and the message observer. The services in
//! [`crate::service`] are the inbound surface.

pub mod outbound;

pub use outbound::*;
