//! # lib_stream
//!
//! Library side of the `ricstream` workspace. It keeps one authenticated
//! streaming session alive against a market-data feed, subscribes the
//! configured instruments in size-bounded batches and hands inbound
//! refresh/update messages to a downstream processor.
//!
//! Every folder is gated behind a cargo feature of the same name, `full`
//! enables all of them.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Session lifecycle: discovery, factory, batcher, gate, supervisor and sink.
#[cfg(feature = "core")]
pub mod core;

/// Static configuration inputs: instruments, field IDs and encrypted credentials.
#[cfg(feature = "configs")]
pub mod configs;

/// HTTP retrieval and the RDP service discovery client.
#[cfg(feature = "retrieve")]
pub mod retrieve;

/// Session connectors.
#[cfg(feature = "ingestors")]
pub mod ingestors;

#[cfg(feature = "core")]
pub use crate::core::{
    Credentials, Endpoint, EndpointDiscovery, EventSink, RegistrationGate, RestartPolicy,
    SessionFactory, SessionSupervisor, SubscriptionBatcher, SupervisorState,
};
