//! # Core Session Engine
//!
//! This module is the heart of `lib_stream`. It keeps exactly one streaming
//! session alive against the market-data feed and rebuilds it whenever anything
//! goes wrong.
//!
//! ## Core Components:
//!
//! - **`discovery`**: resolves a reachable host/port for the configured region
//!   by asking a discovery service and applying the endpoint selection policy.
//!
//! - **`factory`**: turns an endpoint plus credentials into a consumer
//!   configuration, opens a session and performs the login handshake.
//!
//! - **`batcher`**: splits the instrument list into protocol-size-bounded
//!   subscription requests, optionally narrowed by a field view.
//!
//! - **`gate`**: the single lock every registration call goes through. The
//!   underlying session handle is not safe for concurrent use.
//!
//! - **`supervisor`**: the state machine. Discovery, creation, subscription,
//!   indefinite idle, teardown, restart.
//!
//! - **`event_sink`**: receives inbound messages on the session's delivery
//!   thread, copies them and dispatches named ones to a processor.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Subscription batching and request payloads.
pub mod batcher;
/// Nested session configuration map.
pub mod config_map;
/// Endpoint discovery and the selection policy.
pub mod discovery;
/// Inbound message handling.
pub mod event_sink;
/// Session creation and login.
pub mod factory;
/// Serialized access to the live session.
pub mod gate;
/// Instrument list sources.
pub mod instruments;
/// Delay policy between supervisor cycles.
pub mod restart;
/// The session capability and the messages that cross it.
pub mod session;
/// The supervising state machine.
pub mod supervisor;
/// Plain data shared by all components.
pub mod types;

// --- Public API Re-exports ---
pub use batcher::{FieldView, SubscriptionBatcher, SubscriptionRequest};
pub use config_map::{ChannelSettings, SessionConfigMap};
pub use discovery::{
    DiscoveryError, DiscoveryOptions, DiscoveryReply, DiscoveryService, EndpointDiscovery,
    ServiceEndpoint, StaticDiscoveryService,
};
pub use event_sink::{EventSink, LogProcessor, MessageProcessor};
pub use factory::{OpenSession, SessionCreationError, SessionFactory};
pub use gate::{Registration, RegistrationGate};
pub use instruments::{InstrumentError, InstrumentSource, StaticInstruments};
pub use restart::RestartPolicy;
pub use session::{
    ConsumerClient, ConsumerConfig, FaultReceiver, FaultReporter, FeedMessage, LoginRequest,
    MessageKind, MessageView, Session, SessionConnector, SessionError, SessionFault,
};
pub use supervisor::{SessionSupervisor, SupervisorError, SupervisorState, SupervisorStats};
pub use types::{Credentials, Endpoint, StreamId};
