//! # Session Capability
//!
//! The wire protocol lives outside this crate. The engine only sees a
//! [`Session`] opened by a [`SessionConnector`], and the messages the session
//! delivers to a [`ConsumerClient`].
//!
//! Inbound messages are handed to clients as a borrowed [`MessageView`]. The
//! transport reuses the backing buffers once the callback returns, so anything
//! that outlives the call must be copied into an owned [`FeedMessage`] first.

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::core::batcher::SubscriptionRequest;
use crate::core::config_map::SessionConfigMap;
use crate::core::types::{Credentials, StreamId};

/// Errors raised by a session implementation.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The connection could not be established.
    #[error("Failed to open session: {0}")]
    Open(String),

    /// The session refused a request.
    #[error("Registration rejected by session [{session}]: {reason}")]
    Registration {
        /// Session that refused.
        session: String,
        /// Cause reported by the session.
        reason: String,
    },

    /// The session was used after `uninitialize`.
    #[error("Session [{0}] is already uninitialized")]
    Uninitialized(String),

    /// Disconnecting failed.
    #[error("Failed to uninitialize session [{session}]: {reason}")]
    Uninitialize {
        /// Session being torn down.
        session: String,
        /// Cause reported by the session.
        reason: String,
    },

    /// The blocking task running a session call did not complete.
    #[error("Blocking session task failed: {0}")]
    Join(String),
}

/// Consumer configuration handed to [`SessionConnector::open`].
#[derive(Clone)]
pub struct ConsumerConfig {
    /// Name of the consumer entry in `config`.
    pub consumer_name: String,
    /// Username sent at login.
    pub username: String,
    /// Password sent at login.
    pub password: String,
    /// Client id sent at login.
    pub client_id: String,
    /// Nested consumer and channel configuration.
    pub config: SessionConfigMap,
}

impl fmt::Debug for ConsumerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerConfig")
            .field("consumer_name", &self.consumer_name)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("client_id", &self.client_id)
            .field("config", &self.config)
            .finish()
    }
}

/// Login request registered right after a session is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    /// Machine id to log in with.
    pub username: String,
    /// Application key.
    pub application_id: String,
}

impl LoginRequest {
    /// Login request for `credentials`.
    pub fn from_credentials(credentials: &Credentials) -> Self {
        Self {
            username: credentials.machine_id.clone(),
            application_id: credentials.app_key.clone(),
        }
    }
}

/// A fatal problem surfaced by the session's own I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFault {
    /// Human-readable cause.
    pub reason: String,
}

impl fmt::Display for SessionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

/// Receiving half of the per-session fault channel, owned by the supervisor.
pub type FaultReceiver = mpsc::UnboundedReceiver<SessionFault>;

/// Handed to a connector when a session is opened.
///
/// A session must keep its reporter alive for as long as it is usable: once
/// every reporter is dropped the supervisor treats the session as lost.
#[derive(Debug, Clone)]
pub struct FaultReporter {
    tx: mpsc::UnboundedSender<SessionFault>,
}

impl FaultReporter {
    /// A reporter and the receiver it feeds.
    pub fn channel() -> (Self, FaultReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Reports a fault. Returns `false` if nobody is listening any more.
    pub fn report(&self, reason: impl Into<String>) -> bool {
        self.tx
            .send(SessionFault {
                reason: reason.into(),
            })
            .is_ok()
    }
}

/// Kind of an inbound notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Full image of an item.
    Refresh,
    /// Change to an item.
    Update,
    /// Stream or item state change.
    Status,
    /// Generic message.
    Generic,
    /// Acknowledgement of a posted message.
    Ack,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Refresh => "RefreshMsg",
            MessageKind::Update => "UpdateMsg",
            MessageKind::Status => "StatusMsg",
            MessageKind::Generic => "GenericMsg",
            MessageKind::Ack => "AckMsg",
        };
        f.write_str(name)
    }
}

/// Transport-owned message, valid only for the duration of a callback.
#[derive(Debug, Clone, Copy)]
pub struct MessageView<'a> {
    /// Message kind.
    pub kind: MessageKind,
    /// Stream the message arrived on.
    pub stream_id: Option<StreamId>,
    /// Item name, absent on some status messages.
    pub name: Option<&'a str>,
    /// Service the item belongs to.
    pub service_name: Option<&'a str>,
    /// Encoded payload.
    pub payload: &'a [u8],
}

impl<'a> MessageView<'a> {
    /// Deep copy into an owned value that can cross threads.
    pub fn to_owned_message(&self) -> FeedMessage {
        FeedMessage {
            kind: self.kind,
            stream_id: self.stream_id,
            name: self.name.map(str::to_owned),
            service_name: self.service_name.map(str::to_owned),
            payload: Bytes::copy_from_slice(self.payload),
        }
    }
}

/// Owned copy of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedMessage {
    /// Message kind.
    pub kind: MessageKind,
    /// Stream the message arrived on.
    pub stream_id: Option<StreamId>,
    /// Item name.
    pub name: Option<String>,
    /// Service the item belongs to.
    pub service_name: Option<String>,
    /// Copied payload.
    pub payload: Bytes,
}

impl FeedMessage {
    /// True when the message carries a non-empty name.
    pub fn has_name(&self) -> bool {
        self.name.as_deref().is_some_and(|n| !n.is_empty())
    }
}

/// Callbacks invoked by a session on its own delivery thread.
///
/// Only refresh and update carry market data; the others default to no-ops.
pub trait ConsumerClient: Send + Sync {
    /// Full image of an item.
    fn on_refresh(&self, message: &MessageView<'_>);

    /// Incremental change to an item.
    fn on_update(&self, message: &MessageView<'_>);

    /// Stream or item state change.
    fn on_status(&self, _message: &MessageView<'_>) {}

    /// Generic message.
    fn on_generic(&self, _message: &MessageView<'_>) {}

    /// Acknowledgement of a post.
    fn on_ack(&self, _message: &MessageView<'_>) {}

    /// Called for every message, before the kind-specific callback.
    fn on_all(&self, _message: &MessageView<'_>) {}
}

/// A live, authenticated connection context.
///
/// Implementations are not required to tolerate concurrent calls; the engine
/// only reaches a session through the registration gate.
pub trait Session: Send {
    /// Consumer name the session was opened with.
    fn name(&self) -> &str;

    /// Logs in; `client` receives the login stream's messages.
    fn register_login(
        &mut self,
        request: &LoginRequest,
        client: Arc<dyn ConsumerClient>,
    ) -> Result<StreamId, SessionError>;

    /// Subscribes to one batch of items.
    fn register(
        &mut self,
        request: &SubscriptionRequest,
        client: Arc<dyn ConsumerClient>,
    ) -> Result<StreamId, SessionError>;

    /// Unregisters everything and disconnects. The session must not be used afterwards.
    fn uninitialize(&mut self) -> Result<(), SessionError>;
}

/// Opens sessions. Opening is a blocking call.
pub trait SessionConnector: Send + Sync {
    /// Connects with `config`; `faults` reports fatal transport errors later on.
    fn open(
        &self,
        config: ConsumerConfig,
        faults: FaultReporter,
    ) -> Result<Box<dyn Session>, SessionError>;
}

/// Dispatches a borrowed message to the matching client callback.
///
/// Connectors call this from their delivery thread so every client sees
/// `on_all` first and then the kind-specific callback.
pub fn deliver(client: &dyn ConsumerClient, message: &MessageView<'_>) {
    client.on_all(message);
    match message.kind {
        MessageKind::Refresh => client.on_refresh(message),
        MessageKind::Update => client.on_update(message),
        MessageKind::Status => client.on_status(message),
        MessageKind::Generic => client.on_generic(message),
        MessageKind::Ack => client.on_ack(message),
    }
}
