//! # Registration Gate
//!
//! The session handle is not safe for concurrent use, so every call that
//! touches it goes through one `tokio::sync::Mutex`. The supervisor installs a
//! freshly opened session and takes it back out for teardown under the same
//! lock, which means a teardown can never interleave with an in-flight
//! registration.
//!
//! The session's methods are blocking. Calls made under the lock run through
//! `tokio::task::block_in_place` when the runtime allows it, so they do not stall
//! other tasks on the same worker.

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::core::batcher::SubscriptionRequest;
use crate::core::session::{ConsumerClient, LoginRequest, Session, SessionError};
use crate::core::types::StreamId;

/// Outcome of a registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The session accepted the request on this stream.
    Registered(StreamId),
    /// No session was live when the lock was acquired.
    Unavailable,
}

type SessionSlot = Arc<Mutex<Option<Box<dyn Session>>>>;

/// Serializes every call into the live session. Clones share the same slot.
#[derive(Clone, Default)]
pub struct RegistrationGate {
    slot: SessionSlot,
}

impl RegistrationGate {
    /// An empty gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a session, returning whichever one was there before.
    pub async fn install(&self, session: Box<dyn Session>) -> Option<Box<dyn Session>> {
        let mut guard = self.slot.lock().await;
        guard.replace(session)
    }

    /// Removes the live session so it can be torn down.
    pub async fn take(&self) -> Option<Box<dyn Session>> {
        let mut guard = self.slot.lock().await;
        guard.take()
    }

    /// True when a session is installed.
    pub async fn is_live(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// Name of the installed session, if any.
    pub async fn session_name(&self) -> Option<String> {
        self.slot
            .lock()
            .await
            .as_ref()
            .map(|session| session.name().to_string())
    }

    /// Registers a subscription batch with the live session.
    pub async fn register(
        &self,
        request: &SubscriptionRequest,
        client: Arc<dyn ConsumerClient>,
    ) -> Result<Registration, SessionError> {
        let mut guard = self.slot.lock().await;
        let Some(session) = guard.as_mut() else {
            return Ok(Registration::Unavailable);
        };
        let id = run_blocking(|| session.register(request, client))?;
        Ok(Registration::Registered(id))
    }

    /// Registers the login request with the live session.
    pub async fn register_login(
        &self,
        request: &LoginRequest,
        client: Arc<dyn ConsumerClient>,
    ) -> Result<Registration, SessionError> {
        let mut guard = self.slot.lock().await;
        let Some(session) = guard.as_mut() else {
            return Ok(Registration::Unavailable);
        };
        let id = run_blocking(|| session.register_login(request, client))?;
        Ok(Registration::Registered(id))
    }
}

/// Uninitializes a session taken out of the gate. Best effort: failures are
/// logged and swallowed.
pub async fn retire(mut session: Box<dyn Session>) {
    let name = session.name().to_string();
    let outcome = tokio::task::spawn_blocking(move || session.uninitialize()).await;
    match outcome {
        Ok(Ok(())) => log::info!("Session [{}] uninitialized", name),
        Ok(Err(e)) => log::warn!("Failed to uninitialize session [{}]: {}", name, e),
        Err(e) => log::warn!("Uninitialize task for session [{}] failed: {}", name, e),
    }
}

fn run_blocking<T>(f: impl FnOnce() -> T) -> T {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == tokio::runtime::RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}
