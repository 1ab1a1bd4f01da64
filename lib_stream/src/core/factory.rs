//! Opens a session for a resolved endpoint and logs it in.

use std::sync::Arc;
use thiserror::Error;

use crate::core::config_map::{ChannelSettings, SessionConfigMap, CONSUMER_PREFIX};
use crate::core::gate::{retire, Registration, RegistrationGate};
use crate::core::session::{
    ConsumerClient, ConsumerConfig, FaultReceiver, FaultReporter, LoginRequest, SessionConnector,
    SessionError,
};
use crate::core::types::{Credentials, Endpoint, StreamId};

/// Why a session could not be brought up.
#[derive(Debug, Error)]
pub enum SessionCreationError {
    /// The connector refused to open a session.
    #[error("Session open failed: {0}")]
    Open(#[source] SessionError),

    /// The session rejected the login request.
    #[error("Login failed: {0}")]
    Login(#[source] SessionError),

    /// The gate was emptied between install and login.
    #[error("Session [{0}] vanished before login could be registered")]
    LoginUnavailable(String),
}

/// A session that is installed in the gate and logged in.
#[derive(Debug)]
pub struct OpenSession {
    /// Generated consumer name, `Consumer_<epoch seconds>`.
    pub name: String,
    /// Stream the login was registered on.
    pub login_stream: StreamId,
    /// Faults surfaced by the session's own I/O.
    pub faults: FaultReceiver,
}

/// Builds consumer configurations and opens logged-in sessions.
#[derive(Clone)]
pub struct SessionFactory {
    connector: Arc<dyn SessionConnector>,
    credentials: Credentials,
    channel: ChannelSettings,
}

impl SessionFactory {
    /// Factory opening sessions through `connector` with fixed credentials and channel settings.
    pub fn new(
        connector: Arc<dyn SessionConnector>,
        credentials: Credentials,
        channel: ChannelSettings,
    ) -> Self {
        Self {
            connector,
            credentials,
            channel,
        }
    }

    /// Credentials used for login and discovery.
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Consumer configuration for a given session name and endpoint.
    pub fn consumer_config(&self, consumer_name: &str, endpoint: &Endpoint) -> ConsumerConfig {
        ConsumerConfig {
            consumer_name: consumer_name.to_string(),
            username: self.credentials.machine_id.clone(),
            password: self.credentials.password.clone(),
            client_id: self.credentials.app_key.clone(),
            config: SessionConfigMap::for_consumer(consumer_name, endpoint, &self.channel),
        }
    }

    /// Opens a session, installs it in `gate` and registers the login through
    /// the gate with `client` as handler.
    ///
    /// Errors propagate unchanged; the supervisor decides whether to retry.
    pub async fn create(
        &self,
        endpoint: &Endpoint,
        gate: &RegistrationGate,
        client: Arc<dyn ConsumerClient>,
    ) -> Result<OpenSession, SessionCreationError> {
        let name = consumer_name();
        let config = self.consumer_config(&name, endpoint);
        let (reporter, faults) = FaultReporter::channel();

        log::info!("Opening session [{}] against {}", name, endpoint);
        let connector = self.connector.clone();
        let session = tokio::task::spawn_blocking(move || connector.open(config, reporter))
            .await
            .map_err(|e| SessionCreationError::Open(SessionError::Join(e.to_string())))?
            .map_err(SessionCreationError::Open)?;

        if let Some(stale) = gate.install(session).await {
            log::warn!("Replacing a session that was never torn down: [{}]", stale.name());
            retire(stale).await;
        }

        let login = LoginRequest::from_credentials(&self.credentials);
        match gate
            .register_login(&login, client)
            .await
            .map_err(SessionCreationError::Login)?
        {
            Registration::Registered(login_stream) => {
                log::info!("Session [{}] logged in on stream {}", name, login_stream);
                Ok(OpenSession {
                    name,
                    login_stream,
                    faults,
                })
            }
            Registration::Unavailable => Err(SessionCreationError::LoginUnavailable(name)),
        }
    }
}

fn consumer_name() -> String {
    format!("{}{}", CONSUMER_PREFIX, chrono::Utc::now().timestamp())
}
