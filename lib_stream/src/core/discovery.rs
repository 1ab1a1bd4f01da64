//! # Endpoint Discovery
//!
//! Resolves which physical endpoint to connect to for the configured region.
//!
//! Discovery services answer through a callback-style [`DiscoveryReply`]: one
//! success with a candidate list, or one error message. [`EndpointDiscovery`]
//! turns that into a single awaited call backed by a one-shot channel, then
//! applies the selection policy. It never retries; the supervisor does.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::core::types::{Credentials, Endpoint};

/// Why discovery produced no endpoint. Always recoverable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    /// The discovery service answered with an error text.
    #[error("Discovery exchange failed: {0}")]
    Exchange(String),

    /// Candidates came back but none passed the selection policy.
    #[error("No endpoint matched region [{region}] among {candidates} candidates")]
    NoMatchingEndpoint {
        /// Region code the candidates were filtered on.
        region: String,
        /// Number of candidates the service returned.
        candidates: usize,
    },

    /// The reply handle was dropped without an answer.
    #[error("Discovery service dropped the request without replying")]
    NoReply,

    /// No answer within the configured bound.
    #[error("Discovery timed out after {0:?}")]
    Timeout(Duration),
}

/// One endpoint advertised by the discovery service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    /// Host name, prefixed with its region code.
    pub endpoint: String,
    /// Port to connect to.
    pub port: u16,
    /// Availability zones the endpoint spans.
    pub locations: Vec<String>,
    /// Transport name, `tcp` or `websocket`.
    pub transport: String,
}

impl ServiceEndpoint {
    /// A candidate is eligible when it spans several locations, sits in the
    /// requested region and speaks raw TCP.
    pub fn matches(&self, region: &str) -> bool {
        self.locations.len() > 1 && self.endpoint.starts_with(region) && self.transport == "tcp"
    }
}

/// First matching candidate, no ranking.
pub fn select_endpoint(candidates: &[ServiceEndpoint], region: &str) -> Option<Endpoint> {
    candidates
        .iter()
        .find(|candidate| candidate.matches(region))
        .map(|candidate| Endpoint::new(candidate.endpoint.clone(), candidate.port))
}

/// Options for a single discovery request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryOptions {
    /// Machine id.
    pub username: String,
    /// Password for the machine id.
    pub password: String,
    /// Application key.
    pub client_id: String,
}

impl DiscoveryOptions {
    /// Options carrying the machine id, password and app key.
    pub fn from_credentials(credentials: &Credentials) -> Self {
        Self {
            username: credentials.machine_id.clone(),
            password: credentials.password.clone(),
            client_id: credentials.app_key.clone(),
        }
    }
}

/// Completion handle passed to a [`DiscoveryService`]. Consumed by the first answer.
#[derive(Debug)]
pub struct DiscoveryReply {
    tx: oneshot::Sender<Result<Vec<ServiceEndpoint>, String>>,
}

impl DiscoveryReply {
    fn pair() -> (Self, oneshot::Receiver<Result<Vec<ServiceEndpoint>, String>>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Completes the request with a candidate list.
    pub fn on_success(self, endpoints: Vec<ServiceEndpoint>) {
        let _ = self.tx.send(Ok(endpoints));
    }

    /// Completes the request with an error text.
    pub fn on_error(self, error_text: impl Into<String>) {
        let _ = self.tx.send(Err(error_text.into()));
    }
}

/// External service that lists candidate endpoints.
///
/// Implementations may answer inline or from a spawned task; the reply must be
/// completed exactly once or dropped.
pub trait DiscoveryService: Send + Sync {
    /// Starts a lookup and completes `reply` with the outcome.
    fn resolve(&self, options: DiscoveryOptions, reply: DiscoveryReply);
}

/// Discovery service answering with a fixed candidate list.
#[derive(Debug, Clone, Default)]
pub struct StaticDiscoveryService {
    endpoints: Vec<ServiceEndpoint>,
}

impl StaticDiscoveryService {
    /// Service that always answers with `endpoints`.
    pub fn new(endpoints: Vec<ServiceEndpoint>) -> Self {
        Self { endpoints }
    }
}

impl DiscoveryService for StaticDiscoveryService {
    fn resolve(&self, _options: DiscoveryOptions, reply: DiscoveryReply) {
        reply.on_success(self.endpoints.clone());
    }
}

/// Resolves an [`Endpoint`] per call.
#[derive(Clone)]
pub struct EndpointDiscovery {
    service: Arc<dyn DiscoveryService>,
    timeout: Option<Duration>,
}

impl EndpointDiscovery {
    /// Discovery through `service` with no timeout.
    pub fn new(service: Arc<dyn DiscoveryService>) -> Self {
        Self {
            service,
            timeout: None,
        }
    }

    /// Bounds how long a single exchange may take.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Runs one discovery exchange and applies the selection policy.
    pub async fn discover(&self, credentials: &Credentials) -> Result<Endpoint, DiscoveryError> {
        let (reply, rx) = DiscoveryReply::pair();
        self.service
            .resolve(DiscoveryOptions::from_credentials(credentials), reply);

        let answer = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, rx)
                .await
                .map_err(|_| DiscoveryError::Timeout(limit))?,
            None => rx.await,
        };

        let candidates = match answer {
            Ok(Ok(candidates)) => candidates,
            Ok(Err(error_text)) => {
                log::error!("Failed to query service discovery. errorText[{}]", error_text);
                return Err(DiscoveryError::Exchange(error_text));
            }
            Err(_) => {
                log::error!("Service discovery completed without a reply");
                return Err(DiscoveryError::NoReply);
            }
        };

        match select_endpoint(&candidates, &credentials.region) {
            Some(endpoint) => {
                log::info!("Set endpointUrl[{}] and endpointPort[{}].", endpoint.url, endpoint.port);
                Ok(endpoint)
            }
            None => {
                log::error!(
                    "No discovered endpoint matches region [{}] ({} candidates)",
                    credentials.region,
                    candidates.len()
                );
                Err(DiscoveryError::NoMatchingEndpoint {
                    region: credentials.region.clone(),
                    candidates: candidates.len(),
                })
            }
        }
    }
}
