//! # Platform Service Discovery
//!
//! Resolves streaming endpoints over HTTP in two steps:
//!
//! 1. `POST auth/oauth2/v1/token` with a password grant for the machine id.
//! 2. `GET streaming/pricing/v1/?transport=tcp` with the returned bearer token.
//!
//! Each `services` entry of the second response becomes a
//! [`ServiceEndpoint`] candidate. Region filtering happens in
//! [`EndpointDiscovery`](crate::core::discovery::EndpointDiscovery).

use serde::Deserialize;
use std::sync::Arc;

use crate::core::discovery::{DiscoveryOptions, DiscoveryReply, DiscoveryService, ServiceEndpoint};
use crate::retrieve::ky_http::ApiClient;

/// Production base URL of the platform services.
pub const DEFAULT_RDP_BASE_URL: &str = "https://api.refinitiv.com/";

const TOKEN_PATH: &str = "auth/oauth2/v1/token";
const DISCOVERY_PATH: &str = "streaming/pricing/v1/";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct ServicesResponse {
    #[serde(default)]
    services: Vec<ServiceEntry>,
}

#[derive(Debug, Deserialize)]
struct ServiceEntry {
    endpoint: String,
    port: u16,
    #[serde(default)]
    location: Vec<String>,
    #[serde(default)]
    transport: String,
}

impl From<ServiceEntry> for ServiceEndpoint {
    fn from(entry: ServiceEntry) -> Self {
        ServiceEndpoint {
            endpoint: entry.endpoint,
            port: entry.port,
            locations: entry.location,
            transport: entry.transport,
        }
    }
}

/// [`DiscoveryService`] backed by the platform's HTTP token and discovery endpoints.
#[derive(Clone)]
pub struct RdpDiscoveryService {
    client: Arc<ApiClient>,
}

impl RdpDiscoveryService {
    /// Client for the services under `base_url`.
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        Ok(Self::with_client(ApiClient::new(base_url, None)?))
    }

    /// Client reusing an existing [`ApiClient`].
    pub fn with_client(client: ApiClient) -> Self {
        Self {
            client: Arc::new(client),
        }
    }

    /// Exchanges the machine credentials for an access token.
    pub async fn fetch_token(&self, options: &DiscoveryOptions) -> anyhow::Result<String> {
        let form = [
            ("grant_type", "password"),
            ("username", options.username.as_str()),
            ("password", options.password.as_str()),
            ("client_id", options.client_id.as_str()),
            ("scope", "trapi"),
            ("takeExclusiveSignOnControl", "true"),
        ];
        let token: TokenResponse = self.client.post_form(TOKEN_PATH, &form).await?.into_data()?;
        Ok(token.access_token)
    }

    /// Lists the TCP streaming endpoints visible to `access_token`.
    pub async fn fetch_endpoints(&self, access_token: &str) -> anyhow::Result<Vec<ServiceEndpoint>> {
        let services: ServicesResponse = self
            .client
            .with_auth_token(access_token)
            .get_json(DISCOVERY_PATH, &[("transport", "tcp")])
            .await?
            .into_data()?;
        Ok(services.services.into_iter().map(ServiceEndpoint::from).collect())
    }

    /// Token exchange followed by the endpoint listing.
    pub async fn discover(&self, options: &DiscoveryOptions) -> anyhow::Result<Vec<ServiceEndpoint>> {
        let token = self.fetch_token(options).await?;
        let endpoints = self.fetch_endpoints(&token).await?;
        log::debug!("Service discovery returned {} endpoints", endpoints.len());
        Ok(endpoints)
    }
}

impl DiscoveryService for RdpDiscoveryService {
    fn resolve(&self, options: DiscoveryOptions, reply: DiscoveryReply) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            reply.on_error("service discovery needs a tokio runtime");
            return;
        };
        let this = self.clone();
        runtime.spawn(async move {
            match this.discover(&options).await {
                Ok(endpoints) => reply.on_success(endpoints),
                Err(e) => reply.on_error(format!("{:#}", e)),
            }
        });
    }
}
