//! Plain data shared across the session engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Feed credentials, loaded once at startup and never mutated.
///
/// `machine_id` doubles as the username and `app_key` as the client id on
/// every exchange with the feed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    /// Machine id, used as the username.
    pub machine_id: String,
    /// Application key, used as the client id.
    pub app_key: String,
    /// Password for the machine id.
    pub password: String,
    /// Region code used as the endpoint prefix during discovery (e.g. `us-east-1`).
    pub region: String,
    /// Market-data service subscriptions are made on.
    #[serde(alias = "service")]
    pub service_name: String,
}

impl Credentials {
    /// Credentials from their five parts.
    pub fn new(
        machine_id: impl Into<String>,
        app_key: impl Into<String>,
        password: impl Into<String>,
        region: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            machine_id: machine_id.into(),
            app_key: app_key.into(),
            password: password.into(),
            region: region.into(),
            service_name: service_name.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("machine_id", &self.machine_id)
            .field("app_key", &self.app_key)
            .field("password", &"<redacted>")
            .field("region", &self.region)
            .field("service_name", &self.service_name)
            .finish()
    }
}

/// A resolved streaming endpoint. Recomputed on every supervisor cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name.
    pub url: String,
    /// Port.
    pub port: u16,
}

impl Endpoint {
    /// Endpoint at `url:port`.
    pub fn new(url: impl Into<String>, port: u16) -> Self {
        Self { url: url.into(), port }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.url, self.port)
    }
}

/// Identifier handed back by the session for a registered request.
/// Only used for log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
