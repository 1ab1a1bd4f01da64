//! Builds the supervisor and its collaborators from validated settings.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::runtime::Handle;

use lib_stream::configs::{fetch_credentials, EmbeddedInstruments, JsonFileInstruments};
use lib_stream::core::{
    Credentials, DiscoveryService, EndpointDiscovery, EventSink, InstrumentSource, LogProcessor,
    SessionConnector, SessionFactory, SessionSupervisor, StaticDiscoveryService,
    SubscriptionBatcher,
};
use lib_stream::ingestors::SimulatedConnector;
use lib_stream::retrieve::RdpDiscoveryService;

use crate::stream_logic::config::{CredentialSource, DiscoveryMode, SessionMode, StreamSettings};

pub async fn resolve_credentials(source: &CredentialSource) -> Result<Credentials> {
    match source {
        CredentialSource::Inline(credentials) => Ok(credentials.clone()),
        CredentialSource::Encrypted { url, key } => fetch_credentials(url, key)
            .await
            .with_context(|| format!("Failed to load encrypted credentials from {}", url)),
    }
}

pub fn build_supervisor(
    settings: &StreamSettings,
    credentials: Credentials,
    runtime: Handle,
) -> Result<Arc<SessionSupervisor>> {
    let service: Arc<dyn DiscoveryService> = match &settings.discovery {
        DiscoveryMode::Rdp { base_url } => Arc::new(
            RdpDiscoveryService::new(base_url)
                .with_context(|| format!("Invalid discovery base URL {}", base_url))?,
        ),
        DiscoveryMode::Static(endpoints) => Arc::new(StaticDiscoveryService::new(endpoints.clone())),
    };
    let mut discovery = EndpointDiscovery::new(service);
    if let Some(timeout) = settings.discovery_timeout {
        discovery = discovery.with_timeout(timeout);
    }

    let connector: Arc<dyn SessionConnector> = match &settings.session {
        SessionMode::Simulated(simulated) => Arc::new(SimulatedConnector::new(simulated.clone())),
    };

    let batcher = SubscriptionBatcher::new(credentials.service_name.clone(), settings.max_batch_size)
        .with_view(settings.view.clone());

    let instruments: Arc<dyn InstrumentSource> = match &settings.instruments_file {
        Some(path) => Arc::new(JsonFileInstruments::new(path.clone())),
        None => Arc::new(EmbeddedInstruments),
    };

    let factory = SessionFactory::new(connector, credentials, settings.channel.clone());
    let sink = Arc::new(EventSink::new(runtime, Arc::new(LogProcessor)));

    let supervisor = SessionSupervisor::new(discovery, factory, batcher, instruments, sink)
        .with_restart_policy(settings.restart);
    Ok(Arc::new(supervisor))
}
