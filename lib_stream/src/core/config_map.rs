//! Nested session configuration handed to the connector.
//!
//! The structure mirrors the consumer/channel groups the feed's session layer
//! understands:
//!
//! ```text
//! ConsumerGroup.ConsumerList[<consumer>] = { Channel, RequestTimeout }
//! ChannelGroup.ChannelList[<channel>]    = { ChannelType, Host, Port, EnableSessionManagement }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::types::Endpoint;

/// Name of the single channel entry every consumer points at.
pub const CHANNEL_NAME: &str = "Main_Channel";
/// Prefix of generated consumer names.
pub const CONSUMER_PREFIX: &str = "Consumer_";

/// Channel-level knobs that do not come from discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSettings {
    /// Value for `ChannelType`, e.g. `ChannelType::RSSL_ENCRYPTED`.
    pub channel_type: String,
    /// Value for `RequestTimeout`, in milliseconds.
    pub request_timeout_ms: u64,
    /// Value for `EnableSessionManagement`.
    pub enable_session_management: bool,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            channel_type: "ChannelType::RSSL_ENCRYPTED".to_string(),
            request_timeout_ms: 45_000,
            enable_session_management: true,
        }
    }
}

/// One `ConsumerList` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConsumerEntry {
    /// Name of the channel entry to use.
    pub channel: String,
    /// Milliseconds before a pending request is abandoned.
    pub request_timeout: u64,
}

/// One `ChannelList` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChannelEntry {
    /// Transport and security mode.
    pub channel_type: String,
    /// Endpoint host.
    pub host: String,
    /// Endpoint port, as the session layer expects it.
    pub port: String,
    /// `1` lets the transport manage reconnection.
    pub enable_session_management: u8,
}

/// The `ConsumerGroup` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConsumerGroup {
    /// Consumers by name.
    pub consumer_list: BTreeMap<String, ConsumerEntry>,
}

/// The `ChannelGroup` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChannelGroup {
    /// Channels by name.
    pub channel_list: BTreeMap<String, ChannelEntry>,
}

/// The full configuration map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionConfigMap {
    /// Consumer definitions.
    pub consumer_group: ConsumerGroup,
    /// Channel definitions.
    pub channel_group: ChannelGroup,
}

impl SessionConfigMap {
    /// Builds the map for one consumer bound to [`CHANNEL_NAME`] at `endpoint`.
    pub fn for_consumer(consumer_name: &str, endpoint: &Endpoint, settings: &ChannelSettings) -> Self {
        let mut map = SessionConfigMap::default();
        map.consumer_group.consumer_list.insert(
            consumer_name.to_string(),
            ConsumerEntry {
                channel: CHANNEL_NAME.to_string(),
                request_timeout: settings.request_timeout_ms,
            },
        );
        map.channel_group.channel_list.insert(
            CHANNEL_NAME.to_string(),
            ChannelEntry {
                channel_type: settings.channel_type.clone(),
                host: endpoint.url.clone(),
                port: endpoint.port.to_string(),
                enable_session_management: u8::from(settings.enable_session_management),
            },
        );
        map
    }

    /// Consumer entry by name.
    pub fn consumer(&self, name: &str) -> Option<&ConsumerEntry> {
        self.consumer_group.consumer_list.get(name)
    }

    /// Channel entry by name.
    pub fn channel(&self, name: &str) -> Option<&ChannelEntry> {
        self.channel_group.channel_list.get(name)
    }

    /// Channel entry the named consumer is wired to.
    pub fn channel_for(&self, consumer_name: &str) -> Option<&ChannelEntry> {
        self.consumer(consumer_name)
            .and_then(|consumer| self.channel(&consumer.channel))
    }
}
