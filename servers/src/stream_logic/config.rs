use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use lib_stream::configs::{default_view, view_from_acronyms};
use lib_stream::core::{ChannelSettings, Credentials, FieldView, RestartPolicy, ServiceEndpoint};
use lib_stream::ingestors::SimulatedConfig;

const DEFAULT_CONFIG_FILE: &str = "server_stream.conf";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing configuration value: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("Unknown {key} [{value}]")]
    UnknownMode { key: &'static str, value: String },
}

/// One statically configured discovery candidate.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StaticEndpointConfig {
    pub endpoint: String,
    pub port: u16,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default = "default_transport")]
    pub transport: String,
}

fn default_transport() -> String {
    "tcp".to_string()
}

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Self-healing streaming market-data session", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "RICSTREAM_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "RICSTREAM_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "RICSTREAM_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "RICSTREAM_MACHINE_ID", help = "Machine id used as username.")]
    pub machine_id: Option<String>,

    #[clap(long, env = "RICSTREAM_APP_KEY", help = "Application key used as client id.")]
    pub app_key: Option<String>,

    #[clap(long, env = "RICSTREAM_PASSWORD", help = "Password for the machine id.")]
    pub password: Option<String>,

    #[clap(long, env = "RICSTREAM_REGION", help = "Region prefix of the streaming endpoint, e.g. ap-southeast-1.")]
    pub region: Option<String>,

    #[clap(long, env = "RICSTREAM_SERVICE_NAME", help = "Name of the market-data service to subscribe on.")]
    pub service_name: Option<String>,

    #[clap(long, env = "RICSTREAM_SECRETS_URL", help = "URL of the encrypted credentials file.")]
    pub secrets_url: Option<String>,

    #[clap(long, env = "RICSTREAM_SECRETS_KEY", help = "Hex encoded AES-256 key for the credentials file.")]
    pub secrets_key: Option<String>,

    #[clap(long, env = "RICSTREAM_DISCOVERY_MODE", help = "Endpoint discovery: rdp or static.")]
    pub discovery_mode: Option<String>,

    #[clap(long, env = "RICSTREAM_RDP_BASE_URL", help = "Base URL of the platform token and discovery services.")]
    pub rdp_base_url: Option<String>,

    #[clap(skip)]
    pub static_endpoints: Option<Vec<StaticEndpointConfig>>,

    #[clap(long, env = "RICSTREAM_DISCOVERY_TIMEOUT_MS", help = "Upper bound for one discovery exchange.")]
    pub discovery_timeout_ms: Option<u64>,

    #[clap(long, env = "RICSTREAM_SESSION_MODE", help = "Session connector to use (simulated).")]
    pub session_mode: Option<String>,

    #[clap(long, env = "RICSTREAM_SIMULATED_FAIL_FIRST_OPENS", help = "Simulated connector: refuse this many opens first.")]
    pub simulated_fail_first_opens: Option<usize>,

    #[clap(long, env = "RICSTREAM_SIMULATED_SESSION_LIFETIME_MS", help = "Simulated connector: drop the connection after this long.")]
    pub simulated_session_lifetime_ms: Option<u64>,

    #[clap(long, env = "RICSTREAM_SIMULATED_UPDATE_INTERVAL_MS", help = "Simulated connector: delay between update ticks.")]
    pub simulated_update_interval_ms: Option<u64>,

    #[clap(long, env = "RICSTREAM_CHANNEL_TYPE", help = "Channel type handed to the session layer.")]
    pub channel_type: Option<String>,

    #[clap(long, env = "RICSTREAM_REQUEST_TIMEOUT_MS", help = "Milliseconds before a pending request is abandoned.")]
    pub request_timeout_ms: Option<u64>,

    #[clap(long, env = "RICSTREAM_ENABLE_SESSION_MANAGEMENT", help = "Let the transport manage reconnection (true/false).")]
    pub enable_session_management: Option<bool>,

    #[clap(long, env = "RICSTREAM_MAX_BATCH_SIZE", help = "Maximum instruments per subscription request.")]
    pub max_batch_size: Option<usize>,

    #[clap(long, env = "RICSTREAM_USE_VIEW", help = "Request only the configured field subset (true/false).")]
    pub use_view: Option<bool>,

    #[clap(long, env = "RICSTREAM_VIEW_FIELDS", value_delimiter = ',', help = "Comma separated field acronyms for the view; the full table is used when unset.")]
    pub view_fields: Option<Vec<String>>,

    #[clap(long, env = "RICSTREAM_INSTRUMENTS_FILE", help = "JSON array of instruments; the embedded list is used when unset.")]
    pub instruments_file: Option<PathBuf>,

    #[clap(long, env = "RICSTREAM_RESTART_BASE_DELAY_MS", help = "Base delay in milliseconds between session attempts.")]
    pub restart_base_delay_ms: Option<u64>,

    #[clap(long, env = "RICSTREAM_RESTART_MAX_DELAY_MS", help = "Maximum delay in milliseconds between session attempts.")]
    pub restart_max_delay_ms: Option<u64>,

    #[clap(long, env = "RICSTREAM_RESTART_JITTER", help = "Randomize restart delays (true/false).")]
    pub restart_jitter: Option<bool>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            machine_id: other.machine_id.or(self.machine_id),
            app_key: other.app_key.or(self.app_key),
            password: other.password.or(self.password),
            region: other.region.or(self.region),
            service_name: other.service_name.or(self.service_name),
            secrets_url: other.secrets_url.or(self.secrets_url),
            secrets_key: other.secrets_key.or(self.secrets_key),
            discovery_mode: other.discovery_mode.or(self.discovery_mode),
            rdp_base_url: other.rdp_base_url.or(self.rdp_base_url),
            static_endpoints: other.static_endpoints.or(self.static_endpoints),
            discovery_timeout_ms: other.discovery_timeout_ms.or(self.discovery_timeout_ms),
            session_mode: other.session_mode.or(self.session_mode),
            simulated_fail_first_opens: other.simulated_fail_first_opens.or(self.simulated_fail_first_opens),
            simulated_session_lifetime_ms: other.simulated_session_lifetime_ms.or(self.simulated_session_lifetime_ms),
            simulated_update_interval_ms: other.simulated_update_interval_ms.or(self.simulated_update_interval_ms),
            channel_type: other.channel_type.or(self.channel_type),
            request_timeout_ms: other.request_timeout_ms.or(self.request_timeout_ms),
            enable_session_management: other.enable_session_management.or(self.enable_session_management),
            max_batch_size: other.max_batch_size.or(self.max_batch_size),
            use_view: other.use_view.or(self.use_view),
            view_fields: other.view_fields.or(self.view_fields),
            instruments_file: other.instruments_file.or(self.instruments_file),
            restart_base_delay_ms: other.restart_base_delay_ms.or(self.restart_base_delay_ms),
            restart_max_delay_ms: other.restart_max_delay_ms.or(self.restart_max_delay_ms),
            restart_jitter: other.restart_jitter.or(self.restart_jitter),
        }
    }

    fn defaults() -> Config {
        let channel = ChannelSettings::default();
        Config {
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            discovery_mode: Some("rdp".to_string()),
            rdp_base_url: Some(lib_stream::retrieve::DEFAULT_RDP_BASE_URL.to_string()),
            discovery_timeout_ms: Some(30_000),
            session_mode: Some("simulated".to_string()),
            simulated_fail_first_opens: Some(0),
            simulated_update_interval_ms: Some(1_000),
            channel_type: Some(channel.channel_type),
            request_timeout_ms: Some(channel.request_timeout_ms),
            enable_session_management: Some(channel.enable_session_management),
            max_batch_size: Some(1),
            use_view: Some(true),
            restart_base_delay_ms: Some(1_000),
            restart_max_delay_ms: Some(60_000),
            restart_jitter: Some(true),
            ..Default::default()
        }
    }
}

/// Layers defaults, the config file and the parsed CLI/env values.
pub fn load_config() -> Config {
    layer_config(Config::parse())
}

pub fn layer_config(cli_args: Config) -> Config {
    let config_file_path = cli_args
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = Config::defaults();

    if config_file_path.exists() {
        match fs::read_to_string(&config_file_path) {
            Ok(config_str) => match serde_json::from_str::<Config>(&config_str) {
                Ok(file_config) => current_config = current_config.merge(file_config),
                Err(e) => log::warn!(
                    "Failed to parse config file: {} ({}). Falling back to other sources.",
                    config_file_path.display(),
                    e
                ),
            },
            Err(e) => log::warn!(
                "Failed to read config file: {} ({}). Falling back to other sources.",
                config_file_path.display(),
                e
            ),
        }
    } else {
        log::info!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            config_file_path.display()
        );
    }

    current_config.merge(cli_args)
}

/// Where the feed credentials come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    Inline(Credentials),
    Encrypted { url: String, key: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryMode {
    Rdp { base_url: String },
    Static(Vec<ServiceEndpoint>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionMode {
    Simulated(SimulatedConfig),
}

/// Validated, fully resolved settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    pub log_dir: PathBuf,
    pub log_level: String,
    pub credentials: CredentialSource,
    pub discovery: DiscoveryMode,
    pub discovery_timeout: Option<Duration>,
    pub session: SessionMode,
    pub channel: ChannelSettings,
    pub max_batch_size: NonZeroUsize,
    /// Field subset attached to every batch, `None` when views are disabled.
    pub view: Option<FieldView>,
    pub instruments_file: Option<PathBuf>,
    pub restart: RestartPolicy,
}

fn required(value: Option<String>, key: &'static str) -> Result<String, ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(key)),
    }
}

impl Config {
    pub fn validate(self) -> Result<StreamSettings, ConfigError> {
        let credentials = match (self.secrets_url, self.secrets_key) {
            (Some(url), Some(key)) => CredentialSource::Encrypted { url, key },
            (Some(_), None) => return Err(ConfigError::Missing("secretsKey")),
            _ => CredentialSource::Inline(Credentials::new(
                required(self.machine_id, "machineId")?,
                required(self.app_key, "appKey")?,
                required(self.password, "password")?,
                required(self.region, "region")?,
                required(self.service_name, "serviceName")?,
            )),
        };

        let discovery = match self.discovery_mode.as_deref().unwrap_or("rdp") {
            "rdp" => DiscoveryMode::Rdp {
                base_url: required(self.rdp_base_url, "rdpBaseUrl")?,
            },
            "static" => {
                let endpoints = self
                    .static_endpoints
                    .filter(|list| !list.is_empty())
                    .ok_or(ConfigError::Missing("staticEndpoints"))?;
                DiscoveryMode::Static(
                    endpoints
                        .into_iter()
                        .map(|e| ServiceEndpoint {
                            endpoint: e.endpoint,
                            port: e.port,
                            locations: e.locations,
                            transport: e.transport,
                        })
                        .collect(),
                )
            }
            other => {
                return Err(ConfigError::UnknownMode {
                    key: "discoveryMode",
                    value: other.to_string(),
                });
            }
        };

        let session = match self.session_mode.as_deref().unwrap_or("simulated") {
            "simulated" => {
                let update_interval_ms = self.simulated_update_interval_ms.unwrap_or(1_000);
                if update_interval_ms == 0 {
                    return Err(ConfigError::Invalid {
                        key: "simulatedUpdateIntervalMs",
                        reason: "must be a positive number of milliseconds".to_string(),
                    });
                }
                SessionMode::Simulated(SimulatedConfig {
                    fail_first_opens: self.simulated_fail_first_opens.unwrap_or(0),
                    session_lifetime: self.simulated_session_lifetime_ms.map(Duration::from_millis),
                    update_interval: Duration::from_millis(update_interval_ms),
                })
            }
            other => {
                return Err(ConfigError::UnknownMode {
                    key: "sessionMode",
                    value: other.to_string(),
                });
            }
        };

        let max_batch_size = self
            .max_batch_size
            .and_then(NonZeroUsize::new)
            .ok_or(ConfigError::Invalid {
                key: "maxBatchSize",
                reason: "must be a positive integer".to_string(),
            })?;

        let view = if self.use_view.unwrap_or(true) {
            match self.view_fields {
                Some(fields) if !fields.is_empty() => {
                    Some(view_from_acronyms(&fields).map_err(|e| ConfigError::Invalid {
                        key: "viewFields",
                        reason: e.to_string(),
                    })?)
                }
                _ => Some(default_view()),
            }
        } else {
            None
        };

        let defaults = ChannelSettings::default();
        let channel = ChannelSettings {
            channel_type: self.channel_type.unwrap_or(defaults.channel_type),
            request_timeout_ms: self.request_timeout_ms.unwrap_or(defaults.request_timeout_ms),
            enable_session_management: self
                .enable_session_management
                .unwrap_or(defaults.enable_session_management),
        };

        let restart = RestartPolicy {
            base: Duration::from_millis(self.restart_base_delay_ms.unwrap_or(1_000)),
            max: Duration::from_millis(self.restart_max_delay_ms.unwrap_or(60_000)),
            jitter: self.restart_jitter.unwrap_or(true),
        };
        if restart.base > restart.max {
            return Err(ConfigError::Invalid {
                key: "restartBaseDelayMs",
                reason: "must not exceed restartMaxDelayMs".to_string(),
            });
        }

        Ok(StreamSettings {
            log_dir: self.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: self.log_level.unwrap_or_else(|| "info".to_string()),
            credentials,
            discovery,
            discovery_timeout: self
                .discovery_timeout_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
            session,
            channel,
            max_batch_size,
            view,
            instruments_file: self.instruments_file,
            restart,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn inline_credentials() -> Config {
        Config {
            machine_id: Some("GE-A-01".to_string()),
            app_key: Some("key".to_string()),
            password: Some("pw".to_string()),
            region: Some("ap-southeast-1".to_string()),
            service_name: Some("ELEKTRON_DD".to_string()),
            ..Default::default()
        }
    }

    fn with_file(contents: &str, cli: Config) -> Config {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        layer_config(Config {
            config_path: Some(file.path().to_path_buf()),
            ..cli
        })
    }

    #[test]
    fn defaults_validate_with_inline_credentials() {
        let settings = Config::defaults().merge(inline_credentials()).validate().unwrap();
        assert_eq!(settings.max_batch_size.get(), 1);
        assert_eq!(settings.channel, ChannelSettings::default());
        assert_eq!(settings.restart, RestartPolicy::default());
        assert!(matches!(settings.discovery, DiscoveryMode::Rdp { .. }));
        assert!(matches!(settings.credentials, CredentialSource::Inline(_)));
    }

    #[test]
    fn cli_overrides_file_which_overrides_defaults() {
        let file = r#"{"maxBatchSize": 50, "region": "us-east-1", "logLevel": "debug"}"#;
        let cli = Config {
            max_batch_size: Some(100),
            ..inline_credentials()
        };
        let merged = with_file(file, cli);

        assert_eq!(merged.max_batch_size, Some(100));
        assert_eq!(merged.log_level.as_deref(), Some("debug"));
        assert_eq!(merged.region.as_deref(), Some("ap-southeast-1"));
        assert_eq!(merged.request_timeout_ms, Some(45_000));
    }

    #[test]
    fn static_endpoints_come_from_the_file() {
        let file = r#"{
            "discoveryMode": "static",
            "staticEndpoints": [
                {"endpoint": "ap-southeast-1-onprem-1", "port": 14002, "locations": ["a", "b"]}
            ]
        }"#;
        let settings = with_file(file, inline_credentials()).validate().unwrap();
        match settings.discovery {
            DiscoveryMode::Static(endpoints) => {
                assert_eq!(endpoints.len(), 1);
                assert_eq!(endpoints[0].transport, "tcp");
            }
            other => panic!("unexpected discovery mode {:?}", other),
        }
    }

    #[test]
    fn unparsable_file_falls_back_to_defaults() {
        let merged = with_file("{ not json", inline_credentials());
        assert_eq!(merged.max_batch_size, Some(1));
    }

    #[test]
    fn validation_errors() {
        let missing = Config::defaults().validate().unwrap_err();
        assert_eq!(missing, ConfigError::Missing("machineId"));

        let zero = Config {
            max_batch_size: Some(0),
            ..Config::defaults().merge(inline_credentials())
        };
        assert!(matches!(zero.validate(), Err(ConfigError::Invalid { key: "maxBatchSize", .. })));

        let unknown = Config {
            discovery_mode: Some("dns".to_string()),
            ..Config::defaults().merge(inline_credentials())
        };
        assert_eq!(
            unknown.validate().unwrap_err(),
            ConfigError::UnknownMode {
                key: "discoveryMode",
                value: "dns".to_string()
            }
        );

        let half_secret = Config {
            secrets_url: Some("https://example.net/creds.enc".to_string()),
            ..Config::defaults()
        };
        assert_eq!(half_secret.validate().unwrap_err(), ConfigError::Missing("secretsKey"));

        let frozen_feed = Config {
            simulated_update_interval_ms: Some(0),
            ..Config::defaults().merge(inline_credentials())
        };
        assert!(matches!(
            frozen_feed.validate(),
            Err(ConfigError::Invalid { key: "simulatedUpdateIntervalMs", .. })
        ));
    }

    #[test]
    fn view_fields_select_the_subscription_view() {
        let file = r#"{"viewFields": ["BID", "ASK", "QUOTIM"]}"#;
        let settings = with_file(file, inline_credentials()).validate().unwrap();
        assert_eq!(settings.view.map(|v| v.field_ids), Some(vec![22, 25, 1025]));

        let full = Config::defaults().merge(inline_credentials()).validate().unwrap();
        assert_eq!(full.view, Some(default_view()));

        let disabled = Config {
            use_view: Some(false),
            view_fields: Some(vec!["BID".to_string()]),
            ..Config::defaults().merge(inline_credentials())
        };
        assert_eq!(disabled.validate().unwrap().view, None);

        let unknown = Config {
            view_fields: Some(vec!["BID".to_string(), "SPREAD".to_string()]),
            ..Config::defaults().merge(inline_credentials())
        };
        match unknown.validate() {
            Err(ConfigError::Invalid { key: "viewFields", reason }) => assert!(reason.contains("SPREAD")),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn encrypted_credentials_skip_inline_checks() {
        let settings = Config {
            secrets_url: Some("https://example.net/creds.enc".to_string()),
            secrets_key: Some("00".repeat(32)),
            ..Config::defaults()
        }
        .validate()
        .unwrap();
        assert!(matches!(settings.credentials, CredentialSource::Encrypted { .. }));
    }
}
