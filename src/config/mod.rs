//! Configuration management

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub esl: EslConfig,
    pub transfer: TransferConfig,
    pub scheduler: SchedulerConfig,
    pub click_to_call: ClickToCallConfig,
    pub ticketing: TicketingConfig,
    pub notifier: NotifierConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Event-socket connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EslConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub reconnect_max_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
}

impl EslConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Hold audio played to the waiting caller
    pub moh_resource: String,
    pub default_ring_timeout_secs: u32,
    /// Caller id name shown on the candidate leg
    pub caller_id_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub interval_secs: u64,
    /// Minimum gap between notifications for the same ticket
    pub min_interval_secs: u64,
    pub max_notifications: u32,
    /// Tenants this instance polls. An empty list does not survive the
    /// source round-trip in `Config::load`, so it must default back in.
    #[serde(default)]
    pub tenants: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickToCallConfig {
    pub max_attempts: u32,
    /// Backoff window returned on retryable failures
    pub retry_after_secs: u64,
    /// Upper bound on waiting for the bridged call to finish
    pub call_timeout_secs: u64,
    pub answer_timeout_secs: u64,
    pub default_gateway: String,
    pub record: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketingConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            esl: EslConfig {
                host: "127.0.0.1".to_string(),
                port: 8021,
                password: "ClueCon".to_string(),
                connect_timeout_secs: 10,
                command_timeout_secs: 30,
                reconnect_max_attempts: 5,
                reconnect_base_delay_ms: 500,
                reconnect_max_delay_ms: 10_000,
            },
            transfer: TransferConfig {
                moh_resource: "local_stream://moh".to_string(),
                default_ring_timeout_secs: 30,
                caller_id_name: "Virtual Attendant".to_string(),
            },
            scheduler: SchedulerConfig {
                interval_secs: 60,
                min_interval_secs: 600,
                max_notifications: 3,
                tenants: vec![],
            },
            click_to_call: ClickToCallConfig {
                max_attempts: 3,
                retry_after_secs: 120,
                call_timeout_secs: 3600,
                answer_timeout_secs: 30,
                default_gateway: "default".to_string(),
                record: true,
            },
            ticketing: TicketingConfig {
                base_url: "http://localhost:9000".to_string(),
                api_key: None,
                timeout_secs: 10,
            },
            notifier: NotifierConfig {
                base_url: "http://localhost:9100".to_string(),
                timeout_secs: 10,
            },
        }
    }
}

impl Config {
    /// Load from an optional TOML file with environment overrides
    /// (`HANDOVER_ESL__HOST` style), on top of the defaults.
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("HANDOVER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
