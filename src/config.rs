// src/config.rs
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Runtime tunables for the broker, its clients and the access guard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqConfig {
    /// How long the broker waits on an empty command inbox per loop iteration.
    #[serde(default = "default_broker_poll_interval")]
    pub broker_poll_interval_ms: u64,

    /// Upper bound on a channel's wait for the broker's acknowledgment.
    #[serde(default = "default_response_timeout")]
    pub response_timeout_ms: u64,

    /// Pause between two `process_events` cycles.
    #[serde(default = "default_event_poll_interval")]
    pub event_poll_interval_ms: u64,

    /// Timeout `Resource::access_default` waits for the guarded value.
    #[serde(default = "default_resource_access_timeout")]
    pub resource_access_timeout_ms: u64,

    /// Bounded wait of the guard worker on its return slot.
    #[serde(default = "default_resource_return_poll")]
    pub resource_return_poll_ms: u64,

    #[serde(default = "default_amqp_username")]
    pub amqp_username: String,
    #[serde(default = "default_amqp_password")]
    pub amqp_password: String,
    #[serde(default = "default_amqp_vhost")]
    pub amqp_vhost: String,
}

fn default_broker_poll_interval() -> u64 {
    1
}

fn default_response_timeout() -> u64 {
    5000
}

fn default_event_poll_interval() -> u64 {
    1
}

fn default_resource_access_timeout() -> u64 {
    1000
}

fn default_resource_return_poll() -> u64 {
    100
}

fn default_amqp_username() -> String {
    "guest".to_string()
}

fn default_amqp_password() -> String {
    "guest".to_string()
}

fn default_amqp_vhost() -> String {
    "%2f".to_string()
}

impl Default for MqConfig {
    fn default() -> Self {
        Self {
            broker_poll_interval_ms: default_broker_poll_interval(),
            response_timeout_ms: default_response_timeout(),
            event_poll_interval_ms: default_event_poll_interval(),
            resource_access_timeout_ms: default_resource_access_timeout(),
            resource_return_poll_ms: default_resource_return_poll(),
            amqp_username: default_amqp_username(),
            amqp_password: default_amqp_password(),
            amqp_vhost: default_amqp_vhost(),
        }
    }
}

impl MqConfig {
    /// Build a config from `MOCKMQ_*` environment variables, reading a `.env`
    /// file first if one is present. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        let defaults = Self::default();

        Ok(Self {
            broker_poll_interval_ms: env_u64("MOCKMQ_BROKER_POLL_INTERVAL_MS", defaults.broker_poll_interval_ms)?,
            response_timeout_ms: env_u64("MOCKMQ_RESPONSE_TIMEOUT_MS", defaults.response_timeout_ms)?,
            event_poll_interval_ms: env_u64("MOCKMQ_EVENT_POLL_INTERVAL_MS", defaults.event_poll_interval_ms)?,
            resource_access_timeout_ms: env_u64(
                "MOCKMQ_RESOURCE_ACCESS_TIMEOUT_MS",
                defaults.resource_access_timeout_ms,
            )?,
            resource_return_poll_ms: env_u64("MOCKMQ_RESOURCE_RETURN_POLL_MS", defaults.resource_return_poll_ms)?,
            amqp_username: env::var("MOCKMQ_AMQP_USERNAME").unwrap_or(defaults.amqp_username),
            amqp_password: env::var("MOCKMQ_AMQP_PASSWORD").unwrap_or(defaults.amqp_password),
            amqp_vhost: env::var("MOCKMQ_AMQP_VHOST").unwrap_or(defaults.amqp_vhost),
        })
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config file at {}", path.display()))?;

        let config: MqConfig = serde_json::from_str(&content)
            .context("Configuration file contains invalid JSON")?;

        config.validate()?;
        Ok(config)
    }

    /// Prefer a config file when one can be found, otherwise fall back to the
    /// environment.
    pub fn load() -> Result<Self> {
        match find_config_file() {
            Ok(path) => {
                info!("Loading configuration from {}", path.display());
                Self::from_json_file(&path)
            }
            Err(_) => {
                debug!("No config file found, using environment");
                let config = Self::from_env()?;
                config.validate()?;
                Ok(config)
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.response_timeout_ms == 0 {
            return Err(anyhow!("Configuration error: response_timeout_ms cannot be zero"));
        }
        if self.resource_return_poll_ms == 0 {
            return Err(anyhow!("Configuration error: resource_return_poll_ms cannot be zero"));
        }
        Ok(())
    }

    pub fn broker_poll_interval(&self) -> Duration {
        Duration::from_millis(self.broker_poll_interval_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn event_poll_interval(&self) -> Duration {
        Duration::from_millis(self.event_poll_interval_ms)
    }

    pub fn resource_access_timeout(&self) -> Duration {
        Duration::from_millis(self.resource_access_timeout_ms)
    }

    pub fn resource_return_poll(&self) -> Duration {
        Duration::from_millis(self.resource_return_poll_ms)
    }

    pub fn amqp_uri(&self, host: &str, port: u16) -> String {
        format!(
            "amqp://{}:{}@{}:{}/{}",
            self.amqp_username, self.amqp_password, host, port, self.amqp_vhost
        )
    }
}

fn env_u64(key: &str, default: u64) -> Result<u64> {
    match env::var(key) {
        Ok(val) => val
            .parse()
            .context(format!("{} must be an unsigned integer, got {:?}", key, val)),
        Err(_) => Ok(default),
    }
}

pub fn find_config_file() -> Result<PathBuf> {
    let locations = [
        ("Current directory", Path::new("mockmq.json")),
        ("Current directory (alternative)", Path::new("config/mockmq.json")),
    ];

    for (location_name, path) in locations.iter() {
        if path.exists() {
            debug!("Found config file in {}: {}", location_name, path.display());
            return Ok(path.to_path_buf());
        }
    }

    if let Some(home_dir) = home::home_dir() {
        let home_config = home_dir.join(".mockmq.json");
        if home_config.exists() {
            debug!("Found config file in home directory: {}", home_config.display());
            return Ok(home_config);
        }
    }

    Err(anyhow!("Could not find a mockmq.json configuration file"))
}
