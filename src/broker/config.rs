//! Broker configuration

use std::time::Duration;

use serde::Serialize;

use crate::error::ConfigError;
use crate::retry::RetryPolicy;

/// Device metadata attached to every discovery message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub identifiers: Vec<String>,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub sw_version: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            identifiers: vec!["watchpost".into()],
            name: "Watchpost".into(),
            manufacturer: "Watchpost".into(),
            model: "Motion monitor".into(),
            sw_version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

/// Message broker connection settings
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    /// Delivery QoS for availability, discovery and state messages (0, 1 or 2)
    pub qos: u8,
    /// Prefix for availability and state topics
    pub base_topic: String,
    /// Prefix the home-automation host watches for discovery configs
    pub discovery_prefix: String,
    pub device: DeviceInfo,
    /// Reconnect backoff after a dropped connection
    pub retry: RetryPolicy,
    /// Upper bound for one connection attempt
    pub connect_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "watchpost".into(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
            qos: 1,
            base_topic: "watchpost".into(),
            discovery_prefix: "homeassistant".into(),
            device: DeviceInfo::default(),
            retry: RetryPolicy::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl BrokerConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = id.into();
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn qos(mut self, qos: u8) -> Self {
        self.qos = qos;
        self
    }

    pub fn base_topic(mut self, topic: impl Into<String>) -> Self {
        self.base_topic = topic.into().trim_end_matches('/').to_string();
        self
    }

    pub fn discovery_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.discovery_prefix = prefix.into().trim_end_matches('/').to_string();
        self
    }

    pub fn device(mut self, device: DeviceInfo) -> Self {
        self.device = device;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Retained "online"/"offline" topic
    pub fn availability_topic(&self) -> String {
        format!("{}/availability", self.base_topic)
    }

    /// State topic for one capability
    pub fn state_topic(&self, key: &str) -> String {
        format!("{}/{}/state", self.base_topic, key)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::MissingBrokerHost);
        }
        if self.qos > 2 {
            return Err(ConfigError::InvalidQos(self.qos));
        }
        if self.base_topic.is_empty() || self.discovery_prefix.is_empty() {
            return Err(ConfigError::Invalid("broker topics must not be empty".into()));
        }
        Ok(())
    }
}
