//! TOML configuration for the PongU client
//!
//! Every section is optional. Credentials may be given literally or through
//! `username_env` / `password_env`; a set environment variable wins over the
//! literal value.

use crate::session::{validate_nick, Credentials, Session, SessionError, DEFAULT_BROKER_PORT};
use crate::transport::mqtt::MqttSettings;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Main client configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PonguConfig {
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub client: ClientSection,
    /// Topic values the store starts out with
    #[serde(default)]
    pub userdata: HashMap<String, Value>,
}

/// Session section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSection {
    #[serde(default = "default_nick")]
    pub nick: String,
    #[serde(default)]
    pub verbose: bool,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            nick: default_nick(),
            verbose: false,
        }
    }
}

fn default_nick() -> String {
    "anonymous".to_string()
}

/// Broker section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: None,
            password: None,
            username_env: None,
            password_env: None,
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    DEFAULT_BROKER_PORT
}

/// Client tuning section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSection {
    /// How long a collect waits for the first message (default: 3)
    #[serde(default = "default_collect_window")]
    pub collect_window_secs: u64,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Most distinct topics held between collects
    #[serde(default = "default_inbound_capacity")]
    pub inbound_capacity: usize,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            collect_window_secs: default_collect_window(),
            keep_alive_secs: default_keep_alive(),
            inbound_capacity: default_inbound_capacity(),
            reconnect_delay_ms: default_reconnect_delay(),
        }
    }
}

fn default_collect_window() -> u64 {
    3
}

fn default_keep_alive() -> u64 {
    60
}

fn default_inbound_capacity() -> usize {
    64
}

fn default_reconnect_delay() -> u64 {
    1000
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid nickname: {0}")]
    InvalidNick(#[from] SessionError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PonguConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: PonguConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_nick(&self.session.nick)?;

        if self.broker.host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker.host cannot be empty".to_string(),
            ));
        }
        if self.broker.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.port must be between 1 and 65535".to_string(),
            ));
        }
        if self.client.inbound_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "client.inbound_capacity must be at least 1".to_string(),
            ));
        }
        if self.client.keep_alive_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "client.keep_alive_secs must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// Broker username, preferring the named environment variable
    pub fn username(&self) -> Option<String> {
        Self::get_env_var_optional(self.broker.username_env.as_ref())
            .or_else(|| self.broker.username.clone())
    }

    /// Broker password, preferring the named environment variable
    pub fn password(&self) -> Option<String> {
        Self::get_env_var_optional(self.broker.password_env.as_ref())
            .or_else(|| self.broker.password.clone())
    }

    /// Credentials are only sent when a username is known
    pub fn credentials(&self) -> Option<Credentials> {
        self.username()
            .map(|username| Credentials::new(username, self.password().unwrap_or_default()))
    }

    pub fn to_session(&self) -> Result<Session, SessionError> {
        Session::new(
            self.session.nick.clone(),
            self.broker.host.clone(),
            self.broker.port,
            self.credentials(),
        )
    }

    pub fn mqtt_settings(&self) -> MqttSettings {
        MqttSettings {
            keep_alive: Duration::from_secs(self.client.keep_alive_secs),
            reconnect_delay: Duration::from_millis(self.client.reconnect_delay_ms),
            ..MqttSettings::default()
        }
    }

    pub fn collect_window(&self) -> Duration {
        Duration::from_secs(self.client.collect_window_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[session]
nick = "alice"
verbose = true

[broker]
host = "broker.example.org"
port = 1884
username = "student"
password = "hunter2"

[client]
collect_window_secs = 5
keep_alive_secs = 30
inbound_capacity = 16
reconnect_delay_ms = 250

[userdata]
"class/recv" = { greeting = "welcome" }
"#;

        let config: PonguConfig = toml::from_str(toml_content).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.session.nick, "alice");
        assert!(config.session.verbose);
        assert_eq!(config.broker.host, "broker.example.org");
        assert_eq!(config.broker.port, 1884);
        assert_eq!(config.collect_window(), Duration::from_secs(5));
        assert_eq!(config.client.inbound_capacity, 16);
        assert_eq!(
            config.userdata["class/recv"],
            serde_json::json!({"greeting": "welcome"})
        );

        let settings = config.mqtt_settings();
        assert_eq!(settings.keep_alive, Duration::from_secs(30));
        assert_eq!(settings.reconnect_delay, Duration::from_millis(250));

        let credentials = config.credentials().unwrap();
        assert_eq!(credentials.username, "student");
        assert_eq!(credentials.password, "hunter2");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: PonguConfig = toml::from_str("").unwrap();
        assert_eq!(config, PonguConfig::default());
        assert_eq!(config.broker.host, "localhost");
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.collect_window(), Duration::from_secs(3));
        assert!(config.credentials().is_none());
        assert!(config.userdata.is_empty());
    }

    #[test]
    fn test_env_overrides_literal_credentials() {
        std::env::set_var("PONGU_TEST_CONFIG_USER", "from-env");
        let toml_content = r#"
[broker]
username = "literal"
username_env = "PONGU_TEST_CONFIG_USER"
password_env = "PONGU_TEST_CONFIG_UNSET_PASSWORD"
"#;
        let config: PonguConfig = toml::from_str(toml_content).unwrap();
        let credentials = config.credentials().unwrap();
        assert_eq!(credentials.username, "from-env");
        assert_eq!(credentials.password, "");
        std::env::remove_var("PONGU_TEST_CONFIG_USER");
    }

    #[test]
    fn test_validation_failures() {
        let mut config = PonguConfig::default();
        config.client.inbound_capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));

        let mut config = PonguConfig::default();
        config.session.nick = "bad/nick".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidNick(_))));

        let mut config = PonguConfig::default();
        config.broker.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_to_session() {
        let mut config = PonguConfig::default();
        config.session.nick = "bob".to_string();
        let session = config.to_session().unwrap();
        assert_eq!(session.nick(), "bob");
        assert_eq!(session.host(), "localhost");
        assert!(session.client_id().starts_with("bob_"));
    }
}
