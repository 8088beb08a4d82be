//! Participant session identity
//!
//! A session pairs the user-visible nickname with a per-process instance id.
//! The instance id only ever appears inside the transport client id so that
//! two participants sharing a nickname do not kick each other off the broker.

use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Default MQTT port for unencrypted connections
pub const DEFAULT_BROKER_PORT: u16 = 1883;

/// Broker username/password pair, passed through to the broker unchanged
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SessionError {
    #[error("Nickname cannot be empty")]
    EmptyNick,
    #[error("Nickname '{0}' cannot start with whitespace")]
    LeadingWhitespace(String),
    #[error("Nickname '{0}' cannot contain MQTT wildcard or control characters")]
    InvalidNickChar(String),
    #[error("Broker host cannot be empty")]
    EmptyHost,
    #[error("Broker port cannot be zero")]
    InvalidPort,
}

/// One logical participant connected to one broker
#[derive(Debug, Clone)]
pub struct Session {
    nick: String,
    instance_id: Uuid,
    host: String,
    port: u16,
    credentials: Option<Credentials>,
}

impl Session {
    pub fn new(
        nick: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        credentials: Option<Credentials>,
    ) -> Result<Self, SessionError> {
        let nick = nick.into();
        let host = host.into();
        validate_nick(&nick)?;
        if host.trim().is_empty() {
            return Err(SessionError::EmptyHost);
        }
        if port == 0 {
            return Err(SessionError::InvalidPort);
        }

        Ok(Self {
            nick,
            instance_id: Uuid::new_v4(),
            host,
            port,
            credentials,
        })
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Transport-level client identifier: `{nick}_{instance_id}`
    pub fn client_id(&self) -> String {
        format!("{}_{}", self.nick, self.instance_id)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }
}

/// Validate a participant nickname
pub fn validate_nick(nick: &str) -> Result<(), SessionError> {
    if nick.is_empty() {
        return Err(SessionError::EmptyNick);
    }
    if nick.starts_with(char::is_whitespace) {
        return Err(SessionError::LeadingWhitespace(nick.to_string()));
    }
    if nick
        .chars()
        .any(|c| c == '+' || c == '#' || c == '/' || c.is_control())
    {
        return Err(SessionError::InvalidNickChar(nick.to_string()));
    }
    Ok(())
}
