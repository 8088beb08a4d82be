//! Topic names and topic-filter matching for the PongU service
//!
//! The service uses three fixed topics. Subscriptions registered for collection
//! are MQTT topic filters, so inbound topics are matched against them with the
//! usual `+` (single level) and `#` (multi level) wildcard rules.

use thiserror::Error;

/// Presence announcements, published once per successful connection
pub const PRESENCE_TOPIC: &str = "user_logs";

/// Responses published by participants (retained)
pub const RESPONSE_TOPIC: &str = "class/resp";

/// Broadcasts from the instructor to every participant
pub const BROADCAST_TOPIC: &str = "class/recv";

/// Check whether a concrete topic name matches a topic filter.
///
/// Topics starting with `$` are never matched by a filter starting with a
/// wildcard, per MQTT 3.1.1 section 4.7.2.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Validate a topic name used for publishing (no wildcards, not empty)
pub fn validate_publish_topic(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    if let Some(ch) = topic.chars().find(|c| matches!(c, '+' | '#' | '\0')) {
        return Err(TopicError::InvalidChar {
            topic: topic.to_string(),
            ch,
        });
    }
    Ok(())
}

/// Validate a topic filter used for subscribing
pub fn validate_topic_filter(filter: &str) -> Result<(), TopicError> {
    if filter.is_empty() {
        return Err(TopicError::Empty);
    }

    let levels: Vec<&str> = filter.split('/').collect();
    for (index, level) in levels.iter().enumerate() {
        let is_last = index == levels.len() - 1;
        if level.contains('#') && (*level != "#" || !is_last) {
            return Err(TopicError::MisplacedWildcard(filter.to_string()));
        }
        if level.contains('+') && *level != "+" {
            return Err(TopicError::MisplacedWildcard(filter.to_string()));
        }
    }

    Ok(())
}

#[derive(Debug, Error, PartialEq)]
pub enum TopicError {
    #[error("Topic cannot be empty")]
    Empty,
    #[error("Topic '{topic}' contains invalid character: '{ch}'")]
    InvalidChar { topic: String, ch: char },
    #[error("Topic filter '{0}' has a wildcard outside a whole level")]
    MisplacedWildcard(String),
}
