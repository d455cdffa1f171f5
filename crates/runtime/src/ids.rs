//! Actor and topic addressing

use serde::{Deserialize, Serialize};
use std::fmt;

/// Registered actor type name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentType(String);

impl AgentType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for AgentType {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Address of one actor instance: `(type, key)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId {
    agent_type: AgentType,
    key: String,
}

impl AgentId {
    pub const DEFAULT_KEY: &'static str = "default";

    pub fn new(agent_type: impl Into<AgentType>, key: impl Into<String>) -> Self {
        Self {
            agent_type: agent_type.into(),
            key: key.into(),
        }
    }

    pub fn agent_type(&self) -> &AgentType {
        &self.agent_type
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.agent_type, self.key)
    }
}

/// Broadcast address: `(type, source)`.
///
/// Subscriptions match on `topic_type`; `source` becomes the key of the
/// receiving actor, so one topic type can fan out to independent actor
/// instances per source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicId {
    pub topic_type: String,
    pub source: String,
}

impl TopicId {
    pub fn new(topic_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            topic_type: topic_type.into(),
            source: source.into(),
        }
    }

    /// Topic with the `"default"` source
    pub fn with_default_source(topic_type: impl Into<String>) -> Self {
        Self::new(topic_type, AgentId::DEFAULT_KEY)
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic_type, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let id = AgentId::new("writer_topic", "default");
        assert_eq!(id.to_string(), "writer_topic/default");
        assert_eq!(id.agent_type().as_str(), "writer_topic");
        assert_eq!(TopicId::with_default_source("t").to_string(), "t/default");
    }

    #[test]
    fn test_agent_id_serde() {
        let id = AgentId::new("a", "k");
        let json = serde_json::to_value(&id).unwrap();
        assert_eq!(json, serde_json::json!({"agent_type": "a", "key": "k"}));
        let back: AgentId = serde_json::from_value(json).unwrap();
        assert_eq!(back, id);
    }
}
