//! Topic to actor-type routing rules

use crate::ids::{AgentId, AgentType, TopicId};
use std::fmt;

/// Routing rule consulted by `publish_message`
pub trait Subscription: Send + Sync + fmt::Debug {
    /// Unique id used by `remove_subscription`
    fn id(&self) -> &str;

    fn is_match(&self, topic_id: &TopicId) -> bool;

    /// Recipient for a matching topic
    fn map_to_agent(&self, topic_id: &TopicId) -> AgentId;

    /// Actor type this rule delivers to
    fn agent_type(&self) -> &AgentType;
}

/// Delivers topics whose type equals `topic_type` to `AgentId(agent_type, source)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSubscription {
    id: String,
    topic_type: String,
    agent_type: AgentType,
}

impl TypeSubscription {
    pub fn new(topic_type: impl Into<String>, agent_type: impl Into<AgentType>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            topic_type: topic_type.into(),
            agent_type: agent_type.into(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn topic_type(&self) -> &str {
        &self.topic_type
    }
}

impl Subscription for TypeSubscription {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_match(&self, topic_id: &TopicId) -> bool {
        topic_id.topic_type == self.topic_type
    }

    fn map_to_agent(&self, topic_id: &TopicId) -> AgentId {
        AgentId::new(self.agent_type.clone(), topic_id.source.clone())
    }

    fn agent_type(&self) -> &AgentType {
        &self.agent_type
    }
}

/// Like [`TypeSubscription`] but matches every topic type starting with a prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypePrefixSubscription {
    id: String,
    topic_type_prefix: String,
    agent_type: AgentType,
}

impl TypePrefixSubscription {
    pub fn new(topic_type_prefix: impl Into<String>, agent_type: impl Into<AgentType>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            topic_type_prefix: topic_type_prefix.into(),
            agent_type: agent_type.into(),
        }
    }
}

impl Subscription for TypePrefixSubscription {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_match(&self, topic_id: &TopicId) -> bool {
        topic_id.topic_type.starts_with(&self.topic_type_prefix)
    }

    fn map_to_agent(&self, topic_id: &TopicId) -> AgentId {
        AgentId::new(self.agent_type.clone(), topic_id.source.clone())
    }

    fn agent_type(&self) -> &AgentType {
        &self.agent_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_subscription_routes_by_source() {
        let sub = TypeSubscription::new("chat", "writer");
        let topic = TopicId::new("chat", "session-1");

        assert!(sub.is_match(&topic));
        assert!(!sub.is_match(&TopicId::new("chat2", "session-1")));
        assert_eq!(sub.map_to_agent(&topic), AgentId::new("writer", "session-1"));
    }

    #[test]
    fn test_prefix_subscription() {
        let sub = TypePrefixSubscription::new("chat.", "logger");
        assert!(sub.is_match(&TopicId::new("chat.a", "x")));
        assert!(!sub.is_match(&TopicId::new("other", "x")));
        assert_eq!(sub.agent_type().as_str(), "logger");
    }

    #[test]
    fn test_ids_unique() {
        let a = TypeSubscription::new("t", "a");
        let b = TypeSubscription::new("t", "a");
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().with_id("fixed").id(), "fixed");
    }
}
