use crate::ids::{AgentId, AgentType};

/// Runtime errors
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Actor {agent_id} cannot handle message of type {message_type}")]
    CantHandle {
        agent_id: AgentId,
        message_type: String,
    },

    #[error("Message undeliverable: {0}")]
    Undeliverable(String),

    #[error("Agent type {0} is already registered")]
    AlreadyRegistered(AgentType),

    #[error("Agent type {0} is not registered")]
    UnknownAgentType(AgentType),

    #[error("Subscription {0} not found")]
    SubscriptionNotFound(String),

    #[error("Subscription {0} already exists")]
    DuplicateSubscription(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Runtime is not running")]
    NotRunning,

    #[error("Actor {agent_id} failed to handle message: {message}")]
    HandlerFailed { agent_id: AgentId, message: String },

    #[error("Actor state error: {0}")]
    State(#[from] serde_json::Error),

    #[error("Mailbox of actor {0} is closed")]
    MailboxClosed(AgentId),

    #[error("Actor factory for {agent_type} failed: {message}")]
    FactoryFailed {
        agent_type: AgentType,
        message: String,
    },
}

impl RuntimeError {
    /// Wrap a failure from agent code running inside an actor
    pub fn handler_failed(agent_id: &AgentId, error: impl std::fmt::Display) -> Self {
        RuntimeError::HandlerFailed {
            agent_id: agent_id.clone(),
            message: error.to_string(),
        }
    }

    /// The actor dropped the reply channel, e.g. its handler panicked
    pub(crate) fn no_reply(agent_id: &AgentId) -> Self {
        Self::handler_failed(agent_id, "actor stopped before replying")
    }
}
