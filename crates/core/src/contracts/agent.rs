//! Agent capability contract
//!
//! Orchestrations treat an agent as an opaque, named unit of work. Anything
//! that can answer a list of messages (an LLM-backed assistant, a scripted
//! test double, a nested workflow) implements [`Agent`].

use crate::contents::{ChatMessage, StreamingChatMessage};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque conversation continuation handle returned by an agent
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentThread {
    id: String,
}

impl AgentThread {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for AgentThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Single-shot agent answer
#[derive(Debug, Clone, PartialEq)]
pub struct AgentResponse {
    pub message: ChatMessage,
    pub thread: Option<AgentThread>,
}

impl AgentResponse {
    pub fn new(message: ChatMessage) -> Self {
        Self {
            message,
            thread: None,
        }
    }

    pub fn with_thread(mut self, thread: AgentThread) -> Self {
        self.thread = Some(thread);
        self
    }
}

/// One partial answer from a streaming agent
#[derive(Debug, Clone, PartialEq)]
pub struct AgentStreamChunk {
    pub message: StreamingChatMessage,
    pub thread: Option<AgentThread>,
}

/// Stream of partial answers
pub type AgentResponseStream = BoxStream<'static, anyhow::Result<AgentStreamChunk>>;

/// Capability consumed by every orchestration pattern
#[async_trait]
pub trait Agent: Send + Sync {
    /// Agent name, unique within one orchestration
    fn name(&self) -> &str;

    /// Human readable description; required by manager-driven patterns
    fn description(&self) -> Option<&str> {
        None
    }

    /// Answer `messages`, optionally continuing `thread`
    async fn get_response(
        &self,
        messages: Vec<ChatMessage>,
        thread: Option<AgentThread>,
    ) -> anyhow::Result<AgentResponse>;

    /// Stream an answer chunk by chunk.
    ///
    /// The default implementation yields the single-shot answer as one chunk.
    async fn invoke_stream(
        &self,
        messages: Vec<ChatMessage>,
        thread: Option<AgentThread>,
    ) -> anyhow::Result<AgentResponseStream> {
        let response = self.get_response(messages, thread).await?;
        let message = response.message;
        let chunk = AgentStreamChunk {
            message: StreamingChatMessage {
                role: Some(message.role),
                name: message.name,
                content: message.content,
                metadata: message.metadata,
                ..Default::default()
            },
            thread: response.thread,
        };
        Ok(stream::iter(vec![Ok(chunk)]).boxed())
    }
}
