//! Streaming chunks and the fold that merges them into one message

use super::chat_message::{AuthorRole, ChatMessage};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Partial message produced while an agent streams its answer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamingChatMessage {
    pub role: Option<AuthorRole>,
    pub name: Option<String>,
    pub content: String,
    pub ai_model_id: Option<String>,
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl StreamingChatMessage {
    pub fn new(role: Option<AuthorRole>, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.ai_model_id = Some(model.into());
        self
    }

    pub fn with_finish_reason(mut self, reason: impl Into<String>) -> Self {
        self.finish_reason = Some(reason.into());
        self
    }

    /// Fold one chunk into an accumulated message.
    ///
    /// Text is concatenated; role, name and model id keep the first non-empty
    /// value; finish reason keeps the last non-empty value; metadata keys from
    /// later chunks overwrite earlier ones. Every rule is associative, so chunks
    /// may be pre-merged in any grouping.
    pub fn merge(mut self, chunk: StreamingChatMessage) -> Self {
        self.content.push_str(&chunk.content);
        self.role = self.role.or(chunk.role);
        self.name = self.name.or(chunk.name);
        self.ai_model_id = self.ai_model_id.or(chunk.ai_model_id);
        if chunk.finish_reason.is_some() {
            self.finish_reason = chunk.finish_reason;
        }
        self.metadata.extend(chunk.metadata);
        self
    }

    /// Merge a sequence of chunks; `None` when the sequence is empty
    pub fn merge_all<I>(chunks: I) -> Option<Self>
    where
        I: IntoIterator<Item = StreamingChatMessage>,
    {
        chunks.into_iter().reduce(Self::merge)
    }

    /// Convert into a complete message; a missing role reads as assistant
    pub fn into_message(self) -> ChatMessage {
        let mut message = ChatMessage::new(self.role.unwrap_or(AuthorRole::Assistant), self.content);
        message.name = self.name;
        message.metadata = self.metadata;
        if let Some(model) = self.ai_model_id {
            message.metadata.insert("ai_model_id".to_string(), Value::String(model));
        }
        if let Some(reason) = self.finish_reason {
            message.metadata.insert("finish_reason".to_string(), Value::String(reason));
        }
        message
    }
}
