//! Chat completion capability contract

use crate::contents::{ChatHistory, ChatMessage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Provider-specific request settings; opaque apart from `service_id`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptExecutionSettings {
    pub service_id: Option<String>,
    #[serde(default)]
    pub extension_data: HashMap<String, Value>,
}

impl PromptExecutionSettings {
    pub fn for_service(service_id: impl Into<String>) -> Self {
        Self {
            service_id: Some(service_id.into()),
            extension_data: HashMap::new(),
        }
    }
}

/// Chat completion service contract
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Generate one or more candidate messages for `chat_history`
    async fn get_chat_message_contents(
        &self,
        chat_history: &ChatHistory,
        settings: &PromptExecutionSettings,
    ) -> anyhow::Result<Vec<ChatMessage>>;

    /// First candidate message, if any
    async fn get_chat_message_content(
        &self,
        chat_history: &ChatHistory,
        settings: &PromptExecutionSettings,
    ) -> anyhow::Result<Option<ChatMessage>> {
        let mut messages = self.get_chat_message_contents(chat_history, settings).await?;
        if messages.is_empty() {
            Ok(None)
        } else {
            Ok(Some(messages.swap_remove(0)))
        }
    }
}
