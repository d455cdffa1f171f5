//! Ordered conversation history

use super::chat_message::{AuthorRole, ChatMessage};
use crate::history_reducer::{ChatHistoryReducer, ReducerError};
use serde::{Deserialize, Serialize};

/// Ordered list of chat messages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatHistory {
    messages: Vec<ChatMessage>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }

    pub fn add_message(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn add_user_message(&mut self, content: impl Into<String>) {
        self.add_message(ChatMessage::new(AuthorRole::User, content));
    }

    pub fn add_assistant_message(&mut self, content: impl Into<String>) {
        self.add_message(ChatMessage::new(AuthorRole::Assistant, content));
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = ChatMessage>) {
        self.messages.extend(messages);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn into_messages(self) -> Vec<ChatMessage> {
        self.messages
    }

    /// Run `reducer` over the history and replace it wholesale when it
    /// produced a reduction. Returns whether the history changed.
    pub async fn reduce_with(
        &mut self,
        reducer: &dyn ChatHistoryReducer,
    ) -> Result<bool, ReducerError> {
        match reducer.reduce(&self.messages).await? {
            Some(reduced) => {
                self.messages = reduced;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl From<Vec<ChatMessage>> for ChatHistory {
    fn from(messages: Vec<ChatMessage>) -> Self {
        Self::from_messages(messages)
    }
}

impl<'a> IntoIterator for &'a ChatHistory {
    type Item = &'a ChatMessage;
    type IntoIter = std::slice::Iter<'a, ChatMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}
