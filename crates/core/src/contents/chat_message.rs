//! Role-tagged chat messages
//!
//! A [`ChatMessage`] is the unit every agent, orchestration and reducer works
//! with. Function calls and their results travel as [`FunctionContent`] items
//! next to the text content so that reducers can keep call/result pairs
//! together.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Metadata key marking a message produced by a summarization reducer
pub const SUMMARY_METADATA_KEY: &str = "is_summary";

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorRole {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for AuthorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthorRole::System => write!(f, "system"),
            AuthorRole::User => write!(f, "user"),
            AuthorRole::Assistant => write!(f, "assistant"),
            AuthorRole::Tool => write!(f, "tool"),
        }
    }
}

/// Function call or function result carried by a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FunctionContent {
    Call {
        id: String,
        name: String,
        arguments: Value,
    },
    Result {
        id: String,
        name: String,
        result: Value,
    },
}

impl FunctionContent {
    pub fn call(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        FunctionContent::Call {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    pub fn result(id: impl Into<String>, name: impl Into<String>, result: Value) -> Self {
        FunctionContent::Result {
            id: id.into(),
            name: name.into(),
            result,
        }
    }

    /// Identifier shared by a call and its result
    pub fn id(&self) -> &str {
        match self {
            FunctionContent::Call { id, .. } | FunctionContent::Result { id, .. } => id,
        }
    }
}

/// One ordered, role-tagged unit of a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: AuthorRole,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<FunctionContent>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl ChatMessage {
    pub fn new(role: AuthorRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            items: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(AuthorRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(AuthorRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(AuthorRole::Assistant, content)
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(AuthorRole::Tool, content)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_item(mut self, item: FunctionContent) -> Self {
        self.items.push(item);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// True when the message carries a function call or a function result
    pub fn has_function_content(&self) -> bool {
        !self.items.is_empty()
    }

    /// True when the message was produced by a summarization reducer
    pub fn is_summary(&self) -> bool {
        self.metadata_flag(SUMMARY_METADATA_KEY)
    }

    /// String metadata value, if present
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Boolean metadata value; absent or non-boolean values read as false
    pub fn metadata_flag(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

impl fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({}): {}", self.role, name, self.content),
            None => write!(f, "{}: {}", self.role, self.content),
        }
    }
}
