//! Chat contents shared by agents, orchestrations and reducers

pub mod chat_history;
pub mod chat_message;
pub mod streaming;

pub use chat_history::ChatHistory;
pub use chat_message::{AuthorRole, ChatMessage, FunctionContent, SUMMARY_METADATA_KEY};
pub use streaming::StreamingChatMessage;
