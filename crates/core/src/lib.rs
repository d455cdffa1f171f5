//! Core chat models and contracts for agent orchestration
//!
//! - [`contents`]: chat messages, streaming chunks and chat histories
//! - [`contracts`]: the agent and chat completion capabilities the
//!   orchestration layer is written against
//! - [`history_reducer`]: strategies that keep a conversation within a
//!   model's context window

pub mod contents;
pub mod contracts;
pub mod history_reducer;

pub use contents::*;
pub use contracts::*;
pub use history_reducer::{
    ChatHistoryReducer, ChatHistorySummarizationReducer, ChatHistoryTruncationReducer,
    ReducerConfig, ReducerError,
};
