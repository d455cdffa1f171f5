//! Chat history reducers
//!
//! Reducers compact a growing conversation so that it fits a model's context:
//!
//! - [`ChatHistorySummarizationReducer`] replaces old turns with a synthetic
//!   summary message produced by a chat completion service
//! - [`ChatHistoryTruncationReducer`] drops old turns outright
//!
//! Both only act once the history exceeds `target_count + threshold_count`
//! messages, and both cut at a safe index that never separates a function call
//! from its result.

pub mod summarization;
pub mod truncation;
pub mod utils;

pub use summarization::{
    ChatHistorySummarizationReducer, ReducerConfig, DEFAULT_SUMMARIZATION_PROMPT,
};
pub use truncation::ChatHistoryTruncationReducer;

use crate::contents::ChatMessage;
use async_trait::async_trait;

/// Reducer errors
#[derive(Debug, thiserror::Error)]
pub enum ReducerError {
    #[error("Chat history summarization failed: {0}")]
    SummarizationFailed(#[source] anyhow::Error),

    #[error("Invalid reducer configuration: {0}")]
    InvalidConfiguration(String),
}

/// Strategy that shortens a conversation
#[async_trait]
pub trait ChatHistoryReducer: Send + Sync {
    /// Return the reduced history, or `None` when no reduction happened.
    ///
    /// The input is never modified; callers replace their history wholesale
    /// with the returned list.
    async fn reduce(&self, history: &[ChatMessage]) -> Result<Option<Vec<ChatMessage>>, ReducerError>;
}

fn validate_counts(target_count: usize) -> Result<(), ReducerError> {
    if target_count == 0 {
        return Err(ReducerError::InvalidConfiguration(
            "target_count must be greater than zero".to_string(),
        ));
    }
    Ok(())
}
