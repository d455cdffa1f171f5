//! Truncating reducer

use super::utils::{locate_safe_reduction_index, locate_summarization_boundary};
use super::{validate_counts, ChatHistoryReducer, ReducerError};
use crate::contents::ChatMessage;
use async_trait::async_trait;
use tracing::debug;

/// Drops the oldest messages once the history exceeds
/// `target_count + threshold_count`.
///
/// Leading summary messages left by a summarizing reducer are never dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChatHistoryTruncationReducer {
    target_count: usize,
    threshold_count: usize,
}

impl ChatHistoryTruncationReducer {
    pub fn new(target_count: usize) -> Result<Self, ReducerError> {
        validate_counts(target_count)?;
        Ok(Self {
            target_count,
            threshold_count: 0,
        })
    }

    pub fn with_threshold_count(mut self, threshold_count: usize) -> Self {
        self.threshold_count = threshold_count;
        self
    }
}

#[async_trait]
impl ChatHistoryReducer for ChatHistoryTruncationReducer {
    async fn reduce(&self, history: &[ChatMessage]) -> Result<Option<Vec<ChatMessage>>, ReducerError> {
        if history.len() <= self.target_count + self.threshold_count {
            return Ok(None);
        }

        let mut summaries = locate_summarization_boundary(history);
        if summaries == history.len() {
            summaries = 0;
        }

        let Some(truncation_index) = locate_safe_reduction_index(
            history,
            self.target_count,
            self.threshold_count,
            summaries,
        ) else {
            return Ok(None);
        };

        debug!(
            before = history.len(),
            dropped = truncation_index - summaries,
            "Truncating chat history"
        );

        let mut reduced = history[..summaries].to_vec();
        reduced.extend_from_slice(&history[truncation_index..]);
        Ok(Some(reduced))
    }
}
