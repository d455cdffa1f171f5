//! Summarizing reducer

use super::utils::{extract_range, locate_safe_reduction_index, locate_summarization_boundary};
use super::{validate_counts, ChatHistoryReducer, ReducerError};
use crate::contents::{AuthorRole, ChatHistory, ChatMessage, SUMMARY_METADATA_KEY};
use crate::contracts::{ChatCompletion, PromptExecutionSettings};
use async_trait::async_trait;
use common::OperationTimer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Instruction appended after the messages being summarized
pub const DEFAULT_SUMMARIZATION_PROMPT: &str = "\
Provide a concise and complete summarization of the entire dialog that does not exceed 5 sentences.

This summary must always:
- Consider both user and assistant interactions
- Maintain continuity for the purpose of further dialog
- Include details from any existing summary
- Focus on the most significant aspects of the dialog

This summary must never:
- Critique, correct, interpret, presume, or assume
- Identify faults, mistakes, misunderstanding, or correctness
- Analyze what has not occurred
- Exclude details from any existing summary
";

/// Serializable reducer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReducerConfig {
    pub target_count: usize,
    pub threshold_count: usize,
    pub use_single_summary: bool,
    pub fail_on_error: bool,
    pub include_function_content_in_summary: bool,
    pub summarization_instructions: String,
    pub service_id: Option<String>,
}

impl Default for ReducerConfig {
    fn default() -> Self {
        Self {
            target_count: 20,
            threshold_count: 5,
            use_single_summary: true,
            fail_on_error: true,
            include_function_content_in_summary: false,
            summarization_instructions: DEFAULT_SUMMARIZATION_PROMPT.to_string(),
            service_id: None,
        }
    }
}

/// Compacts old turns into a synthetic summary message.
///
/// Once the history grows past `target_count + threshold_count` messages, the
/// range before a safe cut point is sent to the completion service together
/// with the summarization instructions. The first returned message is tagged
/// with `is_summary = true` and spliced in front of the retained tail.
///
/// With `use_single_summary` the whole prefix, earlier summaries included, is
/// re-summarized into one message. Otherwise earlier summaries are kept
/// verbatim and only the newly eligible range is summarized.
///
/// Two reducers compare equal when their counts, summary mode and
/// instructions match; the backing service is not part of the identity.
#[derive(Clone)]
pub struct ChatHistorySummarizationReducer {
    service: Arc<dyn ChatCompletion>,
    target_count: usize,
    threshold_count: usize,
    summarization_instructions: String,
    use_single_summary: bool,
    fail_on_error: bool,
    include_function_content_in_summary: bool,
    execution_settings: Option<PromptExecutionSettings>,
}

impl ChatHistorySummarizationReducer {
    pub fn new(service: Arc<dyn ChatCompletion>, target_count: usize) -> Result<Self, ReducerError> {
        validate_counts(target_count)?;
        Ok(Self {
            service,
            target_count,
            threshold_count: 0,
            summarization_instructions: DEFAULT_SUMMARIZATION_PROMPT.to_string(),
            use_single_summary: true,
            fail_on_error: true,
            include_function_content_in_summary: false,
            execution_settings: None,
        })
    }

    pub fn from_config(
        service: Arc<dyn ChatCompletion>,
        config: ReducerConfig,
    ) -> Result<Self, ReducerError> {
        validate_counts(config.target_count)?;
        Ok(Self {
            service,
            target_count: config.target_count,
            threshold_count: config.threshold_count,
            summarization_instructions: config.summarization_instructions,
            use_single_summary: config.use_single_summary,
            fail_on_error: config.fail_on_error,
            include_function_content_in_summary: config.include_function_content_in_summary,
            execution_settings: config.service_id.map(PromptExecutionSettings::for_service),
        })
    }

    pub fn with_threshold_count(mut self, threshold_count: usize) -> Self {
        self.threshold_count = threshold_count;
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.summarization_instructions = instructions.into();
        self
    }

    pub fn with_single_summary(mut self, use_single_summary: bool) -> Self {
        self.use_single_summary = use_single_summary;
        self
    }

    pub fn with_fail_on_error(mut self, fail_on_error: bool) -> Self {
        self.fail_on_error = fail_on_error;
        self
    }

    pub fn with_function_content(mut self, include: bool) -> Self {
        self.include_function_content_in_summary = include;
        self
    }

    pub fn with_execution_settings(mut self, settings: PromptExecutionSettings) -> Self {
        self.execution_settings = Some(settings);
        self
    }

    pub fn target_count(&self) -> usize {
        self.target_count
    }

    pub fn threshold_count(&self) -> usize {
        self.threshold_count
    }

    /// Whether a history of `len` messages is long enough to be reduced
    pub fn exceeds_threshold(&self, len: usize) -> bool {
        len > self.target_count + self.threshold_count
    }

    async fn summarize(&self, messages: Vec<ChatMessage>) -> anyhow::Result<Option<ChatMessage>> {
        let mut chat_history = ChatHistory::from_messages(messages);
        chat_history.add_message(ChatMessage::new(
            AuthorRole::System,
            self.summarization_instructions.clone(),
        ));

        let settings = self.execution_settings.clone().unwrap_or_default();
        let mut timer = OperationTimer::new("chat_history_summarization");
        timer.add_field("messages", chat_history.len());
        let result = self
            .service
            .get_chat_message_content(&chat_history, &settings)
            .await;
        timer.finish_with_result(result.as_ref().map(|_| ()).map_err(|e| e.to_string()));
        result
    }
}

#[async_trait]
impl ChatHistoryReducer for ChatHistorySummarizationReducer {
    async fn reduce(&self, history: &[ChatMessage]) -> Result<Option<Vec<ChatMessage>>, ReducerError> {
        if !self.exceeds_threshold(history.len()) {
            return Ok(None);
        }

        info!(
            messages = history.len(),
            target_count = self.target_count,
            threshold_count = self.threshold_count,
            "Performing chat history summarization check"
        );

        let mut insertion_point = locate_summarization_boundary(history);
        if insertion_point == history.len() {
            warn!("All messages are summaries, resetting summarization boundary to 0");
            insertion_point = 0;
        }

        let Some(truncation_index) = locate_safe_reduction_index(
            history,
            self.target_count,
            self.threshold_count,
            insertion_point,
        ) else {
            debug!("No safe truncation index found");
            return Ok(None);
        };

        let keep_existing = if insertion_point > 0 && !self.use_single_summary {
            insertion_point
        } else {
            0
        };
        // replacing fewer than two messages with a summary would not shorten the history
        let reduced_len = keep_existing + 1 + (history.len() - truncation_index);
        if reduced_len >= history.len() {
            debug!(truncation_index, reduced_len, "Summary would not shorten history");
            return Ok(None);
        }

        let start = if self.use_single_summary { 0 } else { insertion_point };
        let to_summarize = extract_range(
            history,
            start,
            truncation_index,
            !self.include_function_content_in_summary,
            self.include_function_content_in_summary,
        );
        if to_summarize.is_empty() {
            debug!(start, truncation_index, "No messages to summarize");
            return Ok(None);
        }

        let mut summary = match self.summarize(to_summarize).await {
            Ok(Some(summary)) => summary,
            Ok(None) => {
                warn!("Completion service returned no summary");
                return Ok(None);
            }
            Err(e) => {
                warn!(error = %e, "Summarization failed, continuing without summary");
                if self.fail_on_error {
                    return Err(ReducerError::SummarizationFailed(e));
                }
                return Ok(None);
            }
        };
        summary
            .metadata
            .insert(SUMMARY_METADATA_KEY.to_string(), Value::Bool(true));

        let mut reduced = Vec::with_capacity(reduced_len);
        reduced.extend_from_slice(&history[..keep_existing]);
        reduced.push(summary);
        reduced.extend_from_slice(&history[truncation_index..]);

        info!(
            before = history.len(),
            after = reduced.len(),
            "Chat history summarization completed"
        );
        Ok(Some(reduced))
    }
}

impl PartialEq for ChatHistorySummarizationReducer {
    fn eq(&self, other: &Self) -> bool {
        self.threshold_count == other.threshold_count
            && self.target_count == other.target_count
            && self.use_single_summary == other.use_single_summary
            && self.summarization_instructions == other.summarization_instructions
    }
}

impl Eq for ChatHistorySummarizationReducer {}

impl Hash for ChatHistorySummarizationReducer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.threshold_count.hash(state);
        self.target_count.hash(state);
        self.use_single_summary.hash(state);
        self.summarization_instructions.hash(state);
    }
}

impl fmt::Debug for ChatHistorySummarizationReducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatHistorySummarizationReducer")
            .field("target_count", &self.target_count)
            .field("threshold_count", &self.threshold_count)
            .field("use_single_summary", &self.use_single_summary)
            .field("fail_on_error", &self.fail_on_error)
            .field(
                "include_function_content_in_summary",
                &self.include_function_content_in_summary,
            )
            .finish_non_exhaustive()
    }
}
