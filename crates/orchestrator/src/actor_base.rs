//! State and invocation logic shared by every pattern's agent actor

use crate::base::{handler_error, AgentCallbacks, ResultReporter};
use agent_runtime::{AgentId, Payload, RuntimeError, RuntimeHandle, TopicId};
use common::OperationTimer;
use futures::StreamExt;
use kernel_core::{Agent, AgentThread, ChatHistory, ChatMessage, StreamingChatMessage};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Checkpoint of an agent actor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AgentActorState {
    history: ChatHistory,
    thread: Option<AgentThread>,
}

/// One wrapped [`Agent`] plus its conversation state.
///
/// `history` holds the messages the agent has not seen yet. Once the agent
/// returns a thread handle the thread owns the conversation and only new
/// messages are sent; an agent without a thread always receives the full
/// history.
pub struct AgentActorBase {
    pub agent: Arc<dyn Agent>,
    pub thread: Option<AgentThread>,
    pub history: ChatHistory,
    pub id: AgentId,
    pub runtime: RuntimeHandle,
    pub callbacks: AgentCallbacks,
    pub internal_topic_type: String,
}

impl AgentActorBase {
    pub fn new(
        agent: Arc<dyn Agent>,
        id: AgentId,
        runtime: RuntimeHandle,
        callbacks: AgentCallbacks,
        internal_topic_type: impl Into<String>,
    ) -> Self {
        Self {
            agent,
            thread: None,
            history: ChatHistory::new(),
            id,
            runtime,
            callbacks,
            internal_topic_type: internal_topic_type.into(),
        }
    }

    pub fn name(&self) -> &str {
        self.agent.name()
    }

    pub fn description(&self) -> String {
        self.agent
            .description()
            .map(str::to_string)
            .unwrap_or_else(|| format!("Orchestration member {}", self.agent.name()))
    }

    /// Record a message produced elsewhere in the conversation
    pub fn observe(&mut self, message: ChatMessage) {
        self.history.add_message(message);
    }

    /// Forget the conversation, including the agent thread
    pub fn reset(&mut self) {
        self.history.clear();
        self.thread = None;
    }

    /// Invoke the agent on the pending history plus `additional`.
    ///
    /// Streams when a streaming callback is configured. Agent and callback
    /// failures are reported as [`RuntimeError::HandlerFailed`].
    pub async fn invoke(&mut self, additional: Vec<ChatMessage>) -> Result<ChatMessage, RuntimeError> {
        self.history.extend(additional);
        let messages = self.history.messages().to_vec();

        let mut timer = OperationTimer::new("agent_invocation");
        timer.add_field("agent", self.agent.name());
        timer.add_field("messages", messages.len());

        let outcome = if self.callbacks.streaming.is_some() {
            self.invoke_streaming(messages).await
        } else {
            self.invoke_single(messages).await
        };
        timer.finish_with_result(outcome.as_ref().map(|_| ()).map_err(|e| e.to_string()));

        let (mut message, thread) = outcome.map_err(|e| handler_error(&self.id, e))?;
        if message.name.is_none() {
            message.name = Some(self.agent.name().to_string());
        }

        self.callbacks
            .on_response(&message)
            .await
            .map_err(|e| handler_error(&self.id, e))?;

        match thread {
            Some(thread) => {
                self.thread = Some(thread);
                self.history.clear();
            }
            None if self.thread.is_some() => self.history.clear(),
            None => self.history.add_message(message.clone()),
        }

        debug!(actor_id = %self.id, chars = message.content.len(), "Agent responded");
        Ok(message)
    }

    async fn invoke_single(
        &self,
        messages: Vec<ChatMessage>,
    ) -> anyhow::Result<(ChatMessage, Option<AgentThread>)> {
        let response = self.agent.get_response(messages, self.thread.clone()).await?;
        Ok((response.message, response.thread))
    }

    /// Report chunks with one chunk of lookahead so the last one carries
    /// `is_final = true`, and fold them into the complete message
    async fn invoke_streaming(
        &self,
        messages: Vec<ChatMessage>,
    ) -> anyhow::Result<(ChatMessage, Option<AgentThread>)> {
        let mut stream = self.agent.invoke_stream(messages, self.thread.clone()).await?;

        let mut merged: Option<StreamingChatMessage> = None;
        let mut thread = None;
        let mut pending = None;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if let Some(previous) = pending.replace(chunk) {
                self.callbacks.on_chunk(&previous.message, false).await?;
                thread = previous.thread.or(thread);
                merged = Some(match merged {
                    Some(acc) => acc.merge(previous.message),
                    None => previous.message,
                });
            }
        }

        let last = pending
            .ok_or_else(|| anyhow::anyhow!("agent '{}' produced an empty stream", self.agent.name()))?;
        self.callbacks.on_chunk(&last.message, true).await?;
        thread = last.thread.or(thread);
        let merged = match merged {
            Some(acc) => acc.merge(last.message),
            None => last.message,
        };

        Ok((merged.into_message(), thread))
    }

    pub fn save_state(&self) -> Result<Value, RuntimeError> {
        Ok(serde_json::to_value(AgentActorState {
            history: self.history.clone(),
            thread: self.thread.clone(),
        })?)
    }

    pub fn load_state(&mut self, state: Value) -> Result<(), RuntimeError> {
        let state: AgentActorState = serde_json::from_value(state)?;
        self.history = state.history;
        self.thread = state.thread;
        Ok(())
    }

    /// Broadcast on this invocation's internal topic
    pub async fn publish(
        &self,
        message: Payload,
        cancellation_token: &CancellationToken,
    ) -> Result<(), RuntimeError> {
        publish_internal(
            &self.runtime,
            &self.id,
            &self.internal_topic_type,
            message,
            cancellation_token,
        )
        .await
    }

    /// Point-to-point delivery to another actor of this invocation
    pub async fn send(
        &self,
        message: Payload,
        recipient: &AgentId,
        cancellation_token: &CancellationToken,
    ) -> Result<(), RuntimeError> {
        self.runtime
            .send_message(message, recipient, Some(self.id.clone()), Some(cancellation_token.clone()))
            .await
            .map(|_| ())
    }
}

/// Broadcast `message` from `sender` on the internal topic of one invocation.
///
/// The topic source is the sender's key, so subscribers resolve to the actor
/// instances sharing that key.
pub async fn publish_internal(
    runtime: &RuntimeHandle,
    sender: &AgentId,
    internal_topic_type: &str,
    message: Payload,
    cancellation_token: &CancellationToken,
) -> Result<(), RuntimeError> {
    let topic = TopicId::new(internal_topic_type, sender.key());
    runtime
        .publish_message(message, topic, Some(sender.clone()), Some(cancellation_token.clone()))
        .await
}

/// Fail the invocation after an actor error; cancellation is not a failure
pub fn report_failure<T: Send + 'static>(
    reporter: &ResultReporter<T>,
    actor_id: &AgentId,
    error: &RuntimeError,
) {
    if matches!(error, RuntimeError::Cancelled) {
        return;
    }
    warn!(actor_id = %actor_id, error = %error, "Actor failure ends orchestration");
    reporter.fail(format!("{actor_id}: {error}"));
}
