//! Agent doubles shared by the orchestration integration tests
#![allow(dead_code)]

use agent_runtime::CoreRuntime;
use anyhow::anyhow;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use kernel_core::{
    Agent, AgentResponse, AgentResponseStream, AgentStreamChunk, AgentThread, ChatMessage,
    StreamingChatMessage,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub const WAIT: Duration = Duration::from_secs(5);

pub type Seen = Arc<Mutex<Vec<Vec<ChatMessage>>>>;

/// Route orchestration logs to the test harness; `RUST_LOG` selects the level
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn started_runtime() -> CoreRuntime {
    init_test_logging();
    let runtime = CoreRuntime::default();
    runtime.start();
    runtime
}

pub fn as_agents<const N: usize>(agents: [Arc<dyn Agent>; N]) -> Vec<Arc<dyn Agent>> {
    agents.into_iter().collect()
}

/// Appends `|name` to the content of the last message it receives
pub struct ConcatAgent {
    name: String,
    pub seen: Seen,
}

impl ConcatAgent {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            seen: Arc::default(),
        })
    }

    pub fn inputs(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl Agent for ConcatAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        Some("Appends its own name to the conversation")
    }

    async fn get_response(
        &self,
        messages: Vec<ChatMessage>,
        _thread: Option<AgentThread>,
    ) -> anyhow::Result<AgentResponse> {
        let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        self.seen.lock().push(messages);
        Ok(AgentResponse::new(ChatMessage::assistant(format!("{last}|{}", self.name))))
    }
}

/// Answers every request with the same text
pub struct FixedAgent {
    name: String,
    reply: String,
    pub seen: Seen,
}

impl FixedAgent {
    pub fn new(name: &str, reply: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            reply: reply.to_string(),
            seen: Arc::default(),
        })
    }
}

#[async_trait]
impl Agent for FixedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        Some("Always gives the same answer")
    }

    async fn get_response(
        &self,
        messages: Vec<ChatMessage>,
        _thread: Option<AgentThread>,
    ) -> anyhow::Result<AgentResponse> {
        self.seen.lock().push(messages);
        Ok(AgentResponse::new(ChatMessage::assistant(self.reply.clone())))
    }
}

/// Always fails
pub struct FailingAgent {
    name: String,
}

impl FailingAgent {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
        })
    }
}

#[async_trait]
impl Agent for FailingAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_response(
        &self,
        _messages: Vec<ChatMessage>,
        _thread: Option<AgentThread>,
    ) -> anyhow::Result<AgentResponse> {
        Err(anyhow!("boom from {}", self.name))
    }
}

/// Holds its answer until the gate is opened
pub struct GatedAgent {
    name: String,
    reply: String,
    pub gate: Arc<Notify>,
    pub calls: AtomicUsize,
}

impl GatedAgent {
    pub fn new(name: &str, reply: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            reply: reply.to_string(),
            gate: Arc::new(Notify::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn open(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl Agent for GatedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_response(
        &self,
        _messages: Vec<ChatMessage>,
        _thread: Option<AgentThread>,
    ) -> anyhow::Result<AgentResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate.notified().await;
        Ok(AgentResponse::new(ChatMessage::assistant(self.reply.clone())))
    }
}

/// Replays queued responses, then answers "done"
pub struct ScriptedAgent {
    name: String,
    script: Mutex<VecDeque<ChatMessage>>,
    pub seen: Seen,
}

impl ScriptedAgent {
    pub fn new(name: &str, script: Vec<ChatMessage>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script: Mutex::new(script.into()),
            seen: Arc::default(),
        })
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn last_input(&self) -> Vec<ChatMessage> {
        self.seen.lock().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        Some("Follows a script")
    }

    async fn get_response(
        &self,
        messages: Vec<ChatMessage>,
        _thread: Option<AgentThread>,
    ) -> anyhow::Result<AgentResponse> {
        self.seen.lock().push(messages);
        let reply = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| ChatMessage::assistant("done"));
        Ok(AgentResponse::new(reply))
    }
}

/// Streams a fixed answer in chunks and hands out a thread
pub struct StreamingAgent {
    name: String,
    chunks: Vec<String>,
    pub seen: Seen,
}

impl StreamingAgent {
    pub fn new(name: &str, chunks: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            seen: Arc::default(),
        })
    }
}

#[async_trait]
impl Agent for StreamingAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_response(
        &self,
        messages: Vec<ChatMessage>,
        _thread: Option<AgentThread>,
    ) -> anyhow::Result<AgentResponse> {
        self.seen.lock().push(messages);
        Ok(AgentResponse::new(ChatMessage::assistant(self.chunks.concat())))
    }

    async fn invoke_stream(
        &self,
        messages: Vec<ChatMessage>,
        _thread: Option<AgentThread>,
    ) -> anyhow::Result<AgentResponseStream> {
        self.seen.lock().push(messages);
        let thread = AgentThread::new(format!("{}-thread", self.name));
        let chunks: Vec<anyhow::Result<AgentStreamChunk>> = self
            .chunks
            .iter()
            .map(|text| {
                Ok(AgentStreamChunk {
                    message: StreamingChatMessage::new(None, text.clone()),
                    thread: Some(thread.clone()),
                })
            })
            .collect();
        Ok(stream::iter(chunks).boxed())
    }
}
