//! Orchestration base
//!
//! An [`Orchestration`] couples a pattern (the actor topology) with the input
//! and output transforms and the caller's callbacks. Every call to
//! [`Orchestration::invoke`] registers a fresh set of actors under a new
//! internal topic type, so one runtime can host many invocations at once.

use crate::config::OrchestrationConfig;
use crate::error::OrchestrationError;
use crate::result::{OrchestrationResult, ResultSetter};
use agent_runtime::{AgentType, CoreRuntime, RuntimeError};
use async_trait::async_trait;
use futures::future::BoxFuture;
use kernel_core::{ChatMessage, StreamingChatMessage};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Invoked with every complete agent response
pub type AgentResponseCallback =
    Arc<dyn Fn(ChatMessage) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Invoked with every streamed chunk; the flag marks the last chunk of a response
pub type StreamingAgentResponseCallback =
    Arc<dyn Fn(StreamingChatMessage, bool) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Converts the caller's task into the initial messages
pub type InputTransform<TIn> = Arc<dyn Fn(TIn) -> anyhow::Result<Vec<ChatMessage>> + Send + Sync>;

/// Converts the pattern's output into the caller's result type
pub type OutputTransform<O, T> = Arc<dyn Fn(O) -> anyhow::Result<T> + Send + Sync>;

/// Caller-supplied observers of agent output.
///
/// An error returned by a callback fails the message handling of the actor
/// that produced the response.
#[derive(Clone, Default)]
pub struct AgentCallbacks {
    pub response: Option<AgentResponseCallback>,
    pub streaming: Option<StreamingAgentResponseCallback>,
}

impl std::fmt::Debug for AgentCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentCallbacks")
            .field("response", &self.response.is_some())
            .field("streaming", &self.streaming.is_some())
            .finish()
    }
}

impl AgentCallbacks {
    pub async fn on_response(&self, message: &ChatMessage) -> anyhow::Result<()> {
        match &self.response {
            Some(callback) => callback(message.clone()).await,
            None => Ok(()),
        }
    }

    pub async fn on_chunk(&self, chunk: &StreamingChatMessage, is_final: bool) -> anyhow::Result<()> {
        match &self.streaming {
            Some(callback) => callback(chunk.clone(), is_final).await,
            None => Ok(()),
        }
    }
}

/// Write side of the invocation result handed to pattern actors.
///
/// Applies the output transform before recording the value; a failing
/// transform fails the result.
pub struct ResultReporter<T> {
    report: Arc<dyn Fn(Result<T, String>) -> bool + Send + Sync>,
}

impl<T> Clone for ResultReporter<T> {
    fn clone(&self) -> Self {
        Self {
            report: Arc::clone(&self.report),
        }
    }
}

impl<T: Send + 'static> ResultReporter<T> {
    pub fn new<U>(setter: ResultSetter<U>, transform: OutputTransform<T, U>) -> Self
    where
        U: Send + Sync + 'static,
    {
        let report = move |outcome: Result<T, String>| match outcome {
            Ok(value) => match transform(value) {
                Ok(value) => setter.set_result(value),
                Err(e) => setter.set_failed(format!("output transform failed: {e:#}")),
            },
            Err(message) => setter.set_failed(message),
        };
        Self {
            report: Arc::new(report),
        }
    }

    /// Deliver the final value; returns `false` when an outcome already exists
    pub fn complete(&self, value: T) -> bool {
        let accepted = (self.report)(Ok(value));
        if !accepted {
            debug!("Discarding orchestration output, result already settled");
        }
        accepted
    }

    pub fn fail(&self, message: impl Into<String>) -> bool {
        (self.report)(Err(message.into()))
    }
}

/// Everything a pattern needs to wire and drive one invocation
pub struct PatternContext<T> {
    pub runtime: CoreRuntime,
    /// Unique per invocation; suffix of every actor type and the topic type of
    /// internal broadcasts
    pub internal_topic_type: String,
    pub reporter: ResultReporter<T>,
    pub callbacks: AgentCallbacks,
    pub cancellation_token: CancellationToken,
    pub config: OrchestrationConfig,
}

impl<T> Clone for PatternContext<T> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            internal_topic_type: self.internal_topic_type.clone(),
            reporter: self.reporter.clone(),
            callbacks: self.callbacks.clone(),
            cancellation_token: self.cancellation_token.clone(),
            config: self.config.clone(),
        }
    }
}

impl<T> PatternContext<T> {
    /// Actor type for a named participant of this invocation
    pub fn actor_type(&self, name: &str) -> AgentType {
        AgentType::new(format!("{}_{}", name, self.internal_topic_type))
    }
}

/// Actor topology of one orchestration pattern
#[async_trait]
pub trait OrchestrationPattern: Send + Sync + 'static {
    /// Value produced when the pattern completes
    type Output: Clone + Send + Sync + 'static;

    fn name(&self) -> &str;

    /// Register actors and subscriptions; fails before any message is sent
    async fn prepare(&self, ctx: &PatternContext<Self::Output>) -> Result<(), OrchestrationError>;

    /// Inject the initial messages
    async fn start(
        &self,
        messages: Vec<ChatMessage>,
        ctx: &PatternContext<Self::Output>,
    ) -> Result<(), OrchestrationError>;
}

/// A pattern plus transforms and callbacks, invocable against a runtime
pub struct Orchestration<P, TIn = String, TOut = <P as OrchestrationPattern>::Output>
where
    P: OrchestrationPattern,
{
    pattern: Arc<P>,
    input_transform: InputTransform<TIn>,
    output_transform: OutputTransform<P::Output, TOut>,
    callbacks: AgentCallbacks,
    config: OrchestrationConfig,
}

impl<P: OrchestrationPattern> Orchestration<P> {
    /// Orchestration taking a plain string task and returning the pattern's
    /// own output
    pub fn new(pattern: P) -> Self {
        Self {
            pattern: Arc::new(pattern),
            input_transform: Arc::new(|task: String| Ok::<_, anyhow::Error>(vec![ChatMessage::user(task)])),
            output_transform: Arc::new(|output| Ok::<_, anyhow::Error>(output)),
            callbacks: AgentCallbacks::default(),
            config: OrchestrationConfig::default(),
        }
    }
}

impl<P, TIn, TOut> Orchestration<P, TIn, TOut>
where
    P: OrchestrationPattern,
    TIn: Send + 'static,
    TOut: Clone + Send + Sync + 'static,
{
    pub fn pattern(&self) -> &P {
        &self.pattern
    }

    pub fn config(&self) -> &OrchestrationConfig {
        &self.config
    }

    pub fn with_config(mut self, config: OrchestrationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_input_transform<T, F>(self, transform: F) -> Orchestration<P, T, TOut>
    where
        F: Fn(T) -> anyhow::Result<Vec<ChatMessage>> + Send + Sync + 'static,
    {
        Orchestration {
            pattern: self.pattern,
            input_transform: Arc::new(transform),
            output_transform: self.output_transform,
            callbacks: self.callbacks,
            config: self.config,
        }
    }

    pub fn with_output_transform<T, F>(self, transform: F) -> Orchestration<P, TIn, T>
    where
        F: Fn(P::Output) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Orchestration {
            pattern: self.pattern,
            input_transform: self.input_transform,
            output_transform: Arc::new(transform),
            callbacks: self.callbacks,
            config: self.config,
        }
    }

    pub fn with_agent_response_callback<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(ChatMessage) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.callbacks.response = Some(Arc::new(move |message| Box::pin(callback(message))));
        self
    }

    pub fn with_streaming_callback<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(StreamingChatMessage, bool) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.callbacks.streaming = Some(Arc::new(move |chunk, is_final| {
            Box::pin(callback(chunk, is_final))
        }));
        self
    }

    /// Start one invocation of the pattern.
    ///
    /// Registration errors surface here, before any message is sent. The task
    /// itself is injected in the background; the returned handle resolves when
    /// the pattern reports its output.
    pub async fn invoke(
        &self,
        task: TIn,
        runtime: &CoreRuntime,
    ) -> Result<OrchestrationResult<TOut>, OrchestrationError> {
        if !runtime.is_running() {
            return Err(RuntimeError::NotRunning.into());
        }

        let messages = (self.input_transform)(task)
            .map_err(|e| OrchestrationError::Transform(format!("input transform failed: {e:#}")))?;
        if messages.is_empty() {
            return Err(OrchestrationError::Transform(
                "input transform produced no messages".to_string(),
            ));
        }

        let internal_topic_type = uuid::Uuid::new_v4().simple().to_string();
        let (result, setter) = OrchestrationResult::new(self.config.default_timeout());
        let ctx = PatternContext {
            runtime: runtime.clone(),
            internal_topic_type: internal_topic_type.clone(),
            reporter: ResultReporter::new(setter, Arc::clone(&self.output_transform)),
            callbacks: self.callbacks.clone(),
            cancellation_token: result.cancellation_token(),
            config: self.config.clone(),
        };

        info!(
            pattern = self.pattern.name(),
            topic = %internal_topic_type,
            "Invoking orchestration"
        );
        self.pattern.prepare(&ctx).await?;

        let pattern = Arc::clone(&self.pattern);
        tokio::spawn(async move {
            match pattern.start(messages, &ctx).await {
                Ok(()) => debug!(pattern = pattern.name(), "Orchestration task injected"),
                Err(OrchestrationError::Runtime(RuntimeError::Cancelled)) => {
                    debug!(pattern = pattern.name(), "Orchestration start cancelled");
                }
                Err(e) => {
                    error!(pattern = pattern.name(), error = %e, "Orchestration start failed");
                    ctx.reporter.fail(e.to_string());
                }
            }
        });

        Ok(result)
    }
}

/// Map an agent or callback failure onto the runtime's handler error
pub(crate) fn handler_error(agent_id: &agent_runtime::AgentId, error: anyhow::Error) -> RuntimeError {
    RuntimeError::handler_failed(agent_id, format!("{error:#}"))
}
