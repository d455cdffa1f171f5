//! Handoff pattern: agents pass control to each other along a declared graph
//!
//! The acting agent signals routing through its response metadata:
//! `handoff_to = "<agent name>"` passes control, `task_completed = true` ends
//! the orchestration with that response. A response carrying neither is
//! taken as the final answer.

use crate::actor_base::{report_failure, AgentActorBase};
use crate::base::{OrchestrationPattern, PatternContext, ResultReporter};
use crate::error::OrchestrationError;
use agent_runtime::{
    payload, AgentId, BaseActor, HandlerResult, MessageContext, MessageHandlers, Payload,
    RuntimeError, TopicId, TypeSubscription,
};
use async_trait::async_trait;
use futures::future::{try_join_all, BoxFuture};
use kernel_core::{Agent, ChatMessage};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Response metadata key naming the agent to hand off to
pub const HANDOFF_TO_KEY: &str = "handoff_to";

/// Response metadata flag ending the orchestration
pub const TASK_COMPLETED_KEY: &str = "task_completed";

pub const DEFAULT_MAX_TURNS: usize = 20;

/// Directed handoff graph: source agent name to its targets and the
/// description of each handoff
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestrationHandoffs {
    edges: BTreeMap<String, BTreeMap<String, String>>,
}

impl OrchestrationHandoffs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `source` to hand off to `target`
    pub fn add(
        mut self,
        source: impl Into<String>,
        target: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.edges
            .entry(source.into())
            .or_default()
            .insert(target.into(), description.into());
        self
    }

    pub fn add_many<I, T, D>(self, source: impl Into<String>, targets: I) -> Self
    where
        I: IntoIterator<Item = (T, D)>,
        T: Into<String>,
        D: Into<String>,
    {
        let source = source.into();
        targets
            .into_iter()
            .fold(self, |handoffs, (target, description)| {
                handoffs.add(source.clone(), target, description)
            })
    }

    pub fn targets(&self, source: &str) -> Option<&BTreeMap<String, String>> {
        self.edges.get(source)
    }

    pub fn allows(&self, source: &str, target: &str) -> bool {
        self.edges
            .get(source)
            .is_some_and(|targets| targets.contains_key(target))
    }

    fn validate(&self, members: &[Arc<dyn Agent>]) -> Result<(), OrchestrationError> {
        let known = |name: &str| members.iter().any(|m| m.name() == name);
        for (source, targets) in &self.edges {
            if !known(source) {
                return Err(OrchestrationError::InvalidConfiguration(format!(
                    "handoff source '{source}' is not a member"
                )));
            }
            for target in targets.keys() {
                if !known(target) {
                    return Err(OrchestrationError::InvalidConfiguration(format!(
                        "handoff target '{target}' of '{source}' is not a member"
                    )));
                }
                if target == source {
                    return Err(OrchestrationError::InvalidConfiguration(format!(
                        "agent '{source}' cannot hand off to itself"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Initial task, delivered to every member before the first turn
#[derive(Debug, Clone)]
pub struct HandoffStart {
    pub body: Vec<ChatMessage>,
}

/// Names the agent that acts next
#[derive(Debug, Clone)]
pub struct HandoffRequest {
    pub agent_name: String,
    pub turn: usize,
}

/// An agent's answer, broadcast so every member shares the conversation
#[derive(Debug, Clone)]
pub struct HandoffResponse {
    pub body: ChatMessage,
}

/// Dynamic routing between members; the first member acts first
pub struct HandoffPattern {
    members: Vec<Arc<dyn Agent>>,
    handoffs: Arc<OrchestrationHandoffs>,
    max_turns: usize,
}

impl HandoffPattern {
    pub fn new(
        members: Vec<Arc<dyn Agent>>,
        handoffs: OrchestrationHandoffs,
    ) -> Result<Self, OrchestrationError> {
        crate::validate_members(&members)?;
        handoffs.validate(&members)?;
        Ok(Self {
            members,
            handoffs: Arc::new(handoffs),
            max_turns: DEFAULT_MAX_TURNS,
        })
    }

    /// Upper bound on agent turns; the response of the last allowed turn is
    /// the result
    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns.max(1);
        self
    }

    pub fn handoffs(&self) -> &OrchestrationHandoffs {
        &self.handoffs
    }
}

#[async_trait]
impl OrchestrationPattern for HandoffPattern {
    type Output = ChatMessage;

    fn name(&self) -> &str {
        "handoff"
    }

    async fn prepare(&self, ctx: &PatternContext<ChatMessage>) -> Result<(), OrchestrationError> {
        try_join_all(self.members.iter().map(|agent| {
            let agent = Arc::clone(agent);
            let callbacks = ctx.callbacks.clone();
            let topic = ctx.internal_topic_type.clone();
            let handoffs = Arc::clone(&self.handoffs);
            let reporter = ctx.reporter.clone();
            let max_turns = self.max_turns;
            ctx.runtime
                .register_actor(ctx.actor_type(agent.name()), move |id, runtime| {
                    let base = AgentActorBase::new(
                        Arc::clone(&agent),
                        id,
                        runtime,
                        callbacks.clone(),
                        topic.clone(),
                    );
                    Ok(HandoffAgentActor::new(
                        base,
                        Arc::clone(&handoffs),
                        reporter.clone(),
                        max_turns,
                    ))
                })
        }))
        .await?;

        try_join_all(self.members.iter().map(|agent| {
            ctx.runtime.add_subscription(TypeSubscription::new(
                ctx.internal_topic_type.clone(),
                ctx.actor_type(agent.name()),
            ))
        }))
        .await?;
        Ok(())
    }

    /// Every member receives the task before the first agent is asked to act
    async fn start(
        &self,
        messages: Vec<ChatMessage>,
        ctx: &PatternContext<ChatMessage>,
    ) -> Result<(), OrchestrationError> {
        let first = self
            .members
            .first()
            .ok_or_else(|| OrchestrationError::InvalidConfiguration("no members".to_string()))?;

        try_join_all(self.members.iter().map(|agent| {
            let start = payload(HandoffStart {
                body: messages.clone(),
            });
            async move {
                let target = ctx
                    .runtime
                    .get(ctx.actor_type(agent.name()), AgentId::DEFAULT_KEY, true)
                    .await?;
                ctx.runtime
                    .send_message(start, &target, None, Some(ctx.cancellation_token.clone()))
                    .await
            }
        }))
        .await?;

        ctx.runtime
            .publish_message(
                payload(HandoffRequest {
                    agent_name: first.name().to_string(),
                    turn: 1,
                }),
                TopicId::with_default_source(ctx.internal_topic_type.clone()),
                None,
                Some(ctx.cancellation_token.clone()),
            )
            .await?;
        Ok(())
    }
}

struct HandoffAgentActor {
    base: AgentActorBase,
    handoffs: Arc<OrchestrationHandoffs>,
    reporter: ResultReporter<ChatMessage>,
    max_turns: usize,
    description: String,
    handlers: Arc<MessageHandlers<Self>>,
}

impl HandoffAgentActor {
    fn new(
        base: AgentActorBase,
        handoffs: Arc<OrchestrationHandoffs>,
        reporter: ResultReporter<ChatMessage>,
        max_turns: usize,
    ) -> Self {
        Self {
            description: base.description(),
            base,
            handoffs,
            reporter,
            max_turns,
            handlers: Arc::new(
                MessageHandlers::new()
                    .on::<HandoffStart>(Self::on_start)
                    .on::<HandoffRequest>(Self::on_request)
                    .on::<HandoffResponse>(Self::on_response),
            ),
        }
    }

    fn on_start<'a>(
        &'a mut self,
        message: Arc<HandoffStart>,
        _ctx: MessageContext,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            for m in &message.body {
                self.base.observe(m.clone());
            }
            Ok(None)
        })
    }

    fn on_response<'a>(
        &'a mut self,
        message: Arc<HandoffResponse>,
        _ctx: MessageContext,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            self.base.observe(message.body.clone());
            Ok(None)
        })
    }

    fn on_request<'a>(
        &'a mut self,
        message: Arc<HandoffRequest>,
        ctx: MessageContext,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            if message.agent_name != self.base.name() {
                return Ok(None);
            }
            if let Err(e) = self.take_turn(message.turn, &ctx).await {
                report_failure(&self.reporter, &self.base.id, &e);
                return Err(e);
            }
            Ok(None)
        })
    }

    async fn take_turn(&mut self, turn: usize, ctx: &MessageContext) -> Result<(), RuntimeError> {
        debug!(actor_id = %self.base.id, turn, "Handoff agent acting");
        let response = self.base.invoke(Vec::new()).await?;
        self.base
            .publish(
                payload(HandoffResponse {
                    body: response.clone(),
                }),
                &ctx.cancellation_token,
            )
            .await?;

        if response.metadata_flag(TASK_COMPLETED_KEY) {
            info!(agent = %self.base.name(), turn, "Handoff task completed");
            self.reporter.complete(response);
            return Ok(());
        }

        let Some(target) = response.metadata_str(HANDOFF_TO_KEY).map(str::to_string) else {
            debug!(agent = %self.base.name(), "No handoff requested, response is final");
            self.reporter.complete(response);
            return Ok(());
        };

        if !self.handoffs.allows(self.base.name(), &target) {
            return Err(RuntimeError::handler_failed(
                &self.base.id,
                format!("invalid handoff from '{}' to '{}'", self.base.name(), target),
            ));
        }

        if turn >= self.max_turns {
            warn!(agent = %self.base.name(), max_turns = self.max_turns, "Handoff turn limit reached");
            self.reporter.complete(response);
            return Ok(());
        }

        debug!(from = %self.base.name(), to = %target, "Handing off");
        self.base
            .publish(
                payload(HandoffRequest {
                    agent_name: target,
                    turn: turn + 1,
                }),
                &ctx.cancellation_token,
            )
            .await
    }
}

#[async_trait]
impl BaseActor for HandoffAgentActor {
    fn description(&self) -> &str {
        &self.description
    }

    async fn on_message(&mut self, message: Payload, ctx: MessageContext) -> HandlerResult {
        let handlers = Arc::clone(&self.handlers);
        handlers.dispatch(self, message, ctx).await
    }

    async fn save_state(&self) -> Result<Value, RuntimeError> {
        self.base.save_state()
    }

    async fn load_state(&mut self, state: Value) -> Result<(), RuntimeError> {
        self.base.load_state(state)
    }
}
