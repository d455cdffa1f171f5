//! Sequential pattern: each member answers the previous member's output

use crate::actor_base::AgentActorBase;
use crate::base::{OrchestrationPattern, PatternContext, ResultReporter};
use crate::error::OrchestrationError;
use agent_runtime::{
    payload, AgentId, AgentType, BaseActor, HandlerResult, MessageContext, MessageHandlers,
    Payload, RuntimeError,
};
use async_trait::async_trait;
use futures::future::BoxFuture;
use kernel_core::{Agent, ChatMessage};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

const COLLECTION_ACTOR_NAME: &str = "sequential_collection";

/// Input of one member, or of the collection actor after the last member
#[derive(Debug, Clone)]
pub struct SequentialRequest {
    pub body: Vec<ChatMessage>,
}

/// Chain of agents; the last member's response is the result
pub struct SequentialPattern {
    members: Vec<Arc<dyn Agent>>,
}

impl SequentialPattern {
    pub fn new(members: Vec<Arc<dyn Agent>>) -> Result<Self, OrchestrationError> {
        crate::validate_members(&members)?;
        Ok(Self { members })
    }

    pub fn members(&self) -> &[Arc<dyn Agent>] {
        &self.members
    }
}

#[async_trait]
impl OrchestrationPattern for SequentialPattern {
    type Output = ChatMessage;

    fn name(&self) -> &str {
        "sequential"
    }

    /// The collection actor is registered first and the members in reverse,
    /// so every member is constructed knowing its successor's type
    async fn prepare(&self, ctx: &PatternContext<ChatMessage>) -> Result<(), OrchestrationError> {
        let collection_type = ctx.actor_type(COLLECTION_ACTOR_NAME);
        let reporter = ctx.reporter.clone();
        ctx.runtime
            .register_actor(collection_type.clone(), move |id, _runtime| {
                Ok(SequentialCollectionActor::new(id, reporter.clone()))
            })
            .await?;

        let mut next = collection_type;
        for agent in self.members.iter().rev() {
            let actor_type = ctx.actor_type(agent.name());
            let agent = Arc::clone(agent);
            let callbacks = ctx.callbacks.clone();
            let topic = ctx.internal_topic_type.clone();
            let successor = next.clone();
            ctx.runtime
                .register_actor(actor_type.clone(), move |id, runtime| {
                    let base = AgentActorBase::new(
                        Arc::clone(&agent),
                        id,
                        runtime,
                        callbacks.clone(),
                        topic.clone(),
                    );
                    Ok(SequentialAgentActor::new(base, successor.clone()))
                })
                .await?;
            next = actor_type;
        }
        Ok(())
    }

    async fn start(
        &self,
        messages: Vec<ChatMessage>,
        ctx: &PatternContext<ChatMessage>,
    ) -> Result<(), OrchestrationError> {
        let first = self
            .members
            .first()
            .ok_or_else(|| OrchestrationError::InvalidConfiguration("no members".to_string()))?;
        let target = ctx
            .runtime
            .get(ctx.actor_type(first.name()), AgentId::DEFAULT_KEY, true)
            .await?;
        ctx.runtime
            .send_message(
                payload(SequentialRequest { body: messages }),
                &target,
                None,
                Some(ctx.cancellation_token.clone()),
            )
            .await?;
        Ok(())
    }
}

struct SequentialAgentActor {
    base: AgentActorBase,
    next: AgentType,
    description: String,
    handlers: Arc<MessageHandlers<Self>>,
}

impl SequentialAgentActor {
    fn new(base: AgentActorBase, next: AgentType) -> Self {
        Self {
            description: base.description(),
            base,
            next,
            handlers: Arc::new(MessageHandlers::new().on::<SequentialRequest>(Self::on_request)),
        }
    }

    fn on_request<'a>(
        &'a mut self,
        message: Arc<SequentialRequest>,
        ctx: MessageContext,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            debug!(actor_id = %self.base.id, "Sequential member received request");
            let response = self.base.invoke(message.body.clone()).await?;
            let next = self
                .base
                .runtime
                .get(self.next.clone(), self.base.id.key(), true)
                .await?;
            self.base
                .send(
                    payload(SequentialRequest {
                        body: vec![response],
                    }),
                    &next,
                    &ctx.cancellation_token,
                )
                .await?;
            Ok(None)
        })
    }
}

#[async_trait]
impl BaseActor for SequentialAgentActor {
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

/// Receives the last member's response and reports it
struct SequentialCollectionActor {
    id: AgentId,
    reporter: ResultReporter<ChatMessage>,
    handlers: Arc<MessageHandlers<Self>>,
}

impl SequentialCollectionActor {
    fn new(id: AgentId, reporter: ResultReporter<ChatMessage>) -> Self {
        Self {
            id,
            reporter,
            handlers: Arc::new(MessageHandlers::new().on::<SequentialRequest>(Self::on_result)),
        }
    }

    fn on_result<'a>(
        &'a mut self,
        message: Arc<SequentialRequest>,
        _ctx: MessageContext,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            match message.body.last() {
                Some(last) => {
                    debug!(actor_id = %self.id, "Sequential orchestration completed");
                    self.reporter.complete(last.clone());
                }
                None => {
                    self.reporter.fail("last member produced no message");
                }
            }
            Ok(None)
        })
    }
}

#[async_trait]
impl BaseActor for SequentialCollectionActor {
    fn description(&self) -> &str {
        "Sequential result collector"
    }

    async fn on_message(&mut self, message: Payload, ctx: MessageContext) -> HandlerResult {
        let handlers = Arc::clone(&self.handlers);
        handlers.dispatch(self, message, ctx).await
    }
}
