//! Concurrent pattern: every member answers the same task, answers are
//! collected in arrival order

use crate::actor_base::AgentActorBase;
use crate::base::{OrchestrationPattern, PatternContext, ResultReporter};
use crate::config::CollectionPolicy;
use crate::error::OrchestrationError;
use agent_runtime::{
    payload, AgentId, AgentType, BaseActor, HandlerResult, MessageContext, MessageHandlers,
    Payload, RuntimeError, TopicId, TypeSubscription,
};
use async_trait::async_trait;
use futures::future::{try_join_all, BoxFuture};
use kernel_core::{Agent, ChatMessage};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

const COLLECTION_ACTOR_NAME: &str = "concurrent_collection";

/// Task broadcast to every member
#[derive(Debug, Clone)]
pub struct ConcurrentRequest {
    pub body: Vec<ChatMessage>,
}

/// One member's answer, sent to the collection actor
#[derive(Debug, Clone)]
pub struct ConcurrentResponse {
    pub body: ChatMessage,
}

/// A member failed before answering
#[derive(Debug, Clone)]
pub struct ConcurrentFailure {
    pub agent_name: String,
    pub error: String,
}

/// Fan-out to all members; the result holds one response per member
pub struct ConcurrentPattern {
    members: Vec<Arc<dyn Agent>>,
}

impl ConcurrentPattern {
    pub fn new(members: Vec<Arc<dyn Agent>>) -> Result<Self, OrchestrationError> {
        crate::validate_members(&members)?;
        Ok(Self { members })
    }

    pub fn members(&self) -> &[Arc<dyn Agent>] {
        &self.members
    }
}

#[async_trait]
impl OrchestrationPattern for ConcurrentPattern {
    type Output = Vec<ChatMessage>;

    fn name(&self) -> &str {
        "concurrent"
    }

    /// Members, the collection actor and the member subscriptions are
    /// independent and registered concurrently
    async fn prepare(&self, ctx: &PatternContext<Vec<ChatMessage>>) -> Result<(), OrchestrationError> {
        let collection_type = ctx.actor_type(COLLECTION_ACTOR_NAME);

        let members = try_join_all(self.members.iter().map(|agent| {
            let agent = Arc::clone(agent);
            let callbacks = ctx.callbacks.clone();
            let topic = ctx.internal_topic_type.clone();
            let collection = collection_type.clone();
            ctx.runtime
                .register_actor(ctx.actor_type(agent.name()), move |id, runtime| {
                    let base = AgentActorBase::new(
                        Arc::clone(&agent),
                        id,
                        runtime,
                        callbacks.clone(),
                        topic.clone(),
                    );
                    Ok(ConcurrentAgentActor::new(base, collection.clone()))
                })
        }));

        let expected = self.members.len();
        let policy = ctx.config.collection_policy;
        let reporter = ctx.reporter.clone();
        let collection = ctx
            .runtime
            .register_actor(collection_type.clone(), move |id, _runtime| {
                Ok(ConcurrentCollectionActor::new(id, expected, policy, reporter.clone()))
            });

        let subscriptions = try_join_all(self.members.iter().map(|agent| {
            ctx.runtime.add_subscription(TypeSubscription::new(
                ctx.internal_topic_type.clone(),
                ctx.actor_type(agent.name()),
            ))
        }));

        tokio::try_join!(members, collection, subscriptions)?;
        Ok(())
    }

    async fn start(
        &self,
        messages: Vec<ChatMessage>,
        ctx: &PatternContext<Vec<ChatMessage>>,
    ) -> Result<(), OrchestrationError> {
        ctx.runtime
            .publish_message(
                payload(ConcurrentRequest { body: messages }),
                TopicId::with_default_source(ctx.internal_topic_type.clone()),
                None,
                Some(ctx.cancellation_token.clone()),
            )
            .await?;
        Ok(())
    }
}

struct ConcurrentAgentActor {
    base: AgentActorBase,
    collection: AgentType,
    description: String,
    handlers: Arc<MessageHandlers<Self>>,
}

impl ConcurrentAgentActor {
    fn new(base: AgentActorBase, collection: AgentType) -> Self {
        Self {
            description: base.description(),
            base,
            collection,
            handlers: Arc::new(MessageHandlers::new().on::<ConcurrentRequest>(Self::on_request)),
        }
    }

    fn on_request<'a>(
        &'a mut self,
        message: Arc<ConcurrentRequest>,
        ctx: MessageContext,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            debug!(actor_id = %self.base.id, "Concurrent member received request");
            let collection = self
                .base
                .runtime
                .get(self.collection.clone(), AgentId::DEFAULT_KEY, true)
                .await?;

            match self.base.invoke(message.body.clone()).await {
                Ok(response) => {
                    self.base
                        .send(payload(ConcurrentResponse { body: response }), &collection, &ctx.cancellation_token)
                        .await?;
                    Ok(None)
                }
                Err(RuntimeError::Cancelled) => Err(RuntimeError::Cancelled),
                Err(e) => {
                    let failure = ConcurrentFailure {
                        agent_name: self.base.name().to_string(),
                        error: e.to_string(),
                    };
                    self.base
                        .send(payload(failure), &collection, &ctx.cancellation_token)
                        .await?;
                    Err(e)
                }
            }
        })
    }
}

#[async_trait]
impl BaseActor for ConcurrentAgentActor {
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

/// Counts member outcomes and reports once every member is accounted for
struct ConcurrentCollectionActor {
    id: AgentId,
    expected: usize,
    policy: CollectionPolicy,
    responses: Vec<ChatMessage>,
    failures: usize,
    reported: bool,
    reporter: ResultReporter<Vec<ChatMessage>>,
    handlers: Arc<MessageHandlers<Self>>,
}

impl ConcurrentCollectionActor {
    fn new(
        id: AgentId,
        expected: usize,
        policy: CollectionPolicy,
        reporter: ResultReporter<Vec<ChatMessage>>,
    ) -> Self {
        Self {
            id,
            expected,
            policy,
            responses: Vec::with_capacity(expected),
            failures: 0,
            reported: false,
            reporter,
            handlers: Arc::new(
                MessageHandlers::new()
                    .on::<ConcurrentResponse>(Self::on_response)
                    .on::<ConcurrentFailure>(Self::on_failure),
            ),
        }
    }

    fn on_response<'a>(
        &'a mut self,
        message: Arc<ConcurrentResponse>,
        _ctx: MessageContext,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            if self.reported {
                debug!(actor_id = %self.id, "Ignoring response after result was reported");
                return Ok(None);
            }
            self.responses.push(message.body.clone());
            self.report_if_done();
            Ok(None)
        })
    }

    fn on_failure<'a>(
        &'a mut self,
        message: Arc<ConcurrentFailure>,
        _ctx: MessageContext,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            if self.reported {
                return Ok(None);
            }
            match self.policy {
                CollectionPolicy::RequireAll => {
                    warn!(
                        actor_id = %self.id,
                        agent = %message.agent_name,
                        error = %message.error,
                        "Concurrent member failed, result will not complete"
                    );
                }
                CollectionPolicy::FailFast => {
                    self.reported = true;
                    self.reporter.fail(format!(
                        "member '{}' failed: {}",
                        message.agent_name, message.error
                    ));
                }
                CollectionPolicy::BestEffort => {
                    warn!(agent = %message.agent_name, error = %message.error, "Concurrent member failed, continuing");
                    self.failures += 1;
                    self.report_if_done();
                }
            }
            Ok(None)
        })
    }

    fn report_if_done(&mut self) {
        if self.responses.len() + self.failures < self.expected {
            return;
        }
        self.reported = true;
        info!(
            actor_id = %self.id,
            responses = self.responses.len(),
            failures = self.failures,
            "Concurrent orchestration completed"
        );
        self.reporter.complete(std::mem::take(&mut self.responses));
    }
}

#[async_trait]
impl BaseActor for ConcurrentCollectionActor {
    fn description(&self) -> &str {
        "Concurrent result collector"
    }

    async fn on_message(&mut self, message: Payload, ctx: MessageContext) -> HandlerResult {
        let handlers = Arc::clone(&self.handlers);
        handlers.dispatch(self, message, ctx).await
    }
}
