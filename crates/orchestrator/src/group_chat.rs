//! Group chat pattern: a manager picks the next speaker after every turn
//!
//! Every participant sees every message. After each turn the manager actor
//! consults its [`GroupChatManager`]: first whether a human should speak, then
//! whether the chat is over, and otherwise who speaks next.

use crate::actor_base::{publish_internal, report_failure, AgentActorBase};
use crate::base::{handler_error, OrchestrationPattern, PatternContext, ResultReporter};
use crate::error::OrchestrationError;
use agent_runtime::{
    payload, AgentId, BaseActor, HandlerResult, MessageContext, MessageHandlers, Payload,
    RuntimeError, RuntimeHandle, TypeSubscription,
};
use async_trait::async_trait;
use futures::future::{try_join_all, BoxFuture};
use kernel_core::{Agent, AuthorRole, ChatHistory, ChatMessage};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

const MANAGER_ACTOR_NAME: &str = "group_chat_manager";

/// Name and description of one member, in member order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub name: String,
    pub description: String,
}

impl Participant {
    pub(crate) fn from_agents(members: &[Arc<dyn Agent>]) -> Vec<Participant> {
        members
            .iter()
            .map(|agent| Participant {
                name: agent.name().to_string(),
                description: agent.description().unwrap_or_default().to_string(),
            })
            .collect()
    }
}

/// A manager decision plus the reason for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerDecision<T> {
    pub result: T,
    pub reason: String,
}

impl<T> ManagerDecision<T> {
    pub fn new(result: T, reason: impl Into<String>) -> Self {
        Self {
            result,
            reason: reason.into(),
        }
    }
}

/// Produces a human message when the manager asks for user input
pub type HumanResponseFunction =
    Arc<dyn Fn(ChatHistory) -> BoxFuture<'static, anyhow::Result<ChatMessage>> + Send + Sync>;

/// Turn-taking policy of a group chat.
///
/// One manager instance drives one invocation, so implementations may keep
/// per-conversation state.
#[async_trait]
pub trait GroupChatManager: Send + Sync + 'static {
    async fn should_request_user_input(
        &mut self,
        _history: &ChatHistory,
    ) -> anyhow::Result<ManagerDecision<bool>> {
        Ok(ManagerDecision::new(false, "user input is never requested"))
    }

    async fn should_terminate(&mut self, history: &ChatHistory) -> anyhow::Result<ManagerDecision<bool>>;

    /// Name of the participant that speaks next
    async fn select_next_agent(
        &mut self,
        history: &ChatHistory,
        participants: &[Participant],
    ) -> anyhow::Result<ManagerDecision<String>>;

    /// Final answer once the chat has terminated
    async fn filter_results(&mut self, history: &ChatHistory) -> anyhow::Result<ManagerDecision<ChatMessage>>;
}

/// Participants speak in member order until `max_rounds` turns were taken
#[derive(Debug, Clone, Default)]
pub struct RoundRobinGroupChatManager {
    pub max_rounds: Option<usize>,
    current_round: usize,
    current_index: usize,
}

impl RoundRobinGroupChatManager {
    pub fn new(max_rounds: Option<usize>) -> Self {
        Self {
            max_rounds,
            current_round: 0,
            current_index: 0,
        }
    }

    pub fn current_round(&self) -> usize {
        self.current_round
    }
}

#[async_trait]
impl GroupChatManager for RoundRobinGroupChatManager {
    async fn should_terminate(&mut self, _history: &ChatHistory) -> anyhow::Result<ManagerDecision<bool>> {
        Ok(match self.max_rounds {
            Some(max) if self.current_round >= max => {
                ManagerDecision::new(true, format!("maximum number of rounds ({max}) reached"))
            }
            Some(_) => ManagerDecision::new(false, "rounds remaining"),
            None => ManagerDecision::new(false, "no round limit"),
        })
    }

    async fn select_next_agent(
        &mut self,
        _history: &ChatHistory,
        participants: &[Participant],
    ) -> anyhow::Result<ManagerDecision<String>> {
        if participants.is_empty() {
            anyhow::bail!("group chat has no participants");
        }
        let next = &participants[self.current_index % participants.len()];
        self.current_index = (self.current_index + 1) % participants.len();
        self.current_round += 1;
        Ok(ManagerDecision::new(next.name.clone(), "round robin"))
    }

    async fn filter_results(&mut self, history: &ChatHistory) -> anyhow::Result<ManagerDecision<ChatMessage>> {
        let last = history
            .last()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("group chat produced no messages"))?;
        Ok(ManagerDecision::new(last, "last message of the conversation"))
    }
}

/// Initial task, delivered to every participant and the manager
#[derive(Debug, Clone)]
pub struct GroupChatStart {
    pub body: Vec<ChatMessage>,
}

/// Names the participant that speaks next
#[derive(Debug, Clone)]
pub struct GroupChatRequest {
    pub agent_name: String,
}

/// One turn of the conversation, broadcast to everyone
#[derive(Debug, Clone)]
pub struct GroupChatResponse {
    pub body: ChatMessage,
}

type ManagerFactory = Arc<dyn Fn() -> Box<dyn GroupChatManager> + Send + Sync>;

/// Manager-driven conversation between members
pub struct GroupChatPattern {
    members: Vec<Arc<dyn Agent>>,
    manager_factory: ManagerFactory,
    human_response: Option<HumanResponseFunction>,
}

impl GroupChatPattern {
    /// `manager_factory` builds a fresh manager for every invocation
    pub fn new<M, F>(members: Vec<Arc<dyn Agent>>, manager_factory: F) -> Result<Self, OrchestrationError>
    where
        M: GroupChatManager,
        F: Fn() -> M + Send + Sync + 'static,
    {
        crate::validate_members(&members)?;
        Ok(Self {
            members,
            manager_factory: Arc::new(move || Box::new(manager_factory()) as Box<dyn GroupChatManager>),
            human_response: None,
        })
    }

    pub fn with_human_response<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ChatHistory) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<ChatMessage>> + Send + 'static,
    {
        self.human_response = Some(Arc::new(move |history| Box::pin(f(history))));
        self
    }
}

#[async_trait]
impl OrchestrationPattern for GroupChatPattern {
    type Output = ChatMessage;

    fn name(&self) -> &str {
        "group_chat"
    }

    async fn prepare(&self, ctx: &PatternContext<ChatMessage>) -> Result<(), OrchestrationError> {
        try_join_all(self.members.iter().map(|agent| {
            let agent = Arc::clone(agent);
            let callbacks = ctx.callbacks.clone();
            let topic = ctx.internal_topic_type.clone();
            ctx.runtime
                .register_actor(ctx.actor_type(agent.name()), move |id, runtime| {
                    let base = AgentActorBase::new(
                        Arc::clone(&agent),
                        id,
                        runtime,
                        callbacks.clone(),
                        topic.clone(),
                    );
                    Ok(GroupChatAgentActor::new(base))
                })
        }))
        .await?;

        let participants = Participant::from_agents(&self.members);
        let factory = Arc::clone(&self.manager_factory);
        let human_response = self.human_response.clone();
        let reporter = ctx.reporter.clone();
        let topic = ctx.internal_topic_type.clone();
        ctx.runtime
            .register_actor(ctx.actor_type(MANAGER_ACTOR_NAME), move |id, runtime| {
                Ok(GroupChatManagerActor {
                    id,
                    runtime,
                    internal_topic_type: topic.clone(),
                    manager: factory(),
                    participants: participants.clone(),
                    history: ChatHistory::new(),
                    human_response: human_response.clone(),
                    reporter: reporter.clone(),
                    handlers: Arc::new(
                        MessageHandlers::new()
                            .on::<GroupChatStart>(GroupChatManagerActor::on_start)
                            .on::<GroupChatResponse>(GroupChatManagerActor::on_response),
                    ),
                })
            })
            .await?;

        let mut actor_types: Vec<_> = self.members.iter().map(|a| ctx.actor_type(a.name())).collect();
        actor_types.push(ctx.actor_type(MANAGER_ACTOR_NAME));
        try_join_all(actor_types.into_iter().map(|actor_type| {
            ctx.runtime
                .add_subscription(TypeSubscription::new(ctx.internal_topic_type.clone(), actor_type))
        }))
        .await?;
        Ok(())
    }

    /// Participants receive the task before the manager, so nobody is asked
    /// to speak without context
    async fn start(
        &self,
        messages: Vec<ChatMessage>,
        ctx: &PatternContext<ChatMessage>,
    ) -> Result<(), OrchestrationError> {
        let send_start = |name: String| {
            let start = payload(GroupChatStart {
                body: messages.clone(),
            });
            async move {
                let target = ctx
                    .runtime
                    .get(ctx.actor_type(&name), AgentId::DEFAULT_KEY, true)
                    .await?;
                ctx.runtime
                    .send_message(start, &target, None, Some(ctx.cancellation_token.clone()))
                    .await
            }
        };

        try_join_all(self.members.iter().map(|agent| send_start(agent.name().to_string()))).await?;
        send_start(MANAGER_ACTOR_NAME.to_string()).await?;
        Ok(())
    }
}

struct GroupChatAgentActor {
    base: AgentActorBase,
    description: String,
    handlers: Arc<MessageHandlers<Self>>,
}

impl GroupChatAgentActor {
    fn new(base: AgentActorBase) -> Self {
        Self {
            description: base.description(),
            base,
            handlers: Arc::new(
                MessageHandlers::new()
                    .on::<GroupChatStart>(Self::on_start)
                    .on::<GroupChatRequest>(Self::on_request)
                    .on::<GroupChatResponse>(Self::on_response),
            ),
        }
    }

    fn on_start<'a>(
        &'a mut self,
        message: Arc<GroupChatStart>,
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
        message: Arc<GroupChatResponse>,
        _ctx: MessageContext,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            self.base.observe(message.body.clone());
            Ok(None)
        })
    }

    fn on_request<'a>(
        &'a mut self,
        message: Arc<GroupChatRequest>,
        ctx: MessageContext,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            if message.agent_name != self.base.name() {
                return Ok(None);
            }
            debug!(actor_id = %self.base.id, "Group chat participant speaking");
            let response = self.base.invoke(Vec::new()).await?;
            self.base
                .publish(payload(GroupChatResponse { body: response }), &ctx.cancellation_token)
                .await?;
            Ok(None)
        })
    }
}

#[async_trait]
impl BaseActor for GroupChatAgentActor {
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

struct GroupChatManagerActor {
    id: AgentId,
    runtime: RuntimeHandle,
    internal_topic_type: String,
    manager: Box<dyn GroupChatManager>,
    participants: Vec<Participant>,
    history: ChatHistory,
    human_response: Option<HumanResponseFunction>,
    reporter: ResultReporter<ChatMessage>,
    handlers: Arc<MessageHandlers<Self>>,
}

impl GroupChatManagerActor {
    fn on_start<'a>(
        &'a mut self,
        message: Arc<GroupChatStart>,
        ctx: MessageContext,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            self.history.extend(message.body.iter().cloned());
            self.take_action(&ctx).await
        })
    }

    fn on_response<'a>(
        &'a mut self,
        message: Arc<GroupChatResponse>,
        ctx: MessageContext,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            self.history.add_message(message.body.clone());
            self.take_action(&ctx).await
        })
    }

    async fn take_action(&mut self, ctx: &MessageContext) -> HandlerResult {
        match self.determine_state_and_act(ctx).await {
            Ok(()) => Ok(None),
            Err(e) => {
                report_failure(&self.reporter, &self.id, &e);
                Err(e)
            }
        }
    }

    async fn determine_state_and_act(&mut self, ctx: &MessageContext) -> Result<(), RuntimeError> {
        let token = &ctx.cancellation_token;

        let wants_user = self
            .manager
            .should_request_user_input(&self.history)
            .await
            .map_err(|e| handler_error(&self.id, e))?;
        if wants_user.result {
            if let Some(human_response) = &self.human_response {
                debug!(reason = %wants_user.reason, "Requesting user input");
                let mut reply = human_response(self.history.clone())
                    .await
                    .map_err(|e| handler_error(&self.id, e))?;
                reply.role = AuthorRole::User;
                self.history.add_message(reply.clone());
                self.publish(payload(GroupChatResponse { body: reply }), token).await?;
            }
        }

        let terminate = self
            .manager
            .should_terminate(&self.history)
            .await
            .map_err(|e| handler_error(&self.id, e))?;
        if terminate.result {
            let answer = self
                .manager
                .filter_results(&self.history)
                .await
                .map_err(|e| handler_error(&self.id, e))?;
            info!(reason = %terminate.reason, "Group chat terminated");
            self.reporter.complete(answer.result);
            return Ok(());
        }

        let next = self
            .manager
            .select_next_agent(&self.history, &self.participants)
            .await
            .map_err(|e| handler_error(&self.id, e))?;
        if !self.participants.iter().any(|p| p.name == next.result) {
            return Err(RuntimeError::handler_failed(
                &self.id,
                format!("unknown participant '{}' selected", next.result),
            ));
        }
        debug!(next = %next.result, reason = %next.reason, "Group chat manager selected speaker");
        self.publish(
            payload(GroupChatRequest {
                agent_name: next.result,
            }),
            token,
        )
        .await
    }

    async fn publish(
        &self,
        message: Payload,
        token: &tokio_util::sync::CancellationToken,
    ) -> Result<(), RuntimeError> {
        publish_internal(&self.runtime, &self.id, &self.internal_topic_type, message, token).await
    }
}

#[async_trait]
impl BaseActor for GroupChatManagerActor {
    fn description(&self) -> &str {
        "Group chat manager"
    }

    async fn on_message(&mut self, message: Payload, ctx: MessageContext) -> HandlerResult {
        let handlers = Arc::clone(&self.handlers);
        handlers.dispatch(self, message, ctx).await
    }

    async fn save_state(&self) -> Result<Value, RuntimeError> {
        Ok(serde_json::to_value(&self.history)?)
    }

    async fn load_state(&mut self, state: Value) -> Result<(), RuntimeError> {
        self.history = serde_json::from_value(state)?;
        Ok(())
    }
}
