//! Magentic pattern: a planning manager coordinates the members through a
//! task ledger and a per-round progress ledger
//!
//! Outer loop: the manager builds facts and a plan, turns them into a task
//! ledger and broadcasts it. Inner loop: after every turn the manager builds a
//! progress ledger and either prepares the final answer, instructs the next
//! speaker, or, when the conversation stalls for too long, resets every
//! participant and plans again.

use crate::actor_base::{publish_internal, report_failure, AgentActorBase};
use crate::base::{handler_error, OrchestrationPattern, PatternContext, ResultReporter};
use crate::error::OrchestrationError;
use crate::group_chat::Participant;
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
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const MANAGER_ACTOR_NAME: &str = "magentic_manager";
const MANAGER_MESSAGE_NAME: &str = "MagenticManager";

pub const DEFAULT_MAX_STALL_COUNT: usize = 3;

/// One judgement of the progress ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerItem<T> {
    pub reason: String,
    pub answer: T,
}

impl<T> LedgerItem<T> {
    pub fn new(answer: T, reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            answer,
        }
    }
}

/// Manager's assessment after one turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressLedger {
    pub is_request_satisfied: LedgerItem<bool>,
    pub is_in_loop: LedgerItem<bool>,
    pub is_progress_being_made: LedgerItem<bool>,
    pub next_speaker: LedgerItem<String>,
    pub instruction_or_question: LedgerItem<String>,
}

/// Planning and judging capability of the Magentic manager
#[async_trait]
pub trait MagenticManager: Send + Sync + 'static {
    /// Stalled rounds tolerated before the manager re-plans
    fn max_stall_count(&self) -> usize {
        DEFAULT_MAX_STALL_COUNT
    }

    /// Facts and plan for `task`; `old_facts` is set when re-planning
    async fn create_facts_and_plan(
        &self,
        history: &ChatHistory,
        task: &ChatMessage,
        participants: &[Participant],
        old_facts: Option<&ChatMessage>,
    ) -> anyhow::Result<(ChatMessage, ChatMessage)>;

    async fn create_task_ledger(
        &self,
        task: &ChatMessage,
        facts: &ChatMessage,
        plan: &ChatMessage,
        participants: &[Participant],
    ) -> anyhow::Result<String>;

    async fn create_progress_ledger(
        &self,
        history: &ChatHistory,
        task: &ChatMessage,
        participants: &[Participant],
    ) -> anyhow::Result<ProgressLedger>;

    async fn prepare_final_answer(&self, history: &ChatHistory, task: &ChatMessage) -> anyhow::Result<ChatMessage>;
}

/// Task delivered to every participant and the manager
#[derive(Debug, Clone)]
pub struct MagenticStart {
    pub body: ChatMessage,
}

/// Names the participant that acts next
#[derive(Debug, Clone)]
pub struct MagenticRequest {
    pub agent_name: String,
}

/// One turn or manager instruction, broadcast to everyone
#[derive(Debug, Clone)]
pub struct MagenticResponse {
    pub body: ChatMessage,
}

/// Clears every participant's conversation before re-planning
#[derive(Debug, Clone)]
pub struct MagenticReset;

/// Manager-planned collaboration; every member needs a description
pub struct MagenticPattern {
    members: Vec<Arc<dyn Agent>>,
    manager: Arc<dyn MagenticManager>,
}

impl MagenticPattern {
    pub fn new(
        members: Vec<Arc<dyn Agent>>,
        manager: Arc<dyn MagenticManager>,
    ) -> Result<Self, OrchestrationError> {
        crate::validate_members(&members)?;
        if let Some(agent) = members.iter().find(|a| a.description().is_none()) {
            return Err(OrchestrationError::InvalidConfiguration(format!(
                "member '{}' has no description",
                agent.name()
            )));
        }
        Ok(Self { members, manager })
    }
}

#[async_trait]
impl OrchestrationPattern for MagenticPattern {
    type Output = ChatMessage;

    fn name(&self) -> &str {
        "magentic"
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
                    Ok(MagenticAgentActor::new(base))
                })
        }))
        .await?;

        let participants = Participant::from_agents(&self.members);
        let manager = Arc::clone(&self.manager);
        let reporter = ctx.reporter.clone();
        let topic = ctx.internal_topic_type.clone();
        ctx.runtime
            .register_actor(ctx.actor_type(MANAGER_ACTOR_NAME), move |id, runtime| {
                Ok(MagenticManagerActor::new(
                    id,
                    runtime,
                    topic.clone(),
                    Arc::clone(&manager),
                    participants.clone(),
                    reporter.clone(),
                ))
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

    /// Participants receive the task before the manager starts planning
    async fn start(
        &self,
        messages: Vec<ChatMessage>,
        ctx: &PatternContext<ChatMessage>,
    ) -> Result<(), OrchestrationError> {
        let [task]: [ChatMessage; 1] = messages.try_into().map_err(|_| {
            OrchestrationError::Transform("the magentic pattern takes exactly one task message".to_string())
        })?;

        let send_start = |name: String| {
            let start = payload(MagenticStart { body: task.clone() });
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

struct MagenticAgentActor {
    base: AgentActorBase,
    description: String,
    handlers: Arc<MessageHandlers<Self>>,
}

impl MagenticAgentActor {
    fn new(base: AgentActorBase) -> Self {
        Self {
            description: base.description(),
            base,
            handlers: Arc::new(
                MessageHandlers::new()
                    .on::<MagenticStart>(Self::on_start)
                    .on::<MagenticRequest>(Self::on_request)
                    .on::<MagenticResponse>(Self::on_response)
                    .on::<MagenticReset>(Self::on_reset),
            ),
        }
    }

    fn on_start<'a>(
        &'a mut self,
        message: Arc<MagenticStart>,
        _ctx: MessageContext,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            self.base.observe(message.body.clone());
            Ok(None)
        })
    }

    /// Non-user turns are announced as a transfer before the message itself
    fn on_response<'a>(
        &'a mut self,
        message: Arc<MagenticResponse>,
        _ctx: MessageContext,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            if message.body.role != AuthorRole::User {
                let speaker = message.body.name.as_deref().unwrap_or("unknown");
                self.base
                    .observe(ChatMessage::user(format!("Transferred to {speaker}")));
            }
            self.base.observe(message.body.clone());
            Ok(None)
        })
    }

    fn on_request<'a>(
        &'a mut self,
        message: Arc<MagenticRequest>,
        ctx: MessageContext,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            if message.agent_name != self.base.name() {
                return Ok(None);
            }
            debug!(actor_id = %self.base.id, "Magentic participant speaking");
            let steer = ChatMessage::user(format!(
                "Transferred to {}, adopt the persona immediately.",
                self.base.name()
            ));
            let response = self.base.invoke(vec![steer]).await?;
            self.base
                .publish(payload(MagenticResponse { body: response }), &ctx.cancellation_token)
                .await?;
            Ok(None)
        })
    }

    fn on_reset<'a>(
        &'a mut self,
        _message: Arc<MagenticReset>,
        _ctx: MessageContext,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            debug!(actor_id = %self.base.id, "Resetting participant conversation");
            self.base.reset();
            Ok(None)
        })
    }
}

#[async_trait]
impl BaseActor for MagenticAgentActor {
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

/// Outcome of one inner-loop round
enum Round {
    /// A speaker was asked to act
    Continue,
    Completed,
    Replan,
}

struct MagenticManagerActor {
    id: AgentId,
    runtime: RuntimeHandle,
    internal_topic_type: String,
    manager: Arc<dyn MagenticManager>,
    participants: Vec<Participant>,
    reporter: ResultReporter<ChatMessage>,
    history: ChatHistory,
    task: Option<ChatMessage>,
    facts: Option<ChatMessage>,
    plan: Option<ChatMessage>,
    round_count: usize,
    stall_count: usize,
    handlers: Arc<MessageHandlers<Self>>,
}

impl MagenticManagerActor {
    fn new(
        id: AgentId,
        runtime: RuntimeHandle,
        internal_topic_type: String,
        manager: Arc<dyn MagenticManager>,
        participants: Vec<Participant>,
        reporter: ResultReporter<ChatMessage>,
    ) -> Self {
        Self {
            id,
            runtime,
            internal_topic_type,
            manager,
            participants,
            reporter,
            history: ChatHistory::new(),
            task: None,
            facts: None,
            plan: None,
            round_count: 0,
            stall_count: 0,
            handlers: Arc::new(
                MessageHandlers::new()
                    .on::<MagenticStart>(Self::on_start)
                    .on::<MagenticResponse>(Self::on_response),
            ),
        }
    }

    fn on_start<'a>(
        &'a mut self,
        message: Arc<MagenticStart>,
        ctx: MessageContext,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let outcome = self.begin(message.body.clone(), &ctx.cancellation_token).await;
            self.settle(outcome)
        })
    }

    fn on_response<'a>(
        &'a mut self,
        message: Arc<MagenticResponse>,
        ctx: MessageContext,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            if message.body.role != AuthorRole::User {
                let speaker = message.body.name.as_deref().unwrap_or("unknown");
                self.history
                    .add_message(ChatMessage::user(format!("Transferred to {speaker}")));
            }
            self.history.add_message(message.body.clone());

            let outcome = match self.run_inner_loop(&ctx.cancellation_token).await {
                Ok(Round::Replan) => self.run_outer_loop(&ctx.cancellation_token).await,
                Ok(_) => Ok(()),
                Err(e) => Err(e),
            };
            self.settle(outcome)
        })
    }

    fn settle(&self, outcome: Result<(), RuntimeError>) -> HandlerResult {
        match outcome {
            Ok(()) => Ok(None),
            Err(e) => {
                report_failure(&self.reporter, &self.id, &e);
                Err(e)
            }
        }
    }

    async fn begin(&mut self, task: ChatMessage, token: &CancellationToken) -> Result<(), RuntimeError> {
        let (facts, plan) = self
            .manager
            .create_facts_and_plan(&self.history, &task, &self.participants, None)
            .await
            .map_err(|e| handler_error(&self.id, e))?;
        self.task = Some(task);
        self.facts = Some(facts);
        self.plan = Some(plan);
        self.run_outer_loop(token).await
    }

    fn planning_state(&self) -> Result<(&ChatMessage, &ChatMessage, &ChatMessage), RuntimeError> {
        match (&self.task, &self.facts, &self.plan) {
            (Some(task), Some(facts), Some(plan)) => Ok((task, facts, plan)),
            _ => Err(RuntimeError::handler_failed(
                &self.id,
                "manager received a turn before the start message",
            )),
        }
    }

    /// Broadcast a fresh task ledger and run rounds until a round asks a
    /// speaker to act or finishes the task
    async fn run_outer_loop(&mut self, token: &CancellationToken) -> Result<(), RuntimeError> {
        loop {
            let ledger = {
                let (task, facts, plan) = self.planning_state()?;
                self.manager
                    .create_task_ledger(task, facts, plan, &self.participants)
                    .await
                    .map_err(|e| handler_error(&self.id, e))?
            };
            debug!(actor_id = %self.id, "Broadcasting task ledger");

            // the manager does not receive its own broadcast
            let ledger = ChatMessage::assistant(ledger).with_name(MANAGER_MESSAGE_NAME);
            self.history.add_message(ledger.clone());
            self.publish(payload(MagenticResponse { body: ledger }), token).await?;

            match self.run_inner_loop(token).await? {
                Round::Replan => continue,
                Round::Continue | Round::Completed => return Ok(()),
            }
        }
    }

    async fn run_inner_loop(&mut self, token: &CancellationToken) -> Result<Round, RuntimeError> {
        self.round_count += 1;
        let ledger = {
            let (task, _, _) = self.planning_state()?;
            self.manager
                .create_progress_ledger(&self.history, task, &self.participants)
                .await
                .map_err(|e| handler_error(&self.id, e))?
        };
        debug!(actor_id = %self.id, round = self.round_count, ledger = ?ledger, "Progress ledger");

        if ledger.is_request_satisfied.answer {
            self.prepare_final_answer().await?;
            return Ok(Round::Completed);
        }

        if !ledger.is_progress_being_made.answer || ledger.is_in_loop.answer {
            self.stall_count += 1;
        } else {
            self.stall_count = self.stall_count.saturating_sub(1);
        }

        if self.stall_count > self.manager.max_stall_count() {
            warn!(actor_id = %self.id, stalls = self.stall_count, "Stall detected, re-planning");
            let (facts, plan) = {
                let (task, facts, _) = self.planning_state()?;
                self.manager
                    .create_facts_and_plan(&self.history, task, &self.participants, Some(facts))
                    .await
                    .map_err(|e| handler_error(&self.id, e))?
            };
            self.facts = Some(facts);
            self.plan = Some(plan);
            self.reset(token).await?;
            return Ok(Round::Replan);
        }

        let next_speaker = ledger.next_speaker.answer;
        if !self.participants.iter().any(|p| p.name == next_speaker) {
            return Err(RuntimeError::handler_failed(
                &self.id,
                format!("unknown speaker '{next_speaker}'"),
            ));
        }

        let instruction = ChatMessage::assistant(ledger.instruction_or_question.answer)
            .with_name(MANAGER_MESSAGE_NAME);
        self.history.add_message(instruction.clone());
        self.publish(payload(MagenticResponse { body: instruction }), token).await?;

        debug!(actor_id = %self.id, next = %next_speaker, "Magentic manager selected speaker");
        self.publish(payload(MagenticRequest { agent_name: next_speaker }), token)
            .await?;
        Ok(Round::Continue)
    }

    async fn reset(&mut self, token: &CancellationToken) -> Result<(), RuntimeError> {
        self.publish(payload(MagenticReset), token).await?;
        self.history.clear();
        self.stall_count = 0;
        Ok(())
    }

    async fn prepare_final_answer(&mut self) -> Result<(), RuntimeError> {
        let answer = {
            let (task, _, _) = self.planning_state()?;
            self.manager
                .prepare_final_answer(&self.history, task)
                .await
                .map_err(|e| handler_error(&self.id, e))?
        };
        info!(actor_id = %self.id, rounds = self.round_count, "Magentic orchestration completed");
        self.reporter.complete(answer);
        Ok(())
    }

    async fn publish(&self, message: Payload, token: &CancellationToken) -> Result<(), RuntimeError> {
        publish_internal(&self.runtime, &self.id, &self.internal_topic_type, message, token).await
    }
}

#[async_trait]
impl BaseActor for MagenticManagerActor {
    fn description(&self) -> &str {
        "Magentic manager"
    }

    async fn on_message(&mut self, message: Payload, ctx: MessageContext) -> HandlerResult {
        let handlers = Arc::clone(&self.handlers);
        handlers.dispatch(self, message, ctx).await
    }
}
