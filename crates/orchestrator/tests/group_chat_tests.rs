#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

// Integration tests for the group chat pattern: round robin turn taking,
// human input and manager decisions that name unknown speakers

mod common;

use agent_runtime::CoreRuntime;
use async_trait::async_trait;
use common::*;
use kernel_core::{Agent, AuthorRole, ChatHistory, ChatMessage};
use orchestrator::{
    GroupChatManager, GroupChatPattern, ManagerDecision, Orchestration, OrchestrationError,
    Participant, RoundRobinGroupChatManager,
};
use parking_lot::Mutex;
use rstest::*;
use std::sync::Arc;

#[fixture]
fn runtime() -> CoreRuntime {
    started_runtime()
}

/// Round robin that asks the human once, after the first agent turn
struct AskOnceManager {
    inner: RoundRobinGroupChatManager,
    asked: bool,
}

#[async_trait]
impl GroupChatManager for AskOnceManager {
    async fn should_request_user_input(
        &mut self,
        history: &ChatHistory,
    ) -> anyhow::Result<ManagerDecision<bool>> {
        let ask = !self.asked && history.len() == 2;
        self.asked |= ask;
        Ok(ManagerDecision::new(ask, "first answer needs a review"))
    }

    async fn should_terminate(&mut self, history: &ChatHistory) -> anyhow::Result<ManagerDecision<bool>> {
        self.inner.should_terminate(history).await
    }

    async fn select_next_agent(
        &mut self,
        history: &ChatHistory,
        participants: &[Participant],
    ) -> anyhow::Result<ManagerDecision<String>> {
        self.inner.select_next_agent(history, participants).await
    }

    async fn filter_results(&mut self, history: &ChatHistory) -> anyhow::Result<ManagerDecision<ChatMessage>> {
        self.inner.filter_results(history).await
    }
}

/// Always picks a speaker that is not in the chat
struct GhostManager;

#[async_trait]
impl GroupChatManager for GhostManager {
    async fn should_terminate(&mut self, _history: &ChatHistory) -> anyhow::Result<ManagerDecision<bool>> {
        Ok(ManagerDecision::new(false, "keep going"))
    }

    async fn select_next_agent(
        &mut self,
        _history: &ChatHistory,
        _participants: &[Participant],
    ) -> anyhow::Result<ManagerDecision<String>> {
        Ok(ManagerDecision::new("ghost".to_string(), "nobody else is left"))
    }

    async fn filter_results(&mut self, history: &ChatHistory) -> anyhow::Result<ManagerDecision<ChatMessage>> {
        Ok(ManagerDecision::new(
            history.last().cloned().unwrap_or_else(|| ChatMessage::assistant("")),
            "last message",
        ))
    }
}

#[rstest]
#[tokio::test]
async fn test_round_robin_takes_turns_until_limit(runtime: CoreRuntime) {
    // Arrange
    let a = ConcatAgent::new("A");
    let b = ConcatAgent::new("B");
    let members = as_agents([
        Arc::clone(&a) as Arc<dyn Agent>,
        Arc::clone(&b) as Arc<dyn Agent>,
    ]);
    let pattern = GroupChatPattern::new(members, || RoundRobinGroupChatManager::new(Some(3))).unwrap();
    let orchestration = Orchestration::new(pattern);

    // Act
    let result = orchestration.invoke("task".to_string(), &runtime).await.unwrap();
    let output = result.get(Some(WAIT)).await.unwrap();

    // Assert
    assert_eq!(output.content, "task|A|B|A");
    assert_eq!(a.inputs().len(), 2);
    assert_eq!(b.inputs().len(), 1);
    let b_input = &b.inputs()[0];
    assert_eq!(b_input.len(), 2);
    assert_eq!(b_input[1].name.as_deref(), Some("A"));
}

#[rstest]
#[tokio::test]
async fn test_each_invocation_gets_a_fresh_manager(runtime: CoreRuntime) {
    // Arrange
    let members = as_agents([
        ConcatAgent::new("A") as Arc<dyn Agent>,
        ConcatAgent::new("B") as Arc<dyn Agent>,
    ]);
    let pattern = GroupChatPattern::new(members, || RoundRobinGroupChatManager::new(Some(1))).unwrap();
    let orchestration = Orchestration::new(pattern)
        .with_output_transform(|message: ChatMessage| Ok(message.content));

    // Act
    let first = orchestration.invoke("one".to_string(), &runtime).await.unwrap();
    let second = orchestration.invoke("two".to_string(), &runtime).await.unwrap();

    // Assert
    assert_eq!(first.get(Some(WAIT)).await.unwrap(), "one|A");
    assert_eq!(second.get(Some(WAIT)).await.unwrap(), "two|A");
}

#[rstest]
#[tokio::test]
async fn test_human_reply_joins_conversation(runtime: CoreRuntime) {
    // Arrange
    let asked_with = Arc::new(Mutex::new(None));
    let log = Arc::clone(&asked_with);
    let a = ConcatAgent::new("A");
    let b = ConcatAgent::new("B");
    let members = as_agents([
        Arc::clone(&a) as Arc<dyn Agent>,
        Arc::clone(&b) as Arc<dyn Agent>,
    ]);
    let pattern = GroupChatPattern::new(members, || AskOnceManager {
        inner: RoundRobinGroupChatManager::new(Some(2)),
        asked: false,
    })
    .unwrap()
    .with_human_response(move |history: ChatHistory| {
        let log = Arc::clone(&log);
        async move {
            *log.lock() = Some(history.len());
            Ok::<_, anyhow::Error>(ChatMessage::assistant("human"))
        }
    });
    let orchestration = Orchestration::new(pattern);

    // Act
    let result = orchestration.invoke("task".to_string(), &runtime).await.unwrap();
    let output = result.get(Some(WAIT)).await.unwrap();

    // Assert
    assert_eq!(*asked_with.lock(), Some(2));
    assert_eq!(output.content, "human|B");
    let b_input = &b.inputs()[0];
    let human = b_input.last().unwrap();
    assert_eq!(human.content, "human");
    assert_eq!(human.role, AuthorRole::User);
}

#[rstest]
#[tokio::test]
async fn test_unknown_speaker_fails_result(runtime: CoreRuntime) {
    // Arrange
    let members = as_agents([ConcatAgent::new("A") as Arc<dyn Agent>]);
    let orchestration = Orchestration::new(GroupChatPattern::new(members, || GhostManager).unwrap());

    // Act
    let result = orchestration.invoke("task".to_string(), &runtime).await.unwrap();
    let outcome = result.get(Some(WAIT)).await;

    // Assert
    match outcome {
        Err(OrchestrationError::Failed(message)) => assert!(message.contains("ghost")),
        other => panic!("expected failure, got {other:?}"),
    }
}
