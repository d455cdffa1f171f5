#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

// Integration tests for the magentic pattern with a scripted manager:
// planning, speaker instructions, stall driven re-planning and failures

mod common;

use agent_runtime::CoreRuntime;
use async_trait::async_trait;
use common::*;
use kernel_core::{Agent, AgentResponse, AgentThread, ChatHistory, ChatMessage};
use orchestrator::{
    LedgerItem, MagenticManager, MagenticPattern, Orchestration, OrchestrationError, Participant,
    ProgressLedger,
};
use parking_lot::Mutex;
use rstest::*;
use std::collections::VecDeque;
use std::sync::Arc;

#[fixture]
fn runtime() -> CoreRuntime {
    started_runtime()
}

fn ledger(satisfied: bool, progress: bool, next: &str, instruction: &str) -> ProgressLedger {
    ProgressLedger {
        is_request_satisfied: LedgerItem::new(satisfied, "scripted"),
        is_in_loop: LedgerItem::new(false, "scripted"),
        is_progress_being_made: LedgerItem::new(progress, "scripted"),
        next_speaker: LedgerItem::new(next.to_string(), "scripted"),
        instruction_or_question: LedgerItem::new(instruction.to_string(), "scripted"),
    }
}

fn done() -> ProgressLedger {
    ledger(true, true, "", "")
}

#[derive(Default)]
struct Calls {
    plans: Vec<Option<String>>,
    task_ledgers: usize,
    progress_ledgers: usize,
}

/// Replays progress ledgers and records what it was asked
struct ScriptedManager {
    ledgers: Mutex<VecDeque<ProgressLedger>>,
    max_stalls: usize,
    calls: Mutex<Calls>,
}

impl ScriptedManager {
    fn new(ledgers: Vec<ProgressLedger>, max_stalls: usize) -> Arc<Self> {
        Arc::new(Self {
            ledgers: Mutex::new(ledgers.into()),
            max_stalls,
            calls: Mutex::default(),
        })
    }
}

#[async_trait]
impl MagenticManager for ScriptedManager {
    fn max_stall_count(&self) -> usize {
        self.max_stalls
    }

    async fn create_facts_and_plan(
        &self,
        _history: &ChatHistory,
        task: &ChatMessage,
        _participants: &[Participant],
        old_facts: Option<&ChatMessage>,
    ) -> anyhow::Result<(ChatMessage, ChatMessage)> {
        let mut calls = self.calls.lock();
        calls.plans.push(old_facts.map(|f| f.content.clone()));
        let round = calls.plans.len();
        Ok((
            ChatMessage::assistant(format!("facts {round} about {}", task.content)),
            ChatMessage::assistant(format!("plan {round}")),
        ))
    }

    async fn create_task_ledger(
        &self,
        task: &ChatMessage,
        facts: &ChatMessage,
        plan: &ChatMessage,
        participants: &[Participant],
    ) -> anyhow::Result<String> {
        self.calls.lock().task_ledgers += 1;
        let team: Vec<&str> = participants.iter().map(|p| p.name.as_str()).collect();
        Ok(format!(
            "Task: {}\nTeam: {}\n{}\n{}",
            task.content,
            team.join(", "),
            facts.content,
            plan.content
        ))
    }

    async fn create_progress_ledger(
        &self,
        _history: &ChatHistory,
        _task: &ChatMessage,
        _participants: &[Participant],
    ) -> anyhow::Result<ProgressLedger> {
        self.calls.lock().progress_ledgers += 1;
        self.ledgers
            .lock()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("script exhausted"))
    }

    async fn prepare_final_answer(&self, history: &ChatHistory, _task: &ChatMessage) -> anyhow::Result<ChatMessage> {
        let last = history.last().map(|m| m.content.clone()).unwrap_or_default();
        Ok(ChatMessage::assistant(format!("final: {last}")))
    }
}

struct Undescribed;

#[async_trait]
impl Agent for Undescribed {
    fn name(&self) -> &str {
        "mystery"
    }

    async fn get_response(
        &self,
        _messages: Vec<ChatMessage>,
        _thread: Option<AgentThread>,
    ) -> anyhow::Result<AgentResponse> {
        Ok(AgentResponse::new(ChatMessage::assistant("?")))
    }
}

#[rstest]
#[tokio::test]
async fn test_manager_instructs_speaker_then_answers(runtime: CoreRuntime) {
    // Arrange
    let researcher = ScriptedAgent::new("researcher", vec![ChatMessage::assistant("found it")]);
    let manager = ScriptedManager::new(
        vec![ledger(false, true, "researcher", "look it up"), done()],
        3,
    );
    let members = as_agents([Arc::clone(&researcher) as Arc<dyn Agent>]);
    let orchestration = Orchestration::new(
        MagenticPattern::new(members, Arc::clone(&manager) as Arc<dyn MagenticManager>).unwrap(),
    );

    // Act
    let result = orchestration.invoke("find the answer".to_string(), &runtime).await.unwrap();
    let output = result.get(Some(WAIT)).await.unwrap();

    // Assert
    assert_eq!(output.content, "final: found it");
    assert_eq!(researcher.calls(), 1);

    let input = researcher.last_input();
    let contents: Vec<&str> = input.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents.first(), Some(&"find the answer"));
    assert!(contents.contains(&"look it up"));
    assert_eq!(
        contents.last(),
        Some(&"Transferred to researcher, adopt the persona immediately.")
    );

    let calls = manager.calls.lock();
    assert_eq!(calls.plans, vec![None]);
    assert_eq!(calls.task_ledgers, 1);
    assert_eq!(calls.progress_ledgers, 2);
}

#[rstest]
#[tokio::test]
async fn test_stall_triggers_replan_with_old_facts(runtime: CoreRuntime) {
    // Arrange
    let researcher = ScriptedAgent::new("researcher", Vec::new());
    let manager = ScriptedManager::new(
        vec![ledger(false, false, "researcher", "try again"), done()],
        0,
    );
    let members = as_agents([Arc::clone(&researcher) as Arc<dyn Agent>]);
    let orchestration = Orchestration::new(
        MagenticPattern::new(members, Arc::clone(&manager) as Arc<dyn MagenticManager>).unwrap(),
    );

    // Act
    let result = orchestration.invoke("stuck task".to_string(), &runtime).await.unwrap();
    let output = result.get(Some(WAIT)).await.unwrap();

    // Assert
    assert!(output.content.starts_with("final: Task: stuck task"));
    assert!(output.content.contains("plan 2"));
    assert_eq!(researcher.calls(), 0);

    let calls = manager.calls.lock();
    assert_eq!(
        calls.plans,
        vec![None, Some("facts 1 about stuck task".to_string())]
    );
    assert_eq!(calls.task_ledgers, 2);
}

#[rstest]
#[tokio::test]
async fn test_unknown_speaker_fails_result(runtime: CoreRuntime) {
    // Arrange
    let manager = ScriptedManager::new(vec![ledger(false, true, "nobody", "hello?")], 3);
    let members = as_agents([ScriptedAgent::new("researcher", Vec::new()) as Arc<dyn Agent>]);
    let orchestration =
        Orchestration::new(MagenticPattern::new(members, manager as Arc<dyn MagenticManager>).unwrap());

    // Act
    let result = orchestration.invoke("task".to_string(), &runtime).await.unwrap();
    let outcome = result.get(Some(WAIT)).await;

    // Assert
    match outcome {
        Err(OrchestrationError::Failed(message)) => assert!(message.contains("unknown speaker 'nobody'")),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[rstest]
#[tokio::test]
async fn test_multiple_task_messages_are_rejected(runtime: CoreRuntime) {
    // Arrange
    let manager = ScriptedManager::new(vec![done()], 3);
    let members = as_agents([ScriptedAgent::new("researcher", Vec::new()) as Arc<dyn Agent>]);
    let orchestration =
        Orchestration::new(MagenticPattern::new(members, manager as Arc<dyn MagenticManager>).unwrap())
            .with_input_transform(|task: String| {
                Ok(vec![ChatMessage::user(task.clone()), ChatMessage::user(task)])
            });

    // Act
    let result = orchestration.invoke("twice".to_string(), &runtime).await.unwrap();
    let outcome = result.get(Some(WAIT)).await;

    // Assert
    assert!(matches!(outcome, Err(OrchestrationError::Failed(_))));
}

#[test]
fn test_members_need_descriptions() {
    let manager = ScriptedManager::new(Vec::new(), 3);
    let members = as_agents([Arc::new(Undescribed) as Arc<dyn Agent>]);

    let outcome = MagenticPattern::new(members, manager as Arc<dyn MagenticManager>);

    assert!(matches!(
        outcome,
        Err(OrchestrationError::InvalidConfiguration(_))
    ));
}
