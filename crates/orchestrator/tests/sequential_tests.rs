#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

// Integration tests for the sequential pattern and the orchestration result
// lifecycle: chaining, callbacks, streaming, cancel and timeout semantics

mod common;

use agent_runtime::{CoreRuntime, RuntimeError};
use common::*;
use kernel_core::{Agent, ChatMessage, StreamingChatMessage};
use orchestrator::{
    Orchestration, OrchestrationConfig, OrchestrationError, ResultState, SequentialPattern,
};
use parking_lot::Mutex;
use rstest::*;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

#[fixture]
fn runtime() -> CoreRuntime {
    started_runtime()
}

fn concat_chain(names: &[&str]) -> (Vec<Arc<ConcatAgent>>, Vec<Arc<dyn Agent>>) {
    let agents: Vec<Arc<ConcatAgent>> = names.iter().map(|name| ConcatAgent::new(name)).collect();
    let members = agents
        .iter()
        .map(|agent| Arc::clone(agent) as Arc<dyn Agent>)
        .collect();
    (agents, members)
}

#[rstest]
#[tokio::test]
async fn test_sequential_chains_each_member(runtime: CoreRuntime) {
    // Arrange
    let (agents, members) = concat_chain(&["A", "B", "C"]);
    let orchestration = Orchestration::new(SequentialPattern::new(members).unwrap())
        .with_output_transform(|message: ChatMessage| Ok(message.content));

    // Act
    let result = orchestration.invoke("start".to_string(), &runtime).await.unwrap();
    let output = result.get(Some(WAIT)).await.unwrap();

    // Assert
    assert_eq!(output, "start|A|B|C");
    let b_inputs = agents[1].inputs();
    assert_eq!(b_inputs.len(), 1);
    assert_eq!(b_inputs[0].last().unwrap().content, "start|A");
    assert_eq!(b_inputs[0].last().unwrap().name.as_deref(), Some("A"));
    assert_eq!(agents[0].inputs()[0][0].content, "start");
}

#[rstest]
#[tokio::test]
async fn test_result_get_is_repeatable(runtime: CoreRuntime) {
    // Arrange
    let (_, members) = concat_chain(&["A"]);
    let orchestration = Orchestration::new(SequentialPattern::new(members).unwrap());

    // Act
    let result = orchestration.invoke("task".to_string(), &runtime).await.unwrap();
    let first = result.get(Some(WAIT)).await.unwrap();
    let second = result.get(None).await.unwrap();

    // Assert
    assert_eq!(first, second);
    assert!(result.is_done());
    assert!(matches!(result.state(), ResultState::Completed(_)));
}

#[rstest]
#[tokio::test]
async fn test_response_callback_sees_every_member_in_order(runtime: CoreRuntime) {
    // Arrange
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let (_, members) = concat_chain(&["A", "B"]);
    let orchestration = Orchestration::new(SequentialPattern::new(members).unwrap())
        .with_agent_response_callback(move |message: ChatMessage| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push(message.name.unwrap_or_default());
                Ok::<_, anyhow::Error>(())
            }
        });

    // Act
    let result = orchestration.invoke("go".to_string(), &runtime).await.unwrap();
    result.get(Some(WAIT)).await.unwrap();

    // Assert
    assert_eq!(*seen.lock(), vec!["A".to_string(), "B".to_string()]);
}

#[rstest]
#[tokio::test]
async fn test_streaming_callback_marks_only_last_chunk_final(runtime: CoreRuntime) {
    // Arrange
    let chunks = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&chunks);
    let agent = StreamingAgent::new("writer", &["Hel", "lo"]);
    let orchestration = Orchestration::new(
        SequentialPattern::new(as_agents([agent as Arc<dyn Agent>])).unwrap(),
    )
    .with_streaming_callback(move |chunk: StreamingChatMessage, is_final: bool| {
        let log = Arc::clone(&log);
        async move {
            log.lock().push((chunk.content, is_final));
            Ok::<_, anyhow::Error>(())
        }
    });

    // Act
    let result = orchestration.invoke("say hello".to_string(), &runtime).await.unwrap();
    let output = result.get(Some(WAIT)).await.unwrap();

    // Assert
    assert_eq!(output.content, "Hello");
    assert_eq!(output.name.as_deref(), Some("writer"));
    assert_eq!(
        *chunks.lock(),
        vec![("Hel".to_string(), false), ("lo".to_string(), true)]
    );
}

#[rstest]
#[tokio::test]
async fn test_member_failure_fails_result(runtime: CoreRuntime) {
    // Arrange
    let members = as_agents([
        ConcatAgent::new("A") as Arc<dyn Agent>,
        FailingAgent::new("B") as Arc<dyn Agent>,
    ]);
    let orchestration = Orchestration::new(SequentialPattern::new(members).unwrap());

    // Act
    let result = orchestration.invoke("task".to_string(), &runtime).await.unwrap();
    let outcome = result.get(Some(WAIT)).await;

    // Assert
    match outcome {
        Err(OrchestrationError::Failed(message)) => assert!(message.contains("boom from B")),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[rstest]
#[tokio::test]
async fn test_timeout_does_not_cancel_invocation(runtime: CoreRuntime) {
    // Arrange
    let agent = GatedAgent::new("slow", "eventually");
    let orchestration = Orchestration::new(
        SequentialPattern::new(as_agents([Arc::clone(&agent) as Arc<dyn Agent>])).unwrap(),
    );
    let result = orchestration.invoke("task".to_string(), &runtime).await.unwrap();

    // Act
    let early = result.get(Some(Duration::from_millis(20))).await;
    agent.open();
    let late = result.get(Some(WAIT)).await;

    // Assert
    assert!(matches!(early, Err(OrchestrationError::Timeout(_))));
    assert_eq!(late.unwrap().content, "eventually");
}

#[rstest]
#[tokio::test]
async fn test_configured_default_timeout_applies(runtime: CoreRuntime) {
    // Arrange
    let agent = GatedAgent::new("slow", "never seen");
    let config = OrchestrationConfig {
        default_timeout_ms: Some(20),
        ..Default::default()
    };
    let orchestration = Orchestration::new(
        SequentialPattern::new(as_agents([Arc::clone(&agent) as Arc<dyn Agent>])).unwrap(),
    )
    .with_config(config);

    // Act
    let result = orchestration.invoke("task".to_string(), &runtime).await.unwrap();
    let outcome = result.get(None).await;

    // Assert
    assert!(matches!(
        outcome,
        Err(OrchestrationError::Timeout(limit)) if limit == Duration::from_millis(20)
    ));
    agent.open();
}

#[rstest]
#[tokio::test]
async fn test_cancel_pending_invocation(runtime: CoreRuntime) {
    // Arrange
    let agent = GatedAgent::new("slow", "too late");
    let orchestration = Orchestration::new(
        SequentialPattern::new(as_agents([Arc::clone(&agent) as Arc<dyn Agent>])).unwrap(),
    );
    let result = orchestration.invoke("task".to_string(), &runtime).await.unwrap();

    // Act
    result.cancel().unwrap();
    let second_cancel = result.cancel();
    agent.open();
    let outcome = result.get(Some(WAIT)).await;

    // Assert
    assert!(matches!(second_cancel, Err(OrchestrationError::InvalidState(_))));
    assert!(matches!(outcome, Err(OrchestrationError::Cancelled)));
    assert!(result.cancellation_token().is_cancelled());
    assert!(agent.calls.load(Ordering::SeqCst) <= 1);
}

#[rstest]
#[tokio::test]
async fn test_cancel_after_completion_is_rejected(runtime: CoreRuntime) {
    // Arrange
    let orchestration = Orchestration::new(
        SequentialPattern::new(as_agents([FixedAgent::new("A", "done") as Arc<dyn Agent>])).unwrap(),
    );
    let result = orchestration.invoke("task".to_string(), &runtime).await.unwrap();
    let output = result.get(Some(WAIT)).await.unwrap();

    // Act
    let cancel = result.cancel();

    // Assert
    assert!(matches!(cancel, Err(OrchestrationError::InvalidState(_))));
    assert_eq!(result.get(None).await.unwrap(), output);
}

#[rstest]
#[tokio::test]
async fn test_concurrent_invocations_are_isolated(runtime: CoreRuntime) {
    // Arrange
    let (_, members) = concat_chain(&["A", "B"]);
    let orchestration = Orchestration::new(SequentialPattern::new(members).unwrap())
        .with_output_transform(|message: ChatMessage| Ok(message.content));

    // Act
    let first = orchestration.invoke("one".to_string(), &runtime).await.unwrap();
    let second = orchestration.invoke("two".to_string(), &runtime).await.unwrap();

    // Assert
    assert_eq!(first.get(Some(WAIT)).await.unwrap(), "one|A|B");
    assert_eq!(second.get(Some(WAIT)).await.unwrap(), "two|A|B");
}

#[rstest]
#[tokio::test]
async fn test_input_transform_shapes_task(runtime: CoreRuntime) {
    // Arrange
    let (agents, members) = concat_chain(&["A"]);
    let orchestration = Orchestration::new(SequentialPattern::new(members).unwrap())
        .with_input_transform(|items: Vec<&'static str>| {
            Ok(items.into_iter().map(ChatMessage::user).collect())
        });

    // Act
    let result = orchestration.invoke(vec!["first", "second"], &runtime).await.unwrap();
    let output = result.get(Some(WAIT)).await.unwrap();

    // Assert
    assert_eq!(output.content, "second|A");
    assert_eq!(agents[0].inputs()[0].len(), 2);
}

#[rstest]
#[tokio::test]
async fn test_empty_input_is_rejected(runtime: CoreRuntime) {
    // Arrange
    let (_, members) = concat_chain(&["A"]);
    let orchestration = Orchestration::new(SequentialPattern::new(members).unwrap())
        .with_input_transform(|_: ()| Ok(Vec::new()));

    // Act
    let outcome = orchestration.invoke((), &runtime).await;

    // Assert
    assert!(matches!(outcome, Err(OrchestrationError::Transform(_))));
}

#[tokio::test]
async fn test_invoke_requires_running_runtime() {
    // Arrange
    let runtime = CoreRuntime::default();
    let (_, members) = concat_chain(&["A"]);
    let orchestration = Orchestration::new(SequentialPattern::new(members).unwrap());

    // Act
    let outcome = orchestration.invoke("task".to_string(), &runtime).await;

    // Assert
    assert!(matches!(
        outcome,
        Err(OrchestrationError::Runtime(RuntimeError::NotRunning))
    ));
}

#[rstest]
#[case::empty(&[])]
#[case::duplicate(&["A", "A"])]
fn test_member_validation(#[case] names: &[&str]) {
    let (_, members) = concat_chain(names);

    let outcome = SequentialPattern::new(members);

    assert!(matches!(
        outcome,
        Err(OrchestrationError::InvalidConfiguration(_))
    ));
}
