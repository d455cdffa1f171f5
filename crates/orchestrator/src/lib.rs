//! Multi-Agent Orchestration Patterns
//!
//! This crate builds agent orchestrations on top of the in-process actor
//! runtime from `agent_runtime`. Each pattern registers one actor per member
//! (plus collector or manager actors) under a fresh internal topic, injects
//! the task and reports the outcome through an [`OrchestrationResult`].
//!
//! # Architecture
//!
//! - **Orchestration**: pattern + input/output transforms + callbacks; `invoke`
//!   returns immediately with a result handle
//! - **OrchestrationResult**: cached, non-consuming result with cancel and
//!   timeout
//! - **SequentialPattern**: members chained, each answering its predecessor
//! - **ConcurrentPattern**: the same task fanned out, answers collected under
//!   a [`CollectionPolicy`]
//! - **HandoffPattern**: agents pass control along an [`OrchestrationHandoffs`]
//!   graph
//! - **GroupChatPattern**: a [`GroupChatManager`] picks speakers turn by turn
//! - **MagenticPattern**: a [`MagenticManager`] plans, tracks progress and
//!   re-plans on stalls
//!
//! # Usage
//!
//! ```no_run
//! use agent_runtime::CoreRuntime;
//! use kernel_core::Agent;
//! use orchestrator::{Orchestration, SequentialPattern};
//! use std::sync::Arc;
//!
//! async fn run(members: Vec<Arc<dyn Agent>>) -> anyhow::Result<()> {
//!     let runtime = CoreRuntime::default();
//!     runtime.start();
//!
//!     let orchestration = Orchestration::new(SequentialPattern::new(members)?)
//!         .with_output_transform(|message| Ok(message.content));
//!     let result = orchestration.invoke("Draft a release note".to_string(), &runtime).await?;
//!     println!("{}", result.get(None).await?);
//!
//!     runtime.stop_when_idle().await?;
//!     Ok(())
//! }
//! ```

pub mod actor_base;
pub mod base;
pub mod concurrent;
pub mod config;
pub mod error;
pub mod group_chat;
pub mod handoff;
pub mod magentic;
pub mod result;
pub mod sequential;

pub use actor_base::AgentActorBase;
pub use base::{
    AgentCallbacks, AgentResponseCallback, InputTransform, Orchestration, OrchestrationPattern,
    OutputTransform, PatternContext, ResultReporter, StreamingAgentResponseCallback,
};
pub use concurrent::ConcurrentPattern;
pub use config::{CollectionPolicy, OrchestrationConfig};
pub use error::OrchestrationError;
pub use group_chat::{
    GroupChatManager, GroupChatPattern, ManagerDecision, Participant, RoundRobinGroupChatManager,
};
pub use handoff::{HandoffPattern, OrchestrationHandoffs, HANDOFF_TO_KEY, TASK_COMPLETED_KEY};
pub use magentic::{LedgerItem, MagenticManager, MagenticPattern, ProgressLedger};
pub use result::{OrchestrationResult, ResultSetter, ResultState};
pub use sequential::SequentialPattern;

use kernel_core::Agent;
use std::collections::HashSet;
use std::sync::Arc;

/// Members must be non-empty and uniquely named; names become actor types
pub(crate) fn validate_members(members: &[Arc<dyn Agent>]) -> Result<(), OrchestrationError> {
    if members.is_empty() {
        return Err(OrchestrationError::InvalidConfiguration(
            "an orchestration needs at least one member".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for agent in members {
        if agent.name().is_empty() {
            return Err(OrchestrationError::InvalidConfiguration(
                "member names must not be empty".to_string(),
            ));
        }
        if !seen.insert(agent.name()) {
            return Err(OrchestrationError::InvalidConfiguration(format!(
                "duplicate member name '{}'",
                agent.name()
            )));
        }
    }
    Ok(())
}
