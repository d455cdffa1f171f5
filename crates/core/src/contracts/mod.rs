//! Capability contracts consumed by the orchestration layer

pub mod agent;
pub mod chat_completion;

pub use agent::{Agent, AgentResponse, AgentResponseStream, AgentStreamChunk, AgentThread};
pub use chat_completion::{ChatCompletion, PromptExecutionSettings};
