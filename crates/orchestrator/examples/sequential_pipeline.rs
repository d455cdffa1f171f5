#![allow(clippy::uninlined_format_args)]
//! Sequential Pipeline Example
//!
//! A three-stage writing pipeline (outline, draft, review) run as a
//! sequential orchestration on the in-process actor runtime. The stages are
//! plain functions over text, so the example runs without any model service.
//! It shows member registration, the response callback, the output transform
//! and runtime shutdown.

use agent_runtime::CoreRuntime;
use async_trait::async_trait;
use common::{init_structured_logging, LoggingConfig};
use kernel_core::{Agent, AgentResponse, AgentThread, ChatMessage};
use orchestrator::{Orchestration, SequentialPattern};
use std::sync::Arc;
use std::time::Duration;

/// One pipeline stage that rewrites the text it receives
struct Stage {
    name: &'static str,
    description: &'static str,
    rewrite: fn(&str) -> String,
}

#[async_trait]
impl Agent for Stage {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> Option<&str> {
        Some(self.description)
    }

    async fn get_response(
        &self,
        messages: Vec<ChatMessage>,
        _thread: Option<AgentThread>,
    ) -> anyhow::Result<AgentResponse> {
        let input = messages.last().map(|m| m.content.as_str()).unwrap_or_default();
        Ok(AgentResponse::new(ChatMessage::assistant((self.rewrite)(input))))
    }
}

fn outline(topic: &str) -> String {
    format!("Outline for '{}':\n1. Context\n2. Change\n3. Impact", topic)
}

fn draft(outline: &str) -> String {
    let sections: Vec<&str> = outline.lines().skip(1).collect();
    format!("Draft covering {} sections: {}", sections.len(), sections.join(" / "))
}

fn review(draft: &str) -> String {
    format!("Reviewed: {} (approved)", draft)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_structured_logging(LoggingConfig::default())?;

    println!("Sequential Pipeline Demo");
    println!("========================\n");

    let members: Vec<Arc<dyn Agent>> = vec![
        Arc::new(Stage {
            name: "outliner",
            description: "Turns a topic into an outline",
            rewrite: outline,
        }),
        Arc::new(Stage {
            name: "writer",
            description: "Expands an outline into a draft",
            rewrite: draft,
        }),
        Arc::new(Stage {
            name: "reviewer",
            description: "Approves or rejects a draft",
            rewrite: review,
        }),
    ];

    let runtime = CoreRuntime::default();
    runtime.start();

    let orchestration = Orchestration::new(SequentialPattern::new(members)?)
        .with_agent_response_callback(|message: ChatMessage| async move {
            println!(
                "[{}] {}",
                message.name.as_deref().unwrap_or("agent"),
                message.content
            );
            Ok::<_, anyhow::Error>(())
        })
        .with_output_transform(|message: ChatMessage| Ok(message.content));

    let result = orchestration
        .invoke("the new release pipeline".to_string(), &runtime)
        .await?;
    let output = result.get(Some(Duration::from_secs(10))).await?;

    println!("\nFinal output:\n{}", output);

    runtime.stop_when_idle().await?;
    println!("\nRuntime stopped");
    Ok(())
}
