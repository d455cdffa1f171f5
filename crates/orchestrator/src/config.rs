use common::env_override;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the concurrent pattern treats a member that fails before answering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionPolicy {
    /// Wait for every member; a failure is only logged and the result never
    /// completes, so callers observe a timeout
    #[default]
    RequireAll,
    /// The first member failure fails the whole result
    FailFast,
    /// Failed members count toward the expected total; the result carries the
    /// successful responses only
    BestEffort,
}

impl std::str::FromStr for CollectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "require_all" => Ok(CollectionPolicy::RequireAll),
            "fail_fast" => Ok(CollectionPolicy::FailFast),
            "best_effort" => Ok(CollectionPolicy::BestEffort),
            other => Err(format!("unknown collection policy: {other}")),
        }
    }
}

/// Settings shared by every orchestration pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OrchestrationConfig {
    /// Applied by `OrchestrationResult::get(None)`; `None` waits indefinitely
    pub default_timeout_ms: Option<u64>,

    /// Concurrent pattern failure handling
    pub collection_policy: CollectionPolicy,
}

impl OrchestrationConfig {
    /// Apply `SK_ORCHESTRATION_TIMEOUT_MS` and `SK_ORCHESTRATION_COLLECTION_POLICY`
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(timeout) = env_override::<u64>("ORCHESTRATION_TIMEOUT_MS") {
            self.default_timeout_ms = Some(timeout);
        }
        if let Some(policy) = env_override::<CollectionPolicy>("ORCHESTRATION_COLLECTION_POLICY") {
            self.collection_policy = policy;
        }
        self
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }
}
