use common::{env_override, env_override_u64};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the in-process runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Log a warning once an actor's mailbox holds more messages than this; 0 disables
    pub mailbox_warn_depth: usize,

    /// How long `stop` waits for actor tasks to wind down
    pub shutdown_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mailbox_warn_depth: 1_000,
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl RuntimeConfig {
    /// Apply `SK_RUNTIME_MAILBOX_WARN_DEPTH` and `SK_RUNTIME_SHUTDOWN_TIMEOUT_MS`
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(depth) = env_override("RUNTIME_MAILBOX_WARN_DEPTH") {
            self.mailbox_warn_depth = depth;
        }
        env_override_u64(&mut self.shutdown_timeout_ms, "RUNTIME_SHUTDOWN_TIMEOUT_MS");
        self
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
