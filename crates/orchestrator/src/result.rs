//! Future-like handle to an orchestration's eventual output

use crate::error::OrchestrationError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Lifecycle of one invocation's result
#[derive(Debug, Clone, PartialEq)]
pub enum ResultState<T> {
    Pending,
    Completed(T),
    Cancelled,
    Failed(String),
}

impl<T> ResultState<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, ResultState::Pending)
    }
}

/// Handle returned by `Orchestration::invoke`.
///
/// The value is cached once set: `get` may be called any number of times, and
/// a timed-out `get` leaves the computation running.
pub struct OrchestrationResult<T> {
    state: Arc<watch::Sender<ResultState<T>>>,
    cancellation_token: CancellationToken,
    default_timeout: Option<Duration>,
}

impl<T> Clone for OrchestrationResult<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            cancellation_token: self.cancellation_token.clone(),
            default_timeout: self.default_timeout,
        }
    }
}

/// Write side of an [`OrchestrationResult`]; only the first outcome sticks
pub struct ResultSetter<T> {
    state: Arc<watch::Sender<ResultState<T>>>,
}

impl<T> Clone for ResultSetter<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> OrchestrationResult<T> {
    pub fn new(default_timeout: Option<Duration>) -> (Self, ResultSetter<T>) {
        let (tx, _rx) = watch::channel(ResultState::Pending);
        let state = Arc::new(tx);
        let result = Self {
            state: Arc::clone(&state),
            cancellation_token: CancellationToken::new(),
            default_timeout,
        };
        (result, ResultSetter { state })
    }

    /// Token threaded through every message of this invocation
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub fn state(&self) -> ResultState<T> {
        self.state.borrow().clone()
    }

    pub fn is_done(&self) -> bool {
        !self.state.borrow().is_pending()
    }

    /// Wait for the outcome.
    ///
    /// `timeout = None` falls back to the configured default timeout, and
    /// waits indefinitely when there is none. A timeout has no effect on the
    /// running orchestration.
    pub async fn get(&self, timeout: Option<Duration>) -> Result<T, OrchestrationError> {
        let mut rx = self.state.subscribe();
        let wait = async move {
            rx.wait_for(|state| !state.is_pending())
                .await
                .map(|state| state.clone())
                .map_err(|_| OrchestrationError::InvalidState("result channel closed".to_string()))
        };

        let outcome = match timeout.or(self.default_timeout) {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| OrchestrationError::Timeout(limit))??,
            None => wait.await?,
        };

        match outcome {
            ResultState::Completed(value) => Ok(value),
            ResultState::Cancelled => Err(OrchestrationError::Cancelled),
            ResultState::Failed(message) => Err(OrchestrationError::Failed(message)),
            ResultState::Pending => Err(OrchestrationError::InvalidState(
                "result still pending".to_string(),
            )),
        }
    }

    /// Cancel a pending invocation.
    ///
    /// Fails with [`OrchestrationError::InvalidState`] once the result is
    /// completed, failed or already cancelled.
    pub fn cancel(&self) -> Result<(), OrchestrationError> {
        let cancelled = self.state.send_if_modified(|state| {
            if state.is_pending() {
                *state = ResultState::Cancelled;
                true
            } else {
                false
            }
        });
        if !cancelled {
            return Err(OrchestrationError::InvalidState(
                "cannot cancel an orchestration that is no longer pending".to_string(),
            ));
        }
        self.cancellation_token.cancel();
        debug!("Orchestration cancelled");
        Ok(())
    }
}

impl<T> ResultSetter<T> {
    /// Record the value; returns `false` if an outcome was already recorded
    pub fn set_result(&self, value: T) -> bool {
        let mut value = Some(value);
        self.state.send_if_modified(|state| match (state.is_pending(), value.take()) {
            (true, Some(value)) => {
                *state = ResultState::Completed(value);
                true
            }
            _ => false,
        })
    }

    /// Record a failure; returns `false` if an outcome was already recorded
    pub fn set_failed(&self, message: impl Into<String>) -> bool {
        let message = message.into();
        self.state.send_if_modified(|state| {
            if state.is_pending() {
                *state = ResultState::Failed(message);
                true
            } else {
                false
            }
        })
    }

    pub fn is_pending(&self) -> bool {
        self.state.borrow().is_pending()
    }
}
