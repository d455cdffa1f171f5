//! Actor trait and mailbox lifecycle
//!
//! Every instantiated actor owns an unbounded mailbox drained by one task, so
//! an actor handles one message at a time and its state is never touched
//! concurrently.

use crate::error::RuntimeError;
use crate::ids::AgentId;
use crate::message::{HandlerResult, MessageContext, Payload};
use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Core trait that all runtime-hosted actors implement
#[async_trait]
pub trait BaseActor: Send + Sync + 'static {
    /// Human readable description reported by `agent_metadata`
    fn description(&self) -> &str {
        ""
    }

    /// Handle one delivered message
    async fn on_message(&mut self, message: Payload, ctx: MessageContext) -> HandlerResult;

    /// Opaque JSON checkpoint
    async fn save_state(&self) -> Result<Value, RuntimeError> {
        Ok(Value::Object(Default::default()))
    }

    async fn load_state(&mut self, _state: Value) -> Result<(), RuntimeError> {
        Ok(())
    }

    /// Called once when the runtime stops the actor
    async fn close(&mut self) {}
}

pub(crate) enum Envelope {
    Send {
        message: Payload,
        ctx: MessageContext,
        reply: oneshot::Sender<HandlerResult>,
    },
    Publish {
        message: Payload,
        ctx: MessageContext,
    },
    SaveState {
        reply: oneshot::Sender<Result<Value, RuntimeError>>,
    },
    LoadState {
        state: Value,
        reply: oneshot::Sender<Result<(), RuntimeError>>,
    },
}

/// Number of messages enqueued but not yet handled across the runtime
#[derive(Debug, Clone)]
pub(crate) struct InFlight {
    count: Arc<watch::Sender<usize>>,
}

impl InFlight {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { count: Arc::new(tx) }
    }

    pub(crate) fn enter(&self) {
        self.count.send_modify(|n| *n += 1);
    }

    pub(crate) fn leave(&self) {
        self.count.send_modify(|n| *n = n.saturating_sub(1));
    }

    /// Count one message as handled when the guard drops, even on unwind
    pub(crate) fn settle_on_drop(&self) -> InFlightGuard {
        InFlightGuard(self.clone())
    }

    pub(crate) fn current(&self) -> usize {
        *self.count.borrow()
    }

    pub(crate) async fn wait_idle(&self) {
        let mut rx = self.count.subscribe();
        // the sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

pub(crate) struct InFlightGuard(InFlight);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.leave();
    }
}

/// Handle for communicating with a running actor
#[derive(Clone)]
pub struct ActorHandle {
    pub id: AgentId,
    pub description: String,
    sender: mpsc::UnboundedSender<Envelope>,
    in_flight: InFlight,
    depth: Arc<AtomicUsize>,
    mailbox_warn_depth: usize,
}

impl std::fmt::Debug for ActorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorHandle")
            .field("id", &self.id)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl ActorHandle {
    pub(crate) fn enqueue(&self, envelope: Envelope) -> Result<(), RuntimeError> {
        self.in_flight.enter();
        let pending = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        if self.sender.send(envelope).is_err() {
            self.depth.fetch_sub(1, Ordering::Relaxed);
            self.in_flight.leave();
            return Err(RuntimeError::MailboxClosed(self.id.clone()));
        }

        if self.mailbox_warn_depth > 0 && pending > self.mailbox_warn_depth {
            warn!(actor_id = %self.id, pending, "Message backlog above warning depth");
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Actor lifecycle management
pub(crate) struct ActorLifecycle {
    id: AgentId,
    actor: Box<dyn BaseActor>,
    receiver: mpsc::UnboundedReceiver<Envelope>,
    shutdown_token: CancellationToken,
    in_flight: InFlight,
    depth: Arc<AtomicUsize>,
    /// Set once a handler panicked; the actor stops and a later message
    /// gets a fresh instance
    poisoned: bool,
}

impl ActorLifecycle {
    /// Wire a mailbox to `actor`; the returned lifecycle must be spawned
    pub(crate) fn new(
        id: AgentId,
        actor: Box<dyn BaseActor>,
        shutdown_token: CancellationToken,
        in_flight: InFlight,
        mailbox_warn_depth: usize,
    ) -> (Self, ActorHandle) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        let handle = ActorHandle {
            id: id.clone(),
            description: actor.description().to_string(),
            sender,
            in_flight: in_flight.clone(),
            depth: depth.clone(),
            mailbox_warn_depth,
        };
        let lifecycle = Self {
            id,
            actor,
            receiver,
            shutdown_token,
            in_flight,
            depth,
            poisoned: false,
        };
        (lifecycle, handle)
    }

    /// Main message loop
    pub(crate) async fn run(mut self) {
        debug!(actor_id = %self.id, "Starting actor");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_token.cancelled() => {
                    debug!(actor_id = %self.id, "Received shutdown signal");
                    break;
                }

                envelope = self.receiver.recv() => {
                    match envelope {
                        Some(envelope) => {
                            self.depth.fetch_sub(1, Ordering::Relaxed);
                            let _settled = self.in_flight.settle_on_drop();
                            self.handle(envelope).await;
                            if self.poisoned {
                                warn!(actor_id = %self.id, "Stopping actor after handler panic");
                                break;
                            }
                        }
                        None => {
                            debug!(actor_id = %self.id, "Mailbox closed");
                            break;
                        }
                    }
                }
            }
        }

        self.receiver.close();
        while let Ok(envelope) = self.receiver.try_recv() {
            let _settled = self.in_flight.settle_on_drop();
            self.depth.fetch_sub(1, Ordering::Relaxed);
            if self.poisoned {
                reject(envelope, || RuntimeError::MailboxClosed(self.id.clone()));
            } else {
                reject(envelope, || RuntimeError::NotRunning);
            }
        }

        if AssertUnwindSafe(self.actor.close()).catch_unwind().await.is_err() {
            error!(actor_id = %self.id, "Actor panicked while closing");
        }
        info!(actor_id = %self.id, "Actor stopped");
    }

    async fn handle(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::Send { message, ctx, reply } => {
                let result = if ctx.cancellation_token.is_cancelled() {
                    Err(RuntimeError::Cancelled)
                } else {
                    contain(&self.id, &mut self.poisoned, self.actor.on_message(message, ctx)).await
                };
                if let Err(e) = &result {
                    debug!(actor_id = %self.id, error = %e, "Send handler returned error");
                }
                self.close_if_poisoned();
                // the caller may have stopped waiting
                let _ = reply.send(result);
            }
            Envelope::Publish { message, ctx } => {
                if ctx.cancellation_token.is_cancelled() {
                    debug!(actor_id = %self.id, message_id = %ctx.message_id, "Skipping cancelled publish");
                    return;
                }
                let topic = ctx.topic_id.clone();
                match contain(&self.id, &mut self.poisoned, self.actor.on_message(message, ctx)).await {
                    Ok(_) => {}
                    Err(e @ RuntimeError::CantHandle { .. }) => {
                        debug!(actor_id = %self.id, error = %e, "Ignoring published message");
                    }
                    Err(RuntimeError::Cancelled) => {
                        debug!(actor_id = %self.id, "Published message handling cancelled");
                    }
                    Err(e) => {
                        error!(
                            actor_id = %self.id,
                            topic = ?topic,
                            error = %e,
                            "Message handling failed"
                        );
                    }
                }
            }
            Envelope::SaveState { reply } => {
                let state = contain(&self.id, &mut self.poisoned, self.actor.save_state()).await;
                self.close_if_poisoned();
                let _ = reply.send(state);
            }
            Envelope::LoadState { state, reply } => {
                let loaded = contain(&self.id, &mut self.poisoned, self.actor.load_state(state)).await;
                self.close_if_poisoned();
                let _ = reply.send(loaded);
            }
        }
    }

    /// Refuse new mail before replying, so the caller's next message
    /// instantiates a fresh actor
    fn close_if_poisoned(&mut self) {
        if self.poisoned {
            self.receiver.close();
        }
    }
}

/// Run actor code, turning a panic into `HandlerFailed` and poisoning the actor
async fn contain<T>(
    id: &AgentId,
    poisoned: &mut bool,
    work: impl Future<Output = Result<T, RuntimeError>>,
) -> Result<T, RuntimeError> {
    match AssertUnwindSafe(work).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            *poisoned = true;
            let reason = panic_reason(panic.as_ref());
            error!(actor_id = %id, panic = %reason, "Actor handler panicked");
            Err(RuntimeError::handler_failed(id, format!("handler panicked: {reason}")))
        }
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> &str {
    if let Some(reason) = panic.downcast_ref::<&'static str>() {
        *reason
    } else if let Some(reason) = panic.downcast_ref::<String>() {
        reason.as_str()
    } else {
        "non-string panic payload"
    }
}

fn reject(envelope: Envelope, reason: impl Fn() -> RuntimeError) {
    match envelope {
        Envelope::Send { reply, .. } => {
            let _ = reply.send(Err(reason()));
        }
        Envelope::Publish { .. } => {}
        Envelope::SaveState { reply } => {
            let _ = reply.send(Err(reason()));
        }
        Envelope::LoadState { reply, .. } => {
            let _ = reply.send(Err(reason()));
        }
    }
}
