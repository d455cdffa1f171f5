//! In-process actor host
//!
//! [`CoreRuntime`] owns the factory registry, the lazily populated instance
//! cache and the subscription table. Actors reach the runtime through a
//! [`RuntimeHandle`], which holds a weak reference so that actor state never
//! keeps the runtime alive.

use crate::actor::{ActorHandle, ActorLifecycle, BaseActor, Envelope, InFlight};
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::ids::{AgentId, AgentType, TopicId};
use crate::message::{HandlerResult, MessageContext, Payload};
use crate::subscription::Subscription;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Builds the actor for one `AgentId` on first use
pub type ActorFactory =
    Arc<dyn Fn(AgentId, RuntimeHandle) -> anyhow::Result<Box<dyn BaseActor>> + Send + Sync>;

/// Description of one instantiated actor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMetadata {
    pub agent_type: AgentType,
    pub key: String,
    pub description: String,
}

/// Actor runtime shared by every orchestration in the process
#[derive(Clone)]
pub struct CoreRuntime {
    inner: Arc<RuntimeInner>,
}

/// Non-owning runtime reference held by actors
#[derive(Clone)]
pub struct RuntimeHandle {
    inner: Weak<RuntimeInner>,
}

struct RuntimeInner {
    config: RuntimeConfig,
    factories: DashMap<AgentType, ActorFactory>,
    instances: Mutex<HashMap<AgentId, ActorHandle>>,
    subscriptions: RwLock<Vec<Arc<dyn Subscription>>>,
    running: AtomicBool,
    shutdown_token: parking_lot::Mutex<CancellationToken>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    in_flight: InFlight,
}

impl Default for CoreRuntime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl CoreRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                config,
                factories: DashMap::new(),
                instances: Mutex::new(HashMap::new()),
                subscriptions: RwLock::new(Vec::new()),
                running: AtomicBool::new(false),
                shutdown_token: parking_lot::Mutex::new(CancellationToken::new()),
                tasks: parking_lot::Mutex::new(Vec::new()),
                in_flight: InFlight::new(),
            }),
        }
    }

    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    // ---- lifecycle ----

    /// Begin accepting messages
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            debug!("Runtime already running");
            return;
        }
        let mut token = self.inner.shutdown_token.lock();
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
        info!("Agent runtime started");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Stop every actor immediately.
    ///
    /// Queued messages are rejected with [`RuntimeError::NotRunning`]. Actor
    /// instances are dropped; a later `start` re-creates them lazily.
    pub async fn stop(&self) -> Result<(), RuntimeError> {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return Err(RuntimeError::NotRunning);
        }

        self.inner.shutdown_token.lock().cancel();
        let stopped = {
            let mut instances = self.inner.instances.lock().await;
            let count = instances.len();
            instances.clear();
            count
        };

        let tasks: Vec<_> = std::mem::take(&mut *self.inner.tasks.lock());
        let timeout = self.inner.config.shutdown_timeout();
        if tokio::time::timeout(timeout, futures::future::join_all(tasks))
            .await
            .is_err()
        {
            warn!(timeout_ms = timeout.as_millis() as u64, "Actors did not stop within shutdown timeout");
        }

        info!(actors = stopped, "Agent runtime stopped");
        Ok(())
    }

    /// Wait until every queued message has been handled, then stop
    pub async fn stop_when_idle(&self) -> Result<(), RuntimeError> {
        if !self.is_running() {
            return Err(RuntimeError::NotRunning);
        }
        debug!(pending = self.inner.in_flight.current(), "Waiting for runtime to become idle");
        self.inner.in_flight.wait_idle().await;
        self.stop().await
    }

    // ---- registration ----

    /// Register the factory for `agent_type`.
    ///
    /// Fails if the type name is already taken.
    pub async fn register_factory<F>(
        &self,
        agent_type: impl Into<AgentType>,
        factory: F,
    ) -> Result<AgentType, RuntimeError>
    where
        F: Fn(AgentId, RuntimeHandle) -> anyhow::Result<Box<dyn BaseActor>> + Send + Sync + 'static,
    {
        let agent_type = agent_type.into();
        match self.inner.factories.entry(agent_type.clone()) {
            Entry::Occupied(_) => Err(RuntimeError::AlreadyRegistered(agent_type)),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(factory));
                debug!(agent_type = %agent_type, "Registered actor factory");
                Ok(agent_type)
            }
        }
    }

    /// Register a factory producing one concrete actor type
    pub async fn register_actor<A, F>(
        &self,
        agent_type: impl Into<AgentType>,
        factory: F,
    ) -> Result<AgentType, RuntimeError>
    where
        A: BaseActor,
        F: Fn(AgentId, RuntimeHandle) -> anyhow::Result<A> + Send + Sync + 'static,
    {
        self.register_factory(agent_type, move |id, runtime| {
            factory(id, runtime).map(|actor| Box::new(actor) as Box<dyn BaseActor>)
        })
        .await
    }

    pub fn is_registered(&self, agent_type: &AgentType) -> bool {
        self.inner.factories.contains_key(agent_type)
    }

    /// Resolve the address of `agent_type`/`key`.
    ///
    /// With `lazy = false` the actor is instantiated immediately.
    pub async fn get(
        &self,
        agent_type: impl Into<AgentType>,
        key: &str,
        lazy: bool,
    ) -> Result<AgentId, RuntimeError> {
        self.inner.get(agent_type.into(), key, lazy).await
    }

    // ---- subscriptions ----

    pub async fn add_subscription(
        &self,
        subscription: impl Subscription + 'static,
    ) -> Result<(), RuntimeError> {
        let mut subscriptions = self.inner.subscriptions.write().await;
        if subscriptions.iter().any(|s| s.id() == subscription.id()) {
            return Err(RuntimeError::DuplicateSubscription(subscription.id().to_string()));
        }
        debug!(subscription = ?subscription, "Added subscription");
        subscriptions.push(Arc::new(subscription));
        Ok(())
    }

    pub async fn remove_subscription(&self, id: &str) -> Result<(), RuntimeError> {
        let mut subscriptions = self.inner.subscriptions.write().await;
        let index = subscriptions
            .iter()
            .position(|s| s.id() == id)
            .ok_or_else(|| RuntimeError::SubscriptionNotFound(id.to_string()))?;
        subscriptions.remove(index);
        debug!(subscription_id = %id, "Removed subscription");
        Ok(())
    }

    // ---- messaging ----

    pub async fn send_message(
        &self,
        message: Payload,
        recipient: &AgentId,
        sender: Option<AgentId>,
        cancellation_token: Option<CancellationToken>,
    ) -> HandlerResult {
        self.inner
            .send_message(message, recipient, sender, cancellation_token)
            .await
    }

    pub async fn publish_message(
        &self,
        message: Payload,
        topic_id: TopicId,
        sender: Option<AgentId>,
        cancellation_token: Option<CancellationToken>,
    ) -> Result<(), RuntimeError> {
        self.inner
            .publish_message(message, topic_id, sender, cancellation_token)
            .await
    }

    // ---- state ----

    pub async fn agent_save_state(&self, agent_id: &AgentId) -> Result<Value, RuntimeError> {
        let handle = self.inner.ensure_instance(agent_id).await?;
        let (reply, rx) = oneshot::channel();
        handle.enqueue(Envelope::SaveState { reply })?;
        rx.await.map_err(|_| RuntimeError::no_reply(agent_id))?
    }

    pub async fn agent_load_state(&self, agent_id: &AgentId, state: Value) -> Result<(), RuntimeError> {
        let handle = self.inner.ensure_instance(agent_id).await?;
        let (reply, rx) = oneshot::channel();
        handle.enqueue(Envelope::LoadState { state, reply })?;
        rx.await.map_err(|_| RuntimeError::no_reply(agent_id))?
    }

    /// State of every instantiated actor keyed by `type/key`
    pub async fn save_state(&self) -> Result<Value, RuntimeError> {
        let ids: Vec<AgentId> = self.inner.instances.lock().await.keys().cloned().collect();
        let mut state = Map::new();
        for id in ids {
            let actor_state = self.agent_save_state(&id).await?;
            state.insert(id.to_string(), actor_state);
        }
        Ok(Value::Object(state))
    }

    /// Restore a mapping produced by [`save_state`](Self::save_state).
    ///
    /// Entries whose actor type is not registered are skipped.
    pub async fn load_state(&self, state: Value) -> Result<(), RuntimeError> {
        let Value::Object(entries) = state else {
            return Err(RuntimeError::State(serde::de::Error::custom(
                "runtime state must be a JSON object",
            )));
        };

        for (key, actor_state) in entries {
            let Some((agent_type, agent_key)) = key.split_once('/') else {
                warn!(key = %key, "Skipping malformed agent id in saved state");
                continue;
            };
            let agent_id = AgentId::new(agent_type, agent_key);
            if !self.is_registered(agent_id.agent_type()) {
                warn!(agent_id = %agent_id, "Skipping state for unregistered agent type");
                continue;
            }
            self.agent_load_state(&agent_id, actor_state).await?;
        }
        Ok(())
    }

    pub async fn agent_metadata(&self, agent_id: &AgentId) -> Result<AgentMetadata, RuntimeError> {
        let handle = self.inner.ensure_instance(agent_id).await?;
        Ok(AgentMetadata {
            agent_type: agent_id.agent_type().clone(),
            key: agent_id.key().to_string(),
            description: handle.description,
        })
    }
}

impl RuntimeHandle {
    fn upgrade(&self) -> Result<Arc<RuntimeInner>, RuntimeError> {
        self.inner.upgrade().ok_or(RuntimeError::NotRunning)
    }

    pub async fn send_message(
        &self,
        message: Payload,
        recipient: &AgentId,
        sender: Option<AgentId>,
        cancellation_token: Option<CancellationToken>,
    ) -> HandlerResult {
        self.upgrade()?
            .send_message(message, recipient, sender, cancellation_token)
            .await
    }

    pub async fn publish_message(
        &self,
        message: Payload,
        topic_id: TopicId,
        sender: Option<AgentId>,
        cancellation_token: Option<CancellationToken>,
    ) -> Result<(), RuntimeError> {
        self.upgrade()?
            .publish_message(message, topic_id, sender, cancellation_token)
            .await
    }

    pub async fn get(
        &self,
        agent_type: impl Into<AgentType>,
        key: &str,
        lazy: bool,
    ) -> Result<AgentId, RuntimeError> {
        self.upgrade()?.get(agent_type.into(), key, lazy).await
    }
}

impl RuntimeInner {
    fn ensure_running(&self) -> Result<(), RuntimeError> {
        if self.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RuntimeError::NotRunning)
        }
    }

    async fn get(self: &Arc<Self>, agent_type: AgentType, key: &str, lazy: bool) -> Result<AgentId, RuntimeError> {
        if !self.factories.contains_key(&agent_type) {
            return Err(RuntimeError::UnknownAgentType(agent_type));
        }
        let agent_id = AgentId::new(agent_type, key);
        if !lazy {
            self.ensure_instance(&agent_id).await?;
        }
        Ok(agent_id)
    }

    /// Get or create the actor for `agent_id`; creation happens under the
    /// instance lock so one address never gets two actors
    async fn ensure_instance(self: &Arc<Self>, agent_id: &AgentId) -> Result<ActorHandle, RuntimeError> {
        self.ensure_running()?;
        let mut instances = self.instances.lock().await;
        if let Some(handle) = instances.get(agent_id) {
            if !handle.is_closed() {
                return Ok(handle.clone());
            }
        }

        let factory = self
            .factories
            .get(agent_id.agent_type())
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RuntimeError::UnknownAgentType(agent_id.agent_type().clone()))?;

        let runtime = RuntimeHandle {
            inner: Arc::downgrade(self),
        };
        let actor = factory(agent_id.clone(), runtime).map_err(|e| RuntimeError::FactoryFailed {
            agent_type: agent_id.agent_type().clone(),
            message: e.to_string(),
        })?;

        let shutdown = self.shutdown_token.lock().child_token();
        let (lifecycle, handle) = ActorLifecycle::new(
            agent_id.clone(),
            actor,
            shutdown,
            self.in_flight.clone(),
            self.config.mailbox_warn_depth,
        );
        self.tasks.lock().push(tokio::spawn(lifecycle.run()));
        instances.insert(agent_id.clone(), handle.clone());
        debug!(actor_id = %agent_id, "Instantiated actor");
        Ok(handle)
    }

    async fn send_message(
        self: &Arc<Self>,
        message: Payload,
        recipient: &AgentId,
        sender: Option<AgentId>,
        cancellation_token: Option<CancellationToken>,
    ) -> HandlerResult {
        self.ensure_running()?;
        let token = cancellation_token.unwrap_or_default();
        if token.is_cancelled() {
            return Err(RuntimeError::Cancelled);
        }

        let handle = self.ensure_instance(recipient).await.map_err(|e| match e {
            RuntimeError::UnknownAgentType(t) => {
                RuntimeError::Undeliverable(format!("no actor type {t} for recipient {recipient}"))
            }
            other => other,
        })?;

        let ctx = MessageContext {
            recipient: recipient.clone(),
            sender,
            topic_id: None,
            is_rpc: true,
            cancellation_token: token.clone(),
            message_id: uuid::Uuid::new_v4().to_string(),
        };
        debug!(recipient = %recipient, sender = ?ctx.sender, message_id = %ctx.message_id, "Sending message");

        let (reply, rx) = oneshot::channel();
        handle.enqueue(Envelope::Send {
            message,
            ctx,
            reply,
        })?;

        tokio::select! {
            result = rx => result.map_err(|_| RuntimeError::no_reply(recipient))?,
            _ = token.cancelled() => Err(RuntimeError::Cancelled),
        }
    }

    async fn publish_message(
        self: &Arc<Self>,
        message: Payload,
        topic_id: TopicId,
        sender: Option<AgentId>,
        cancellation_token: Option<CancellationToken>,
    ) -> Result<(), RuntimeError> {
        self.ensure_running()?;
        let token = cancellation_token.unwrap_or_default();
        if token.is_cancelled() {
            return Err(RuntimeError::Cancelled);
        }

        let recipients: Vec<AgentId> = {
            let subscriptions = self.subscriptions.read().await;
            let mut recipients = Vec::new();
            for subscription in subscriptions.iter().filter(|s| s.is_match(&topic_id)) {
                let recipient = subscription.map_to_agent(&topic_id);
                if sender.as_ref() == Some(&recipient) || recipients.contains(&recipient) {
                    continue;
                }
                recipients.push(recipient);
            }
            recipients
        };

        if recipients.is_empty() {
            debug!(topic = %topic_id, "No subscribers for published message");
            return Ok(());
        }

        let message_id = uuid::Uuid::new_v4().to_string();
        debug!(topic = %topic_id, recipients = recipients.len(), message_id = %message_id, "Publishing message");

        let mut first_error = None;
        for recipient in recipients {
            let ctx = MessageContext {
                recipient: recipient.clone(),
                sender: sender.clone(),
                topic_id: Some(topic_id.clone()),
                is_rpc: false,
                cancellation_token: token.clone(),
                message_id: message_id.clone(),
            };
            let delivered = match self.ensure_instance(&recipient).await {
                Ok(handle) => handle.enqueue(Envelope::Publish {
                    message: Arc::clone(&message),
                    ctx,
                }),
                Err(RuntimeError::UnknownAgentType(t)) => Err(RuntimeError::Undeliverable(format!(
                    "subscription targets unregistered actor type {t}"
                ))),
                Err(e) => Err(e),
            };
            if let Err(e) = delivered {
                warn!(recipient = %recipient, topic = %topic_id, error = %e, "Publish delivery failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
