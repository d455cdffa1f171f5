//! Message envelopes and typed dispatch
//!
//! Payloads travel through the runtime type-erased. Each actor builds a
//! [`MessageHandlers`] table at construction time mapping the concrete message
//! type to the handler for it; a payload with no entry is rejected with
//! [`RuntimeError::CantHandle`].

use crate::error::RuntimeError;
use crate::ids::{AgentId, TopicId};
use futures::future::BoxFuture;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Type-erased message
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Handler return: an optional reply for `send_message` callers
pub type HandlerResult = Result<Option<Payload>, RuntimeError>;

/// Wrap a concrete message for delivery
pub fn payload<M: Any + Send + Sync>(message: M) -> Payload {
    Arc::new(message)
}

/// Recover a concrete reply returned by `send_message`
pub fn downcast_reply<M: Any + Send + Sync>(reply: Option<Payload>) -> Option<Arc<M>> {
    reply.and_then(|p| p.downcast::<M>().ok())
}

/// Delivery metadata handed to every handler
#[derive(Debug, Clone)]
pub struct MessageContext {
    /// Actor the message is addressed to
    pub recipient: AgentId,
    pub sender: Option<AgentId>,
    /// Set for published messages
    pub topic_id: Option<TopicId>,
    /// `true` for `send_message`, `false` for `publish_message`
    pub is_rpc: bool,
    pub cancellation_token: CancellationToken,
    pub message_id: String,
}

/// Handler for one concrete message type `M` on actor `A`
pub type HandlerFn<A, M> =
    for<'a> fn(&'a mut A, Arc<M>, MessageContext) -> BoxFuture<'a, HandlerResult>;

trait ErasedHandler<A>: Send + Sync {
    fn call<'a>(&self, actor: &'a mut A, message: Payload, ctx: MessageContext)
        -> BoxFuture<'a, HandlerResult>;
}

struct TypedHandler<A, M> {
    f: HandlerFn<A, M>,
    _marker: PhantomData<fn(M)>,
}

impl<A, M> ErasedHandler<A> for TypedHandler<A, M>
where
    A: Send + 'static,
    M: Any + Send + Sync,
{
    fn call<'a>(
        &self,
        actor: &'a mut A,
        message: Payload,
        ctx: MessageContext,
    ) -> BoxFuture<'a, HandlerResult> {
        match message.downcast::<M>() {
            Ok(message) => (self.f)(actor, message, ctx),
            Err(_) => {
                let error = RuntimeError::CantHandle {
                    agent_id: ctx.recipient,
                    message_type: std::any::type_name::<M>().to_string(),
                };
                Box::pin(async move { Err(error) })
            }
        }
    }
}

/// Dispatch table from message type to handler
pub struct MessageHandlers<A> {
    handlers: HashMap<TypeId, (&'static str, Box<dyn ErasedHandler<A>>)>,
}

impl<A: Send + 'static> MessageHandlers<A> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register the handler for messages of type `M`; a later registration for
    /// the same type replaces the earlier one
    pub fn on<M: Any + Send + Sync>(mut self, f: HandlerFn<A, M>) -> Self {
        self.handlers.insert(
            TypeId::of::<M>(),
            (
                std::any::type_name::<M>(),
                Box::new(TypedHandler {
                    f,
                    _marker: PhantomData,
                }),
            ),
        );
        self
    }

    pub fn handles(&self, message: &Payload) -> bool {
        self.handlers.contains_key(&(**message).type_id())
    }

    /// Names of the message types with a registered handler
    pub fn message_types(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.values().map(|(name, _)| *name).collect();
        names.sort_unstable();
        names
    }

    pub async fn dispatch(&self, actor: &mut A, message: Payload, ctx: MessageContext) -> HandlerResult {
        match self.handlers.get(&(*message).type_id()) {
            Some((_, handler)) => handler.call(actor, message, ctx).await,
            None => Err(RuntimeError::CantHandle {
                agent_id: ctx.recipient,
                message_type: "unregistered message type".to_string(),
            }),
        }
    }
}

impl<A: Send + 'static> Default for MessageHandlers<A> {
    fn default() -> Self {
        Self::new()
    }
}
