//! In-process actor runtime
//!
//! This crate hosts message-passing actors for the orchestration layer:
//! - [`CoreRuntime`] registers actor factories, instantiates actors lazily and
//!   routes point-to-point and topic-broadcast messages
//! - [`BaseActor`] is implemented by every hosted actor; [`MessageHandlers`]
//!   gives actors a typed dispatch table
//! - [`Subscription`] rules map topics to actor types

pub mod actor;
pub mod config;
pub mod error;
pub mod ids;
pub mod message;
pub mod runtime;
pub mod subscription;

pub use actor::{ActorHandle, BaseActor};
pub use config::RuntimeConfig;
pub use error::RuntimeError;
pub use ids::{AgentId, AgentType, TopicId};
pub use message::{
    downcast_reply, payload, HandlerFn, HandlerResult, MessageContext, MessageHandlers, Payload,
};
pub use runtime::{ActorFactory, AgentMetadata, CoreRuntime, RuntimeHandle};
pub use subscription::{Subscription, TypePrefixSubscription, TypeSubscription};

/// Re-export for actor implementations
pub use tokio_util::sync::CancellationToken;
