// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Grove virtual actors
//!
//! A clustered virtual actor runtime. Actors are addressed by an identity
//! made of an actor type and an actor id, and they always exist from the
//! caller's point of view: the first message for an identity activates an
//! instance on one node of the cluster, and idle instances are deactivated
//! again without anybody asking.
//!
//! ## Overview
//!
//! Every node runs the same set of subsystems:
//!
//! - **Membership**: nodes publish an expiring entry in a shared store and
//!   read back the entries of their peers on every pulse.
//! - **Placement**: an actor without owner is placed on a random running
//!   node.
//! - **Directory**: the owner of an actor is recorded in the store under an
//!   expiring lease. The first node to claim an actor wins and every other
//!   node adopts its claim, so an actor is active on one node at a time.
//! - **Execution**: each node keeps a table of its live activations. Every
//!   activation has a mailbox and a task that runs one job at a time.
//! - **Messaging**: requests and replies travel between nodes on the
//!   publish/subscribe channels of the store. A node that receives a request
//!   for an actor it does not own forwards it to the owner.
//! - **Reminders**: durable timers kept in a sorted set of the store and
//!   delivered by a system actor.
//!
//! ## Getting started
//!
//! ```ignore
//! use actor::{Actor, ActorContext, ActorSystem, Config, Error, Handler};
//! use async_trait::async_trait;
//! use std::sync::Arc;
//! use store::MemoryStore;
//! use tokio_util::sync::CancellationToken;
//!
//! struct Greeter;
//!
//! #[async_trait]
//! impl Actor for Greeter {
//!     type Message = String;
//!     type Response = String;
//! }
//!
//! #[async_trait]
//! impl Handler<Greeter> for Greeter {
//!     async fn handle_message(
//!         &mut self,
//!         name: String,
//!         _ctx: &mut ActorContext<Greeter>,
//!     ) -> Result<String, Error> {
//!         Ok(format!("Hello, {}", name))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let store = MemoryStore::new();
//!     let (system, mut runner) = ActorSystem::create(
//!         Config::default(),
//!         Arc::new(store.clone()),
//!         Arc::new(store),
//!         CancellationToken::new(),
//!     );
//!     system.start().await?;
//!     tokio::spawn(async move { runner.run().await });
//!
//!     system.register_actor("greeter", || Greeter)?;
//!     let greeting = system.actor::<Greeter>("greeter", "joe").ask("Joe".to_owned()).await?;
//!     assert_eq!(greeting, "Hello, Joe");
//!
//!     system.stop().await
//! }
//! ```
//!
//! ## Guarantees
//!
//! - Hooks of one activation never run concurrently.
//! - Messages from one caller to one actor are handled in the order they
//!   were sent.
//! - A request waits at most the message timeout for its reply.
//! - Reminders are delivered at least once.
//!

mod activation;
mod actor;
mod cluster;
mod config;
mod directory;
mod error;
mod execution;
mod factory;
mod identity;
mod keys;
mod mailbox;
mod messaging;
mod placement;
mod reminders;
mod system;
mod transport;

//
// Actor API
//

/// Behavior and lifecycle hooks of an actor type.
pub use actor::Actor;

/// Context handed to every hook of an activation: identity, timers,
/// reminders and references to other actors.
pub use actor::ActorContext;

/// Location transparent reference to an actor.
pub use actor::ActorRef;

/// Message handler of an actor type.
pub use actor::Handler;

/// Identity of an actor instance.
pub use identity::{ActorId, ActorIdentity};

/// Error of every runtime operation.
pub use error::Error;

//
// Node
//

pub use config::Config;

/// Node lifecycle: creation, start, stop and the pulse.
pub use system::{ActorSystem, SystemRef, SystemRunner};

pub use cluster::{ClusterInfo, ClusterMembership, ClusterSnapshot, NodeId, NodeInfo, NodeStatus};

pub use placement::ActorPlacement;

//
// Subsystems
//

pub use activation::{ActivationState, ActorActivation};
pub use directory::{ActorDirectory, StoreActorDirectory};
pub use execution::ActorExecution;
pub use factory::ActorFactory;
pub use messaging::{ActorMessaging, PendingResponse, RequestKind, ACTOR_SUBSYSTEM};
pub use reminders::{
    ActorReminders, Reminder, ReminderActor, ReminderMessage, REMINDER_ACTOR_ID,
    REMINDER_ACTOR_TYPE,
};
pub use transport::{MessageHandler, PubSubTransport, Transport};
