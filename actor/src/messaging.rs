// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor messaging
//!
//! Request/response protocol between nodes.
//!
//! ## Sending
//!
//! The sender resolves the owner of the target actor in the directory. An
//! actor without owner is placed on a running node and claimed for it; the
//! owner returned by the claim is authoritative, since another node may have
//! won the race. Two way requests get a message id and are registered as in
//! flight before they are handed to the transport, so even an immediate reply
//! finds its caller.
//!
//! ## Receiving a request
//!
//! The receiver first renews its ownership lease. If the renewal fails the
//! node is not the owner anymore: it evicts its local activation, if any, and
//! forwards the request once to the current owner, keeping the message id
//! and the reply address so the new owner answers the original caller. A
//! request that cannot be served after that single hop is answered with an
//! error. If the renewal succeeds the request is admitted into the mailbox
//! right away and the reply is sent when the handler finishes.
//!
//! A request refused by an activation that is being torn down waits for the
//! teardown to finish and is then served again, which activates the actor
//! anew. A node that is leaving the cluster gives up its claim on actors it
//! does not host and forwards their requests to a running node.
//!
//! ## Timeouts
//!
//! In flight requests older than the message timeout are failed by a periodic
//! sweep. A reply arriving afterwards is dropped.
//!

use crate::{
    actor::Actor,
    cluster::{ClusterInfo, NodeId, NodeStatus},
    directory::ActorDirectory,
    execution::ActorExecution,
    mailbox::Request,
    placement::ActorPlacement,
    system::SystemRef,
    transport::Transport,
    ActorIdentity, Error,
};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::{sync::oneshot, time::Instant};
use tracing::{debug, error, warn};

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

/// Transport subsystem of actor messages.
pub const ACTOR_SUBSYSTEM: &str = "actor";

/// What a request asks the target activation to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    UserMessage,
    Reminder,
}

/// Wire message of the actor subsystem.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) enum ActorMessage {
    Request {
        kind: RequestKind,
        identity: ActorIdentity,
        message_id: u64,
        /// Node waiting for the reply; `None` for one way requests.
        respond_to: Option<NodeId>,
        /// Set once the request has taken its forwarding hop.
        forwarded: bool,
        payload: Vec<u8>,
    },
    Response {
        identity: ActorIdentity,
        message_id: u64,
        payload: Vec<u8>,
    },
    Error {
        identity: ActorIdentity,
        message_id: u64,
        error: Error,
    },
}

struct InFlightRequest {
    started_at: Instant,
    rsvp: oneshot::Sender<Result<Vec<u8>, Error>>,
}

/// Reply of a request that has been sent.
pub enum PendingResponse {
    /// One way request; nothing will come back.
    OneWay,
    Waiting {
        message_id: u64,
        receiver: oneshot::Receiver<Result<Vec<u8>, Error>>,
    },
}

impl PendingResponse {
    /// Waits for the encoded reply. One way requests resolve immediately
    /// with an empty reply.
    pub async fn wait(self) -> Result<Vec<u8>, Error> {
        match self {
            PendingResponse::OneWay => Ok(Vec::new()),
            PendingResponse::Waiting {
                message_id,
                receiver,
            } => receiver.await.map_err(|_| {
                Error::Send(format!("reply to message {} was dropped", message_id))
            })?,
        }
    }
}

/// Original request data kept to forward or answer it later.
#[derive(Clone)]
struct Origin {
    kind: RequestKind,
    identity: ActorIdentity,
    message_id: u64,
    respond_to: Option<NodeId>,
    forwarded: bool,
    payload: Vec<u8>,
}

#[derive(Clone)]
pub struct ActorMessaging {
    cluster: ClusterInfo,
    directory: Arc<dyn ActorDirectory>,
    placement: ActorPlacement,
    transport: Arc<dyn Transport>,
    execution: ActorExecution,
    next_message_id: Arc<AtomicU64>,
    in_flight: Arc<Mutex<HashMap<u64, InFlightRequest>>>,
    message_timeout: Duration,
    ownership_ttl: Duration,
}

impl ActorMessaging {
    pub(crate) fn new(
        cluster: ClusterInfo,
        directory: Arc<dyn ActorDirectory>,
        transport: Arc<dyn Transport>,
        execution: ActorExecution,
        message_timeout: Duration,
        ownership_ttl: Duration,
    ) -> Self {
        Self {
            placement: ActorPlacement::new(cluster.clone()),
            cluster,
            directory,
            transport,
            execution,
            next_message_id: Arc::new(AtomicU64::new(1)),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            message_timeout,
            ownership_ttl,
        }
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<u64, InFlightRequest>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of requests waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.in_flight().len()
    }

    fn next_message_id(&self) -> u64 {
        self.next_message_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Sends a message to an actor and waits for the typed reply.
    pub async fn ask<A: Actor>(
        &self,
        identity: &ActorIdentity,
        message: &A::Message,
    ) -> Result<A::Response, Error> {
        let payload =
            bincode::serialize(message).map_err(|e| Error::Encode(e.to_string()))?;
        let bytes = self
            .send_actor_request(identity, payload, false, RequestKind::UserMessage)
            .await?
            .wait()
            .await?;
        bincode::deserialize(&bytes).map_err(|e| Error::Decode(e.to_string()))
    }

    /// Sends a message to an actor without waiting for it to be handled.
    pub async fn tell<A: Actor>(
        &self,
        identity: &ActorIdentity,
        message: &A::Message,
    ) -> Result<(), Error> {
        let payload =
            bincode::serialize(message).map_err(|e| Error::Encode(e.to_string()))?;
        self.send_actor_request(identity, payload, true, RequestKind::UserMessage)
            .await?;
        Ok(())
    }

    /// Resolves the owner of the actor and sends it a request.
    pub async fn send_actor_request(
        &self,
        identity: &ActorIdentity,
        payload: Vec<u8>,
        one_way: bool,
        kind: RequestKind,
    ) -> Result<PendingResponse, Error> {
        let target = self.resolve(identity).await?;
        if one_way {
            let message = ActorMessage::Request {
                kind,
                identity: identity.clone(),
                message_id: self.next_message_id(),
                respond_to: None,
                forwarded: false,
                payload,
            };
            self.send(&target, &message).await?;
            return Ok(PendingResponse::OneWay);
        }
        self.request_at(&target, identity, payload, kind).await
    }

    /// Sends a two way request to `target` without resolving the owner.
    pub(crate) async fn request_at(
        &self,
        target: &NodeId,
        identity: &ActorIdentity,
        payload: Vec<u8>,
        kind: RequestKind,
    ) -> Result<PendingResponse, Error> {
        let message_id = self.next_message_id();
        let (rsvp, receiver) = oneshot::channel();
        self.in_flight().insert(
            message_id,
            InFlightRequest {
                started_at: Instant::now(),
                rsvp,
            },
        );
        let message = ActorMessage::Request {
            kind,
            identity: identity.clone(),
            message_id,
            respond_to: Some(self.cluster.local_node_id()),
            forwarded: false,
            payload,
        };
        if let Err(err) = self.send(target, &message).await {
            self.in_flight().remove(&message_id);
            return Err(err);
        }
        Ok(PendingResponse::Waiting {
            message_id,
            receiver,
        })
    }

    /// Current owner of the actor, placing and claiming it if it has none.
    async fn resolve(&self, identity: &ActorIdentity) -> Result<NodeId, Error> {
        if let Some(owner) = self.directory.get_location(identity).await? {
            return Ok(owner);
        }
        let proposal = self.placement.place_actor(identity)?;
        self.directory
            .put_or_get_location(identity, &proposal, self.ownership_ttl)
            .await
    }

    async fn send(&self, target: &NodeId, message: &ActorMessage) -> Result<(), Error> {
        let bytes =
            bincode::serialize(message).map_err(|e| Error::Encode(e.to_string()))?;
        self.transport
            .send_message(target, ACTOR_SUBSYSTEM, bytes)
            .await
    }

    /// Handles a message of the actor subsystem.
    pub(crate) async fn on_message(&self, system: &SystemRef, contents: Vec<u8>) {
        let message: ActorMessage = match bincode::deserialize(&contents) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping undecodable actor message: {}", e);
                return;
            }
        };
        match message {
            ActorMessage::Request {
                kind,
                identity,
                message_id,
                respond_to,
                forwarded,
                payload,
            } => {
                let origin = Origin {
                    kind,
                    identity,
                    message_id,
                    respond_to,
                    forwarded,
                    payload,
                };
                self.on_request(system, origin).await;
            }
            ActorMessage::Response {
                message_id,
                payload,
                ..
            } => self.settle(message_id, Ok(payload)),
            ActorMessage::Error {
                message_id, error, ..
            } => self.settle(message_id, Err(error)),
        }
    }

    async fn on_request(&self, system: &SystemRef, origin: Origin) {
        let renewed = match self.execution.renew(&origin.identity).await {
            Ok(renewed) => renewed,
            Err(err) => {
                error!(
                    "Can not renew ownership of actor {}: {:?}",
                    origin.identity, err
                );
                self.spawn_reply(origin, Err(err));
                return;
            }
        };

        if !renewed {
            debug!(
                "Node {} does not own actor {}, forwarding message {}.",
                self.cluster.local_node_id(),
                origin.identity,
                origin.message_id
            );
            let messaging = self.clone();
            tokio::spawn(async move {
                if let Err(err) = messaging.execution.evict(&origin.identity).await {
                    error!("Can not evict actor {}: {:?}", origin.identity, err);
                }
                messaging.forward(origin).await;
            });
            return;
        }

        let request = match origin.kind {
            RequestKind::UserMessage => Request::Message(origin.payload.clone()),
            RequestKind::Reminder => {
                match bincode::deserialize::<String>(&origin.payload) {
                    Ok(name) => Request::Reminder(name),
                    Err(e) => {
                        self.spawn_reply(origin, Err(Error::Decode(e.to_string())));
                        return;
                    }
                }
            }
        };

        match self.execution.admit(system, &origin.identity, request) {
            Ok(admission) => {
                let messaging = self.clone();
                let system = system.clone();
                tokio::spawn(async move {
                    match messaging.execution.settle(admission).await {
                        Err(Error::Rejected(_)) => {
                            messaging.readmit(system, origin).await
                        }
                        result => messaging.reply(origin, result).await,
                    }
                });
            }
            Err(Error::Rejected(_)) => {
                tokio::spawn(self.clone().readmit(system.clone(), origin));
            }
            Err(err) => self.spawn_reply(origin, Err(err)),
        }
    }

    /// Serves again a request the local activation refused, once its
    /// teardown is over.
    fn readmit(self, system: SystemRef, origin: Origin) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if let Err(err) = self.execution.wait_teardown(&origin.identity).await {
                error!(
                    "Teardown of actor {} failed: {:?}",
                    origin.identity, err
                );
            }
            let local = self.cluster.local_node_id();
            if self.cluster.local_status() != NodeStatus::Running {
                debug!(
                    "Node {} is not running, handing message {} for {} over.",
                    local, origin.message_id, origin.identity
                );
                self.release(&origin.identity, &local).await;
                self.forward(origin).await;
                return;
            }
            match self.resolve(&origin.identity).await {
                Ok(owner) if owner == local => self.on_request(&system, origin).await,
                Ok(_) => self.forward(origin).await,
                Err(err) => self.reply(origin, Err(err)).await,
            }
        })
    }

    /// Drops the claim of this node on an actor it will not host.
    async fn release(&self, identity: &ActorIdentity, local: &NodeId) {
        match self.directory.get_location(identity).await {
            Ok(Some(owner)) if owner == *local => {
                if let Err(err) = self.directory.remove_actor(identity).await {
                    error!("Can not release actor {}: {:?}", identity, err);
                }
            }
            Ok(_) => {}
            Err(err) => error!("Can not read location of {}: {:?}", identity, err),
        }
    }

    /// Sends the request once more to the current owner of the actor.
    async fn forward(&self, origin: Origin) {
        if origin.forwarded {
            let error = Error::Rejected(origin.identity.to_string());
            self.reply(origin, Err(error)).await;
            return;
        }
        let target = match self.resolve(&origin.identity).await {
            Ok(target) => target,
            Err(err) => {
                self.reply(origin, Err(err)).await;
                return;
            }
        };
        debug!(
            "Forwarding message {} for {} to node {}.",
            origin.message_id, origin.identity, target
        );
        let message = ActorMessage::Request {
            kind: origin.kind,
            identity: origin.identity.clone(),
            message_id: origin.message_id,
            respond_to: origin.respond_to.clone(),
            forwarded: true,
            payload: origin.payload.clone(),
        };
        if let Err(err) = self.send(&target, &message).await {
            self.reply(origin, Err(err)).await;
        }
    }

    fn spawn_reply(&self, origin: Origin, result: Result<Vec<u8>, Error>) {
        let messaging = self.clone();
        tokio::spawn(async move { messaging.reply(origin, result).await });
    }

    /// Answers the node waiting for the request, if any.
    async fn reply(&self, origin: Origin, result: Result<Vec<u8>, Error>) {
        let Some(respond_to) = origin.respond_to else {
            if let Err(err) = result {
                debug!(
                    "One way message {} for {} failed: {:?}",
                    origin.message_id, origin.identity, err
                );
            }
            return;
        };
        let message = match result {
            Ok(payload) => ActorMessage::Response {
                identity: origin.identity,
                message_id: origin.message_id,
                payload,
            },
            Err(error) => ActorMessage::Error {
                identity: origin.identity,
                message_id: origin.message_id,
                error,
            },
        };
        if let Err(err) = self.send(&respond_to, &message).await {
            error!("Can not reply to node {}: {:?}", respond_to, err);
        }
    }

    /// Completes the in flight request `message_id`.
    fn settle(&self, message_id: u64, result: Result<Vec<u8>, Error>) {
        let Some(request) = self.in_flight().remove(&message_id) else {
            warn!("Node is not waiting for message {}, reply dropped.", message_id);
            return;
        };
        if request.rsvp.send(result).is_err() {
            debug!("Caller of message {} is gone.", message_id);
        }
    }

    /// Fails every in flight request older than the message timeout.
    pub fn update_pending_messages(&self) {
        let now = Instant::now();
        let expired: Vec<(u64, InFlightRequest)> = {
            let mut in_flight = self.in_flight();
            let ids: Vec<u64> = in_flight
                .iter()
                .filter(|(_, request)| {
                    now.duration_since(request.started_at) >= self.message_timeout
                })
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| in_flight.remove(&id).map(|request| (id, request)))
                .collect()
        };
        for (message_id, request) in expired {
            warn!("Message {} timed out.", message_id);
            let _ = request.rsvp.send(Err(Error::Timeout(message_id)));
        }
    }
}
