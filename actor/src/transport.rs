// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Cluster transport
//!
//! Carries opaque messages between nodes. Every message names a subsystem,
//! and a node delivers it to the handlers registered for that subsystem.
//!
//! [`PubSubTransport`] is built on the publish/subscribe channels of the
//! store: one broadcast channel per cluster and one private channel per node.
//! A single pump task per node receives from both channels and awaits the
//! handlers of each message before taking the next one, so the messages a
//! node receives from one sender are handled in the order they were sent.
//!

use crate::{cluster::NodeId, keys::KeyGenerator, Error};

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use store::PubSub;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
};

/// Handler of the messages of one subsystem.
pub type MessageHandler =
    Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, ()> + Send + Sync>;

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Starts receiving messages.
    async fn open(&self) -> Result<(), Error>;

    /// Stops receiving messages.
    async fn close(&self) -> Result<(), Error>;

    /// Sends a message to one node.
    async fn send_message(
        &self,
        target: &NodeId,
        subsystem: &str,
        contents: Vec<u8>,
    ) -> Result<(), Error>;

    /// Sends a message to every node of the cluster, this one included.
    async fn broadcast_message(
        &self,
        subsystem: &str,
        contents: Vec<u8>,
    ) -> Result<(), Error>;

    /// Registers a handler for the messages of `subsystem`.
    fn add_handler(&self, subsystem: &str, handler: MessageHandler);
}

/// Envelope of every message on the wire.
#[derive(Debug, Serialize, Deserialize)]
struct ClusterMessage {
    sender: NodeId,
    subsystem: String,
    contents: Vec<u8>,
}

type Handlers = Arc<RwLock<HashMap<String, Vec<MessageHandler>>>>;

pub struct PubSubTransport {
    pubsub: Arc<dyn PubSub>,
    keys: KeyGenerator,
    local: NodeId,
    handlers: Handlers,
    pump: Mutex<Option<CancellationToken>>,
}

impl PubSubTransport {
    pub(crate) fn new(
        pubsub: Arc<dyn PubSub>,
        keys: KeyGenerator,
        local: NodeId,
    ) -> Self {
        Self {
            pubsub,
            keys,
            local,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            pump: Mutex::new(None),
        }
    }

    fn envelope(&self, subsystem: &str, contents: Vec<u8>) -> Result<Vec<u8>, Error> {
        let message = ClusterMessage {
            sender: self.local.clone(),
            subsystem: subsystem.to_owned(),
            contents,
        };
        bincode::serialize(&message).map_err(|e| Error::Encode(e.to_string()))
    }

    async fn deliver(handlers: &Handlers, payload: Vec<u8>) {
        let message: ClusterMessage = match bincode::deserialize(&payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping undecodable cluster message: {}", e);
                return;
            }
        };
        let targets: Vec<MessageHandler> = handlers
            .read()
            .map(|handlers| {
                handlers
                    .get(&message.subsystem)
                    .cloned()
                    .unwrap_or_default()
            })
            .unwrap_or_default();
        if targets.is_empty() {
            debug!(
                "No handler for subsystem {} (message from {}).",
                message.subsystem, message.sender
            );
            return;
        }
        for handler in targets {
            handler(message.contents.clone()).await;
        }
    }
}

#[async_trait]
impl Transport for PubSubTransport {
    async fn open(&self) -> Result<(), Error> {
        let mut cluster_channel = self.pubsub.subscribe(&self.keys.cluster()).await?;
        let mut node_channel =
            self.pubsub.subscribe(&self.keys.node(&self.local)).await?;

        let token = CancellationToken::new();
        {
            let mut pump = self
                .pump
                .lock()
                .map_err(|e| Error::Functional(e.to_string()))?;
            if let Some(previous) = pump.replace(token.clone()) {
                previous.cancel();
            }
        }

        let handlers = self.handlers.clone();
        let local = self.local.clone();
        tokio::spawn(async move {
            debug!("Transport of node {} is open.", local);
            loop {
                let payload = tokio::select! {
                    _ = token.cancelled() => break,
                    Some(payload) = cluster_channel.recv() => payload,
                    Some(payload) = node_channel.recv() => payload,
                    else => break,
                };
                Self::deliver(&handlers, payload).await;
            }
            debug!("Transport of node {} is closed.", local);
        });
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        let token = self
            .pump
            .lock()
            .map_err(|e| Error::Functional(e.to_string()))?
            .take();
        if let Some(token) = token {
            token.cancel();
        }
        Ok(())
    }

    async fn send_message(
        &self,
        target: &NodeId,
        subsystem: &str,
        contents: Vec<u8>,
    ) -> Result<(), Error> {
        let bytes = self.envelope(subsystem, contents)?;
        let receivers = self.pubsub.publish(&self.keys.node(target), &bytes).await?;
        if receivers == 0 {
            warn!("Node {} is not listening, message dropped.", target);
        }
        Ok(())
    }

    async fn broadcast_message(
        &self,
        subsystem: &str,
        contents: Vec<u8>,
    ) -> Result<(), Error> {
        let bytes = self.envelope(subsystem, contents)?;
        self.pubsub.publish(&self.keys.cluster(), &bytes).await?;
        Ok(())
    }

    fn add_handler(&self, subsystem: &str, handler: MessageHandler) {
        match self.handlers.write() {
            Ok(mut handlers) => handlers
                .entry(subsystem.to_owned())
                .or_default()
                .push(handler),
            Err(e) => error!("Can not register handler for {}: {}", subsystem, e),
        }
    }
}
