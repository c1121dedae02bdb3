// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Errors module
//!

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for the actor runtime.
///
/// Errors are serializable so that a failure raised on the node hosting an
/// actor travels back to the caller unchanged inside an error reply.
#[derive(Clone, Debug, Error, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// An error occurred while sending a message.
    #[error("An error occurred while sending a message: {0}.")]
    Send(String),
    /// No running node is available to host the actor.
    #[error("No running node can host actor {0}.")]
    NoCapacity(String),
    /// The actor activation hook failed.
    #[error("Actor activation failed: {0}")]
    Activation(String),
    /// No reply arrived for the request within the message timeout.
    #[error("Request {0} timed out.")]
    Timeout(u64),
    /// The activation is deactivating and does not accept more work.
    #[error("Actor {0} is not accepting messages.")]
    Rejected(String),
    /// A timer with the same name is already registered.
    #[error("Timer {0} already exists.")]
    TimerExists(String),
    /// No factory is registered for the actor type.
    #[error("Unknown actor type {0}.")]
    UnknownActorType(String),
    /// A factory for the actor type is already registered.
    #[error("Actor type {0} is already registered.")]
    ActorTypeExists(String),
    /// Store  Error.
    #[error("Store error: {0}")]
    Store(String),
    /// A value could not be encoded.
    #[error("Encode error: {0}")]
    Encode(String),
    /// A value could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),
    /// Invalid configuration.
    #[error("Config error: {0}")]
    Config(String),
    /// Error raised by actor code that does not compromise the runtime.
    #[error("Error: {0}")]
    Functional(String),
}

impl From<store::Error> for Error {
    fn from(error: store::Error) -> Self {
        Error::Store(error.to_string())
    }
}
