// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor identity
//!
//! Actors are addressed by the pair `(actor type, actor id)`. The identity has
//! no lifecycle of its own; it is only a key into the directory and into the
//! activation table of a node, where it is flattened into the activation key
//! `type/id`.
//!

use serde::{Deserialize, Serialize};

use std::fmt::{Error, Formatter};

/// Instance id of an actor, either textual or numeric.
#[derive(
    Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum ActorId {
    Text(String),
    Number(i64),
}

impl Default for ActorId {
    /// The id used when the caller does not name an instance.
    fn default() -> Self {
        ActorId::Text("no_id".to_owned())
    }
}

impl From<&str> for ActorId {
    fn from(id: &str) -> Self {
        ActorId::Text(id.to_owned())
    }
}

impl From<String> for ActorId {
    fn from(id: String) -> Self {
        ActorId::Text(id)
    }
}

impl From<&String> for ActorId {
    fn from(id: &String) -> Self {
        ActorId::Text(id.clone())
    }
}

impl From<i64> for ActorId {
    fn from(id: i64) -> Self {
        ActorId::Number(id)
    }
}

impl From<i32> for ActorId {
    fn from(id: i32) -> Self {
        ActorId::Number(i64::from(id))
    }
}

impl From<u32> for ActorId {
    fn from(id: u32) -> Self {
        ActorId::Number(i64::from(id))
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        match self {
            ActorId::Text(id) => write!(f, "{}", id),
            ActorId::Number(id) => write!(f, "{}", id),
        }
    }
}

impl std::fmt::Debug for ActorId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        std::fmt::Display::fmt(self, f)
    }
}

/// Composite key of an actor instance.
#[derive(
    Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ActorIdentity {
    pub actor_type: String,
    pub actor_id: ActorId,
}

impl ActorIdentity {
    pub fn new(actor_type: &str, actor_id: impl Into<ActorId>) -> Self {
        Self {
            actor_type: actor_type.to_owned(),
            actor_id: actor_id.into(),
        }
    }

    /// Key of the actor in the activation table of a node.
    pub fn activation_key(&self) -> String {
        format!("{}/{}", self.actor_type, self.actor_id)
    }
}

impl std::fmt::Display for ActorIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}/{}", self.actor_type, self.actor_id)
    }
}

impl std::fmt::Debug for ActorIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        std::fmt::Display::fmt(self, f)
    }
}
