// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Node configuration
//!
//! Every option has a default, so a configuration file only needs to name the
//! values it changes.
//!

use crate::Error;

use serde::{Deserialize, Serialize};
use tokio::fs;

use std::{path::Path, time::Duration};

/// Configuration of a cluster node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name of the cluster. Nodes only see nodes of the same cluster.
    pub cluster_name: String,
    /// Human readable name of this node.
    pub node_name: String,
    /// Period of the node pulse (membership refresh and sweeps).
    pub server_pulse_secs: u64,
    /// Time to live of the node membership entry.
    pub node_entry_secs: u64,
    /// Time a caller waits for a reply before the request fails.
    pub actor_message_timeout_secs: u64,
    /// Idle time after which an activation is deactivated.
    pub default_actor_lifetime_secs: u64,
    /// Period of the reminder pump.
    pub reminder_pump_secs: u64,
    /// Pulses added on top of the actor lifetime when an ownership lease is
    /// claimed or renewed.
    pub ownership_grace_pulses: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cluster_name: "grove-default-cluster".to_owned(),
            node_name: "grove-node".to_owned(),
            server_pulse_secs: 5,
            node_entry_secs: 10,
            actor_message_timeout_secs: 5,
            default_actor_lifetime_secs: 60,
            reminder_pump_secs: 1,
            ownership_grace_pulses: 2,
        }
    }
}

impl Config {
    /// Parses a configuration from TOML text.
    pub fn from_toml(toml: &str) -> Result<Self, Error> {
        let config: Config = toml::de::from_str(toml)
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML configuration file.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::Config(format!("Can not read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Checks that every period is positive.
    pub fn validate(&self) -> Result<(), Error> {
        let periods = [
            ("server_pulse_secs", self.server_pulse_secs),
            ("node_entry_secs", self.node_entry_secs),
            ("actor_message_timeout_secs", self.actor_message_timeout_secs),
            (
                "default_actor_lifetime_secs",
                self.default_actor_lifetime_secs,
            ),
            ("reminder_pump_secs", self.reminder_pump_secs),
        ];
        for (name, value) in periods {
            if value == 0 {
                return Err(Error::Config(format!("{} must be positive", name)));
            }
        }
        Ok(())
    }

    pub fn server_pulse(&self) -> Duration {
        Duration::from_secs(self.server_pulse_secs)
    }

    pub fn node_entry_ttl(&self) -> Duration {
        Duration::from_secs(self.node_entry_secs)
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_secs(self.actor_message_timeout_secs)
    }

    pub fn actor_lifetime(&self) -> Duration {
        Duration::from_secs(self.default_actor_lifetime_secs)
    }

    pub fn reminder_pump(&self) -> Duration {
        Duration::from_secs(self.reminder_pump_secs)
    }

    /// Time to live of an ownership lease: the actor lifetime plus the grace
    /// pulses, so a lease outlives the activation it protects.
    pub fn ownership_ttl(&self) -> Duration {
        self.actor_lifetime()
            + self.server_pulse() * self.ownership_grace_pulses
    }
}
