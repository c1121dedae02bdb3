// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Memory store implementation.
//!

use crate::{
    database::{PubSub, Store, Subscription},
    error::Error,
};

use async_trait::async_trait;
use tokio::{sync::mpsc, time::Instant};
use tracing::debug;

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

#[derive(Default)]
struct MemoryData {
    values: HashMap<String, Entry>,
    sorted: HashMap<String, HashMap<Vec<u8>, i64>>,
}

impl MemoryData {
    /// Returns the live entry for `key`, dropping it first if it has expired.
    fn live_entry(&mut self, key: &str, now: Instant) -> Option<&mut Entry> {
        if self
            .values
            .get(key)
            .is_some_and(|entry| !entry.is_live(now))
        {
            self.values.remove(key);
        }
        self.values.get_mut(key)
    }
}

type Channels = HashMap<String, Vec<mpsc::UnboundedSender<Vec<u8>>>>;

/// A store implementation that keeps everything in memory. Clones share the
/// same data, so several nodes of one process can form a cluster over it.
///
#[derive(Default, Clone)]
pub struct MemoryStore {
    data: Arc<RwLock<MemoryData>>,
    channels: Arc<RwLock<Channels>>,
}

impl MemoryStore {
    /// Creates an empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Expiry instant of an entry written now.
    fn deadline(key: &str, now: Instant, ttl: Duration) -> Result<Instant, Error> {
        if ttl.is_zero() {
            return Err(Error::Store(format!(
                "Time to live of '{}' must be positive",
                key
            )));
        }
        Ok(now + ttl)
    }

    fn check_channel(channel: &str) -> Result<(), Error> {
        if channel.is_empty() {
            return Err(Error::Channel("Channel name is empty".to_owned()));
        }
        Ok(())
    }

    fn write_data(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, MemoryData>, Error> {
        self.data
            .write()
            .map_err(|e| Error::Lock(format!("Can not lock data: {}", e)))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        let mut lock = self.write_data()?;
        Ok(lock
            .live_entry(key, Instant::now())
            .map(|entry| entry.value.clone()))
    }

    async fn set_ex(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<(), Error> {
        let expires_at = Self::deadline(key, Instant::now(), ttl)?;
        let mut lock = self.write_data()?;
        lock.values.insert(
            key.to_owned(),
            Entry {
                value: value.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn set_nx_ex(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, Error> {
        let now = Instant::now();
        let expires_at = Self::deadline(key, now, ttl)?;
        let mut lock = self.write_data()?;
        if lock.live_entry(key, now).is_some() {
            return Ok(false);
        }
        lock.values.insert(
            key.to_owned(),
            Entry {
                value: value.to_vec(),
                expires_at,
            },
        );
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<bool, Error> {
        let now = Instant::now();
        let mut lock = self.write_data()?;
        Ok(lock
            .values
            .remove(key)
            .is_some_and(|entry| entry.is_live(now)))
    }

    async fn expire_if_eq(
        &self,
        key: &str,
        expected: &[u8],
        ttl: Duration,
    ) -> Result<bool, Error> {
        let now = Instant::now();
        let expires_at = Self::deadline(key, now, ttl)?;
        let mut lock = self.write_data()?;
        match lock.live_entry(key, now) {
            Some(entry) if entry.value == expected => {
                entry.expires_at = expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, Error> {
        let now = Instant::now();
        let mut lock = self.write_data()?;
        lock.values.retain(|_, entry| entry.is_live(now));
        Ok(lock
            .values
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn zadd(
        &self,
        key: &str,
        score: i64,
        member: &[u8],
    ) -> Result<(), Error> {
        let mut lock = self.write_data()?;
        lock.sorted
            .entry(key.to_owned())
            .or_default()
            .insert(member.to_vec(), score);
        Ok(())
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        max: i64,
    ) -> Result<Vec<(Vec<u8>, i64)>, Error> {
        let lock = self
            .data
            .read()
            .map_err(|e| Error::Lock(format!("Can not lock data: {}", e)))?;
        let Some(set) = lock.sorted.get(key) else {
            return Ok(Vec::new());
        };
        let mut members: Vec<(Vec<u8>, i64)> = set
            .iter()
            .filter(|(_, score)| **score <= max)
            .map(|(member, score)| (member.clone(), *score))
            .collect();
        members.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(members)
    }

    async fn zrem(&self, key: &str, member: &[u8]) -> Result<bool, Error> {
        let mut lock = self.write_data()?;
        let Some(set) = lock.sorted.get_mut(key) else {
            return Ok(false);
        };
        let removed = set.remove(member).is_some();
        if set.is_empty() {
            lock.sorted.remove(key);
        }
        Ok(removed)
    }
}

#[async_trait]
impl PubSub for MemoryStore {
    async fn subscribe(&self, channel: &str) -> Result<Subscription, Error> {
        Self::check_channel(channel)?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut lock = self.channels.write().map_err(|e| {
            Error::Lock(format!("Can not lock channels: {}", e))
        })?;
        lock.entry(channel.to_owned()).or_default().push(sender);
        debug!("Subscribed to channel '{}'.", channel);
        Ok(receiver)
    }

    async fn publish(
        &self,
        channel: &str,
        payload: &[u8],
    ) -> Result<usize, Error> {
        Self::check_channel(channel)?;
        let mut lock = self.channels.write().map_err(|e| {
            Error::Lock(format!("Can not lock channels: {}", e))
        })?;
        let Some(subscribers) = lock.get_mut(channel) else {
            return Ok(0);
        };
        // Closed subscriptions are pruned while publishing.
        subscribers.retain(|sender| sender.send(payload.to_vec()).is_ok());
        let delivered = subscribers.len();
        if subscribers.is_empty() {
            lock.remove(channel);
            debug!("Channel '{}' has no subscribers left.", channel);
        }
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_store_trait;

    use tracing_test::traced_test;

    test_store_trait! {
        unit_test_memory_store: crate::memory::MemoryStore
    }

    #[tokio::test]
    async fn test_clones_share_data() {
        let store = MemoryStore::new();
        let other = store.clone();
        store
            .set_ex("shared", b"value", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(other.get("shared").await.unwrap(), Some(b"value".to_vec()));
        let mut subscription = other.subscribe("chan").await.unwrap();
        assert_eq!(store.publish("chan", b"ping").await.unwrap(), 1);
        assert_eq!(subscription.recv().await, Some(b"ping".to_vec()));
    }

    #[tokio::test]
    async fn test_del_expired_key_reports_absent() {
        let store = MemoryStore::new();
        store
            .set_ex("gone", b"value", Duration::from_millis(50))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!store.del("gone").await.unwrap());
    }

    #[tokio::test]
    async fn test_zadd_replaces_score() {
        let store = MemoryStore::new();
        store.zadd("set", 50, b"member").await.unwrap();
        store.zadd("set", 5, b"member").await.unwrap();
        assert_eq!(
            store.zrange_by_score("set", 10).await.unwrap(),
            vec![(b"member".to_vec(), 5)]
        );
    }

    #[tokio::test]
    async fn test_zero_ttl_is_rejected() {
        let store = MemoryStore::new();
        let error = store.set_ex("key", b"value", Duration::ZERO).await;
        assert!(matches!(error, Err(Error::Store(_))));
        let error = store.set_nx_ex("key", b"value", Duration::ZERO).await;
        assert!(matches!(error, Err(Error::Store(_))));
        assert_eq!(store.get("key").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_channel_is_rejected() {
        let store = MemoryStore::new();
        assert_eq!(
            store.subscribe("").await.err(),
            Some(Error::Channel("Channel name is empty".to_owned()))
        );
        assert!(matches!(store.publish("", b"x").await, Err(Error::Channel(_))));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_closed_subscriptions_are_pruned() {
        let store = MemoryStore::new();
        let subscription = store.subscribe("news").await.unwrap();
        assert!(logs_contain("Subscribed to channel 'news'."));
        drop(subscription);

        assert_eq!(store.publish("news", b"late").await.unwrap(), 0);
        assert!(logs_contain("Channel 'news' has no subscribers left."));
    }
}
