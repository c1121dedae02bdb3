// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Shared Store Contract
//!
//! The cluster keeps two kinds of shared state outside of any node: the actor
//! location records (one owner per actor identity) and the reminder schedule.
//! Nodes also talk to each other through publish/subscribe channels. This
//! module defines the operations a backend must offer for all of that.
//!
//! ## Atomicity Requirements
//!
//! Two operations carry the single-owner guarantee of the actor directory and
//! must be atomic against the backend:
//!
//! - [`Store::set_nx_ex`]: create the key only if it does not exist, with a
//!   time-to-live. Among concurrent writers exactly one succeeds.
//! - [`Store::expire_if_eq`]: refresh the time-to-live of a key only if its
//!   current value equals the expected one. The comparison and the refresh
//!   form a single step, never a read followed by a write.
//!
//! ## Expiry
//!
//! Keys written with a time-to-live disappear once it elapses. A backend may
//! expire keys lazily, but an expired key must never be observable.
//!
//! ## Sorted Sets
//!
//! Sorted sets map members (opaque bytes) to integer scores and support range
//! queries by maximum score. They hold the durable reminder schedule.
//!
//! ## Publish/Subscribe
//!
//! Channels are fire-and-forget: a message published on a channel without
//! subscribers is dropped and `publish` reports zero receivers.
//!

use crate::error::Error;

use async_trait::async_trait;
use tokio::sync::mpsc;

use std::time::Duration;

/// Receiving side of a channel subscription. Dropping it unsubscribes.
pub type Subscription = mpsc::UnboundedReceiver<Vec<u8>>;

/// Key-value store with expiring keys, conditional renewal and sorted sets.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Gets the value of a key, `None` if it does not exist or has expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error>;

    /// Sets a key unconditionally with the given time-to-live.
    async fn set_ex(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<(), Error>;

    /// Sets a key with the given time-to-live only if it does not exist.
    ///
    /// # Returns
    ///
    /// `true` if this call created the key, `false` if another value was
    /// already present.
    ///
    async fn set_nx_ex(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, Error>;

    /// Deletes a key. Returns whether a key was removed.
    async fn del(&self, key: &str) -> Result<bool, Error>;

    /// Atomically refreshes the time-to-live of a key if its current value is
    /// `expected`. The entry is left untouched otherwise.
    ///
    /// # Returns
    ///
    /// `true` if the value matched and the time-to-live was refreshed.
    ///
    async fn expire_if_eq(
        &self,
        key: &str,
        expected: &[u8],
        ttl: Duration,
    ) -> Result<bool, Error>;

    /// Lists the live keys starting with `prefix`.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, Error>;

    /// Adds a member to a sorted set, replacing its score if present.
    async fn zadd(
        &self,
        key: &str,
        score: i64,
        member: &[u8],
    ) -> Result<(), Error>;

    /// Returns the members of a sorted set with a score lower or equal to
    /// `max`, ordered by ascending score.
    async fn zrange_by_score(
        &self,
        key: &str,
        max: i64,
    ) -> Result<Vec<(Vec<u8>, i64)>, Error>;

    /// Removes a member from a sorted set. Returns whether it was present.
    async fn zrem(&self, key: &str, member: &[u8]) -> Result<bool, Error>;
}

/// Publish/subscribe channels.
#[async_trait]
pub trait PubSub: Send + Sync + 'static {
    /// Subscribes to a channel.
    async fn subscribe(&self, channel: &str) -> Result<Subscription, Error>;

    /// Publishes a payload on a channel.
    ///
    /// # Returns
    ///
    /// The number of subscribers that received the payload.
    ///
    async fn publish(&self, channel: &str, payload: &[u8])
        -> Result<usize, Error>;
}

/// Stamps the store contract tests onto a `Store + PubSub` implementation
/// that implements `Default`.
#[macro_export]
macro_rules! test_store_trait {
    ($name:ident: $type:ty) => {
        #[cfg(test)]
        mod $name {
            use super::*;
            use $crate::database::{PubSub, Store};

            use std::sync::Arc;
            use std::time::Duration;

            const TTL: Duration = Duration::from_secs(60);

            #[tokio::test]
            async fn test_set_get_del() {
                let store = <$type>::default();
                assert_eq!(store.get("key").await.unwrap(), None);
                store.set_ex("key", b"value", TTL).await.unwrap();
                assert_eq!(
                    store.get("key").await.unwrap(),
                    Some(b"value".to_vec())
                );
                assert!(store.del("key").await.unwrap());
                assert!(!store.del("key").await.unwrap());
                assert_eq!(store.get("key").await.unwrap(), None);
            }

            #[tokio::test]
            async fn test_set_nx_keeps_first_writer() {
                let store = <$type>::default();
                assert!(store.set_nx_ex("owner", b"node-1", TTL).await.unwrap());
                assert!(!store.set_nx_ex("owner", b"node-2", TTL).await.unwrap());
                assert_eq!(
                    store.get("owner").await.unwrap(),
                    Some(b"node-1".to_vec())
                );
            }

            #[tokio::test]
            async fn test_concurrent_set_nx_single_winner() {
                let store = Arc::new(<$type>::default());
                let mut tasks = Vec::new();
                for i in 0..32 {
                    let store = store.clone();
                    tasks.push(tokio::spawn(async move {
                        let value = format!("node-{}", i);
                        store
                            .set_nx_ex("contended", value.as_bytes(), TTL)
                            .await
                            .unwrap()
                    }));
                }
                let mut winners = 0;
                for task in tasks {
                    if task.await.unwrap() {
                        winners += 1;
                    }
                }
                assert_eq!(winners, 1);
            }

            #[tokio::test]
            async fn test_expire_if_eq() {
                let store = <$type>::default();
                assert!(!store
                    .expire_if_eq("lease", b"node-1", TTL)
                    .await
                    .unwrap());
                store
                    .set_ex("lease", b"node-1", Duration::from_millis(200))
                    .await
                    .unwrap();
                assert!(!store
                    .expire_if_eq("lease", b"node-2", TTL)
                    .await
                    .unwrap());
                assert!(store
                    .expire_if_eq("lease", b"node-1", TTL)
                    .await
                    .unwrap());
                tokio::time::sleep(Duration::from_millis(400)).await;
                assert_eq!(
                    store.get("lease").await.unwrap(),
                    Some(b"node-1".to_vec())
                );
            }

            #[tokio::test]
            async fn test_key_expiry() {
                let store = <$type>::default();
                store
                    .set_ex("short", b"value", Duration::from_millis(100))
                    .await
                    .unwrap();
                tokio::time::sleep(Duration::from_millis(250)).await;
                assert_eq!(store.get("short").await.unwrap(), None);
                assert!(store
                    .set_nx_ex("short", b"other", TTL)
                    .await
                    .unwrap());
            }

            #[tokio::test]
            async fn test_keys_by_prefix() {
                let store = <$type>::default();
                store.set_ex("node/a", b"1", TTL).await.unwrap();
                store.set_ex("node/b", b"2", TTL).await.unwrap();
                store.set_ex("other/c", b"3", TTL).await.unwrap();
                let mut keys = store.keys("node/").await.unwrap();
                keys.sort();
                assert_eq!(keys, vec!["node/a".to_owned(), "node/b".to_owned()]);
            }

            #[tokio::test]
            async fn test_sorted_set() {
                let store = <$type>::default();
                store.zadd("schedule", 30, b"c").await.unwrap();
                store.zadd("schedule", 10, b"a").await.unwrap();
                store.zadd("schedule", 20, b"b").await.unwrap();
                let range = store.zrange_by_score("schedule", 20).await.unwrap();
                assert_eq!(range, vec![(b"a".to_vec(), 10), (b"b".to_vec(), 20)]);
                assert!(store.zrem("schedule", b"a").await.unwrap());
                assert!(!store.zrem("schedule", b"a").await.unwrap());
                let range = store.zrange_by_score("schedule", 100).await.unwrap();
                assert_eq!(range, vec![(b"b".to_vec(), 20), (b"c".to_vec(), 30)]);
            }

            #[tokio::test]
            async fn test_publish_subscribe() {
                let store = <$type>::default();
                assert_eq!(store.publish("chan", b"lost").await.unwrap(), 0);
                let mut first = store.subscribe("chan").await.unwrap();
                let mut second = store.subscribe("chan").await.unwrap();
                assert_eq!(store.publish("chan", b"hello").await.unwrap(), 2);
                assert_eq!(first.recv().await, Some(b"hello".to_vec()));
                assert_eq!(second.recv().await, Some(b"hello".to_vec()));
                drop(second);
                assert_eq!(store.publish("chan", b"again").await.unwrap(), 1);
                assert_eq!(first.recv().await, Some(b"again".to_vec()));
            }
        }
    };
}
