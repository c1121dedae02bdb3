// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

// Cluster tests for the actor module

use actor::{
    Actor, ActorContext, ActorDirectory, ActorSystem, Config, Error, Handler,
    NodeStatus, SystemRef,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use store::MemoryStore;
use tokio_util::sync::CancellationToken;

use std::{sync::Arc, time::Duration};

// Defines counter command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CounterCommand {
    Increment(u64),
    Get,
    /// Increments by one every `period_ms` through a reminder.
    Schedule { period_ms: u64 },
    Unschedule,
}

#[derive(Debug, Default)]
pub struct Counter {
    value: u64,
}

#[async_trait]
impl Actor for Counter {
    type Message = CounterCommand;
    type Response = u64;

    async fn on_reminder(
        &mut self,
        name: &str,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        if name == "periodic" {
            self.value += 1;
            ctx.register_reminder("periodic", Duration::from_millis(500))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Handler<Counter> for Counter {
    async fn handle_message(
        &mut self,
        msg: CounterCommand,
        ctx: &mut ActorContext<Counter>,
    ) -> Result<u64, Error> {
        match msg {
            CounterCommand::Increment(by) => {
                self.value += by;
                Ok(self.value)
            }
            CounterCommand::Get => Ok(self.value),
            CounterCommand::Schedule { period_ms } => {
                ctx.register_reminder(
                    "periodic",
                    Duration::from_millis(period_ms),
                )
                .await?;
                Ok(self.value)
            }
            CounterCommand::Unschedule => {
                ctx.unregister_reminder("periodic").await?;
                Ok(self.value)
            }
        }
    }
}

fn config(node_name: &str) -> Config {
    Config::from_toml(&format!(
        r#"
        cluster_name = "it"
        node_name = "{}"
        server_pulse_secs = 1
        actor_message_timeout_secs = 2
        "#,
        node_name
    ))
    .unwrap()
}

async fn node(store: &MemoryStore, name: &str) -> SystemRef {
    let (system, mut runner) = ActorSystem::create(
        config(name),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        CancellationToken::new(),
    );
    system.start().await.unwrap();
    system.register_actor("counter", Counter::default).unwrap();
    tokio::spawn(async move { runner.run().await });
    system
}

async fn cluster(store: &MemoryStore, size: usize) -> Vec<SystemRef> {
    let mut nodes = Vec::new();
    for index in 0..size {
        nodes.push(node(store, &format!("node-{}", index)).await);
    }
    for node in &nodes {
        node.update_cluster().await.unwrap();
    }
    nodes
}

#[tokio::test]
async fn test_state_survives_between_messages() {
    let store = MemoryStore::new();
    let nodes = cluster(&store, 1).await;

    let counter = nodes[0].actor::<Counter>("counter", 7);
    assert_eq!(counter.ask(CounterCommand::Increment(2)).await.unwrap(), 2);
    assert_eq!(counter.ask(CounterCommand::Increment(3)).await.unwrap(), 5);
    assert_eq!(counter.ask(CounterCommand::Get).await.unwrap(), 5);

    // Another id is another instance.
    let other = nodes[0].actor::<Counter>("counter", 8);
    assert_eq!(other.ask(CounterCommand::Get).await.unwrap(), 0);
    nodes[0].stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_activation() {
    let store = MemoryStore::new();
    let nodes = cluster(&store, 3).await;

    let mut tasks = Vec::new();
    for caller in 0..30 {
        let node = nodes[caller % nodes.len()].clone();
        tasks.push(tokio::spawn(async move {
            node.actor::<Counter>("counter", "shared")
                .ask(CounterCommand::Increment(1))
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let counter = nodes[0].actor::<Counter>("counter", "shared");
    assert_eq!(counter.ask(CounterCommand::Get).await.unwrap(), 30);
    let active = nodes
        .iter()
        .filter(|node| node.execution().is_active(counter.identity()))
        .count();
    assert_eq!(active, 1);

    for node in &nodes {
        node.stop().await.unwrap();
    }
}

#[tokio::test]
async fn test_actor_moves_when_its_node_stops() {
    let store = MemoryStore::new();
    let nodes = cluster(&store, 2).await;

    let counter = nodes[0].actor::<Counter>("counter", "mover");
    counter.ask(CounterCommand::Increment(4)).await.unwrap();
    let owner = nodes[0]
        .directory()
        .get_location(counter.identity())
        .await
        .unwrap()
        .unwrap();
    let (stopping, surviving) = if owner == nodes[0].node_id() {
        (&nodes[0], &nodes[1])
    } else {
        (&nodes[1], &nodes[0])
    };

    stopping.stop().await.unwrap();
    assert_eq!(stopping.execution().activation_count(), 0);
    surviving.update_cluster().await.unwrap();
    let members = surviving.cluster_info().snapshot().members;
    assert_eq!(
        members.get(&stopping.node_id()).map(|node| node.node_status),
        Some(NodeStatus::Idle)
    );

    // State is not persisted, so the new activation starts from scratch.
    let moved = surviving.actor::<Counter>("counter", "mover");
    assert_eq!(moved.ask(CounterCommand::Get).await.unwrap(), 0);
    assert!(surviving.execution().is_active(moved.identity()));
    surviving.stop().await.unwrap();
}

#[tokio::test]
async fn test_reminder_registered_from_reminder_hook() {
    let store = MemoryStore::new();
    let nodes = cluster(&store, 1).await;

    let counter = nodes[0].actor::<Counter>("counter", "periodic");
    counter
        .ask(CounterCommand::Schedule { period_ms: 200 })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(3500)).await;
    let value = counter.ask(CounterCommand::Unschedule).await.unwrap();
    assert!(value >= 2, "reminder fired {} times", value);

    tokio::time::sleep(Duration::from_millis(2500)).await;
    let after = counter.ask(CounterCommand::Get).await.unwrap();
    assert!(after <= value + 1);
    nodes[0].stop().await.unwrap();
}

#[tokio::test]
async fn test_tell_is_one_way() {
    let store = MemoryStore::new();
    let nodes = cluster(&store, 2).await;

    let counter = nodes[1].actor::<Counter>("counter", "told");
    for _ in 0..10 {
        counter.tell(CounterCommand::Increment(1)).await.unwrap();
    }
    assert_eq!(counter.ask(CounterCommand::Get).await.unwrap(), 10);
    assert_eq!(nodes[1].messaging().pending_count(), 0);

    for node in &nodes {
        node.stop().await.unwrap();
    }
}
