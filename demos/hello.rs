// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Two nodes sharing an in-memory store. Greets a few actors from both
//! nodes and shows where each one got activated.
//!
//! Run with `cargo run --example hello [config.toml]`; `RUST_LOG` selects the
//! log level (default `info`).

use async_trait::async_trait;
use grove_rs::{
    Actor, ActorContext, ActorError, ActorSystem, Config, Handler, MemoryStore,
    SystemRef,
};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use std::sync::Arc;

struct Greeter {
    greeted: u32,
}

#[async_trait]
impl Actor for Greeter {
    type Message = String;
    type Response = String;

    async fn on_activate(
        &mut self,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), ActorError> {
        info!("Greeter {} activated on {}.", ctx.actor_id(), ctx.system().node_id());
        Ok(())
    }
}

#[async_trait]
impl Handler<Greeter> for Greeter {
    async fn handle_message(
        &mut self,
        name: String,
        ctx: &mut ActorContext<Greeter>,
    ) -> Result<String, ActorError> {
        self.greeted += 1;
        Ok(format!(
            "Hello, {} (greeting #{} from {})",
            name,
            self.greeted,
            ctx.actor_id()
        ))
    }
}

fn setup_logging() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

async fn start_node(
    store: &MemoryStore,
    config: Config,
) -> Result<SystemRef, ActorError> {
    let (system, mut runner) = ActorSystem::create(
        config,
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        CancellationToken::new(),
    );
    system.start().await?;
    system.register_actor("greeter", || Greeter { greeted: 0 })?;
    tokio::spawn(async move { runner.run().await });
    Ok(system)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    setup_logging()?;

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(path).await?,
        None => Config::default(),
    };

    let store = MemoryStore::new();
    let mut first_config = config.clone();
    first_config.node_name = "first".to_owned();
    let mut second_config = config;
    second_config.node_name = "second".to_owned();

    let first = start_node(&store, first_config).await?;
    let second = start_node(&store, second_config).await?;
    first.update_cluster().await?;
    info!(
        "Cluster {} has {} nodes.",
        first.cluster_info().cluster_name(),
        first.cluster_info().node_count()
    );

    for name in ["Joe", "Ann", "Bob"] {
        for node in [&first, &second] {
            let greeting = node
                .actor::<Greeter>("greeter", name)
                .ask(name.to_owned())
                .await?;
            info!("{}", greeting);
        }
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted."),
        _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => {}
    }

    first.stop().await?;
    second.stop().await?;
    Ok(())
}
