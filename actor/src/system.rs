// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor system
//!
//! The `system` module provides the `ActorSystem` type, which wires together
//! one cluster node: membership, directory, execution, messaging, reminders
//! and transport. [`SystemRef`] is the handle used by application code and
//! by actors; [`SystemRunner`] runs the node pulse.
//!

use crate::{
    actor::{Actor, ActorRef},
    cluster::{ClusterInfo, ClusterMembership, NodeId, NodeStatus},
    config::Config,
    directory::{ActorDirectory, StoreActorDirectory},
    execution::ActorExecution,
    factory::ActorFactory,
    keys::KeyGenerator,
    messaging::{ActorMessaging, ACTOR_SUBSYSTEM},
    reminders::{ActorReminders, ReminderActor, REMINDER_ACTOR_TYPE},
    transport::{MessageHandler, PubSubTransport, Transport},
    ActorId, ActorIdentity, Error,
};

use futures::future::BoxFuture;
use store::{PubSub, Store};
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use std::sync::{Arc, Weak};

pub struct ActorSystem {}

impl ActorSystem {
    /// Creates a node. The node joins the cluster when started.
    pub fn create(
        config: Config,
        store: Arc<dyn Store>,
        pubsub: Arc<dyn PubSub>,
        token: CancellationToken,
    ) -> (SystemRef, SystemRunner) {
        let keys = KeyGenerator::new(&config.cluster_name);
        let cluster = ClusterInfo::new(&config.cluster_name, &config.node_name);
        let membership = ClusterMembership::new(
            cluster.clone(),
            store.clone(),
            keys.clone(),
            config.node_entry_ttl(),
        );
        let directory: Arc<dyn ActorDirectory> = Arc::new(
            StoreActorDirectory::new(store.clone(), &config.cluster_name),
        );
        let transport: Arc<dyn Transport> = Arc::new(PubSubTransport::new(
            pubsub,
            keys.clone(),
            cluster.local_node_id(),
        ));
        let factory = ActorFactory::new();
        let execution = ActorExecution::new(
            factory.clone(),
            directory.clone(),
            cluster.clone(),
            config.actor_lifetime(),
            config.ownership_ttl(),
        );
        let messaging = ActorMessaging::new(
            cluster.clone(),
            directory.clone(),
            transport.clone(),
            execution.clone(),
            config.message_timeout(),
            config.ownership_ttl(),
        );
        let reminders = ActorReminders::new(messaging.clone());

        let system = SystemRef {
            inner: Arc::new(SystemInner {
                config,
                keys,
                cluster,
                membership,
                directory,
                transport,
                factory,
                execution,
                messaging,
                reminders,
                store,
                token,
            }),
        };
        let runner = SystemRunner::new(system.clone());
        (system, runner)
    }
}

struct SystemInner {
    config: Config,
    keys: KeyGenerator,
    cluster: ClusterInfo,
    membership: ClusterMembership,
    directory: Arc<dyn ActorDirectory>,
    transport: Arc<dyn Transport>,
    factory: ActorFactory,
    execution: ActorExecution,
    messaging: ActorMessaging,
    reminders: ActorReminders,
    store: Arc<dyn Store>,
    token: CancellationToken,
}

/// Handle to a node.
#[derive(Clone)]
pub struct SystemRef {
    inner: Arc<SystemInner>,
}

impl SystemRef {
    /// Joins the cluster: opens the transport, starts serving actor messages,
    /// registers the reminder system actor and marks the node as running.
    pub async fn start(&self) -> Result<(), Error> {
        debug!("Starting node {}...", self.node_id());
        self.inner.cluster.set_local_status(NodeStatus::Starting);

        // The transport only holds a weak handle, so dropping every
        // `SystemRef` still releases the node.
        let weak: Weak<SystemInner> = Arc::downgrade(&self.inner);
        let handler: MessageHandler = Arc::new(move |contents: Vec<u8>| -> BoxFuture<'static, ()> {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    let system = SystemRef { inner };
                    system.inner.messaging.on_message(&system, contents).await;
                }
            })
        });
        self.inner.transport.add_handler(ACTOR_SUBSYSTEM, handler);
        self.inner.transport.open().await?;
        self.inner.membership.update_cluster().await?;

        let store = self.inner.store.clone();
        let schedule_key = self.inner.keys.reminder_list();
        let pump = self.inner.config.reminder_pump();
        let window = self.inner.config.server_pulse();
        self.register_actor(REMINDER_ACTOR_TYPE, move || {
            ReminderActor::new(store.clone(), schedule_key.clone(), pump, window)
        })?;

        self.inner.cluster.set_local_status(NodeStatus::Running);
        self.inner.membership.update_cluster().await?;
        debug!("Node {} is running.", self.node_id());
        Ok(())
    }

    /// Leaves the cluster: deactivates every local actor, closes the
    /// transport and cancels the node token.
    pub async fn stop(&self) -> Result<(), Error> {
        debug!("Stopping node {}...", self.node_id());
        self.inner.cluster.set_local_status(NodeStatus::Stopping);
        if let Err(err) = self.inner.membership.update_node_entry().await {
            error!("Can not publish stopping status: {:?}", err);
        }
        self.inner.execution.kill_all_actors().await;
        self.inner.cluster.set_local_status(NodeStatus::Idle);
        if let Err(err) = self.inner.membership.update_node_entry().await {
            error!("Can not publish idle status: {:?}", err);
        }
        self.inner.transport.close().await?;
        self.inner.token.cancel();
        debug!("Node {} stopped.", self.node_id());
        Ok(())
    }

    /// Registers the constructor of an actor type.
    pub fn register_actor<A, F>(&self, actor_type: &str, factory: F) -> Result<(), Error>
    where
        A: Actor,
        F: Fn() -> A + Send + Sync + 'static,
    {
        self.inner.factory.register(actor_type, factory)
    }

    /// Reference to an actor of the cluster.
    pub fn actor<A: Actor>(
        &self,
        actor_type: &str,
        actor_id: impl Into<ActorId>,
    ) -> ActorRef<A> {
        ActorRef::new(ActorIdentity::new(actor_type, actor_id), self.clone())
    }

    /// Sends a message to the default instance of an actor type and waits
    /// for the reply.
    pub async fn send<A: Actor>(
        &self,
        actor_type: &str,
        message: A::Message,
    ) -> Result<A::Response, Error> {
        self.actor::<A>(actor_type, ActorId::default())
            .ask(message)
            .await
    }

    /// One maintenance cycle: refresh the cluster view, time out stale
    /// requests, deactivate idle actors and ping the reminders.
    pub async fn pulse(&self) {
        if let Err(err) = self.inner.membership.update_cluster().await {
            error!("Can not update cluster view: {:?}", err);
        }
        self.inner.messaging.update_pending_messages();
        self.inner.execution.kill_expired_actors().await;
        if self.inner.cluster.local_status() == NodeStatus::Running {
            if let Err(err) = self.inner.reminders.ping_reminders().await {
                error!("Can not ping reminders: {:?}", err);
            }
        }
    }

    /// Publishes the local entry and refreshes the cluster view now.
    pub async fn update_cluster(&self) -> Result<(), Error> {
        self.inner.membership.update_cluster().await
    }

    pub fn node_id(&self) -> NodeId {
        self.inner.cluster.local_node_id()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn cluster_info(&self) -> &ClusterInfo {
        &self.inner.cluster
    }

    pub fn directory(&self) -> &Arc<dyn ActorDirectory> {
        &self.inner.directory
    }

    pub fn execution(&self) -> &ActorExecution {
        &self.inner.execution
    }

    pub fn messaging(&self) -> &ActorMessaging {
        &self.inner.messaging
    }

    pub fn reminders(&self) -> &ActorReminders {
        &self.inner.reminders
    }

    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }
}

/// Runs the pulse of a node until its token is cancelled.
pub struct SystemRunner {
    system: SystemRef,
}

impl SystemRunner {
    pub(crate) fn new(system: SystemRef) -> Self {
        Self { system }
    }

    pub async fn run(&mut self) {
        debug!("Running node pulse...");
        let period = self.system.config().server_pulse();
        let mut pulse = interval_at(Instant::now() + period, period);
        let token = self.system.token().clone();
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Node pulse stopped.");
                    break;
                }
                _ = pulse.tick() => self.system.pulse().await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{
        activation::ActivationState,
        actor::{ActorContext, Handler},
    };

    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use store::MemoryStore;
    use tracing_test::traced_test;

    use std::{
        sync::atomic::{AtomicBool, AtomicU32, Ordering},
        time::Duration,
    };

    fn test_config(node_name: &str) -> Config {
        Config {
            cluster_name: "test".to_owned(),
            node_name: node_name.to_owned(),
            server_pulse_secs: 1,
            node_entry_secs: 10,
            actor_message_timeout_secs: 1,
            default_actor_lifetime_secs: 10,
            reminder_pump_secs: 1,
            ownership_grace_pulses: 2,
        }
    }

    async fn start_node(store: &MemoryStore, config: Config) -> SystemRef {
        let (system, mut runner) = ActorSystem::create(
            config,
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            CancellationToken::new(),
        );
        system.start().await.unwrap();
        tokio::spawn(async move { runner.run().await });
        system
    }

    struct Greeter;

    #[async_trait]
    impl Actor for Greeter {
        type Message = String;
        type Response = String;
    }

    #[async_trait]
    impl Handler<Greeter> for Greeter {
        async fn handle_message(
            &mut self,
            name: String,
            _ctx: &mut ActorContext<Greeter>,
        ) -> Result<String, Error> {
            if name == "boom" {
                return Err(Error::Functional("boom".to_owned()));
            }
            Ok(format!("Hello, {}", name))
        }
    }

    struct Upper;

    #[async_trait]
    impl Actor for Upper {
        type Message = String;
        type Response = String;
    }

    #[async_trait]
    impl Handler<Upper> for Upper {
        async fn handle_message(
            &mut self,
            text: String,
            _ctx: &mut ActorContext<Upper>,
        ) -> Result<String, Error> {
            Ok(text.to_uppercase())
        }
    }

    /// Greets with the name spelled by an `Upper` actor.
    struct LoudGreeter;

    #[async_trait]
    impl Actor for LoudGreeter {
        type Message = String;
        type Response = String;
    }

    #[async_trait]
    impl Handler<LoudGreeter> for LoudGreeter {
        async fn handle_message(
            &mut self,
            name: String,
            ctx: &mut ActorContext<LoudGreeter>,
        ) -> Result<String, Error> {
            let upper = ctx
                .actor::<Upper>("upper", name.as_str())
                .ask(name.clone())
                .await?;
            Ok(format!("Hello, {}", upper))
        }
    }

    /// Greeter that takes its time to deactivate.
    struct SlowStop;

    #[async_trait]
    impl Actor for SlowStop {
        type Message = String;
        type Response = String;

        async fn on_deactivate(
            &mut self,
            _ctx: &mut ActorContext<Self>,
        ) -> Result<(), Error> {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            Ok(())
        }
    }

    #[async_trait]
    impl Handler<SlowStop> for SlowStop {
        async fn handle_message(
            &mut self,
            name: String,
            _ctx: &mut ActorContext<SlowStop>,
        ) -> Result<String, Error> {
            Ok(format!("Hello, {}", name))
        }
    }

    /// Registers its reminder while activating and counts deliveries.
    #[derive(Default)]
    struct EarlyBird {
        woken: u32,
    }

    #[async_trait]
    impl Actor for EarlyBird {
        type Message = ();
        type Response = u32;

        async fn on_activate(
            &mut self,
            ctx: &mut ActorContext<Self>,
        ) -> Result<(), Error> {
            ctx.register_reminder("wake", Duration::from_secs(1)).await
        }

        async fn on_reminder(
            &mut self,
            name: &str,
            _ctx: &mut ActorContext<Self>,
        ) -> Result<(), Error> {
            if name == "wake" {
                self.woken += 1;
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Handler<EarlyBird> for EarlyBird {
        async fn handle_message(
            &mut self,
            _msg: (),
            _ctx: &mut ActorContext<EarlyBird>,
        ) -> Result<u32, Error> {
            Ok(self.woken)
        }
    }

    #[derive(Clone, Debug, Serialize, Deserialize)]
    enum RecorderMessage {
        Push(u32),
        Get,
    }

    #[derive(Default)]
    struct Recorder {
        seen: Vec<u32>,
    }

    #[async_trait]
    impl Actor for Recorder {
        type Message = RecorderMessage;
        type Response = Vec<u32>;
    }

    #[async_trait]
    impl Handler<Recorder> for Recorder {
        async fn handle_message(
            &mut self,
            msg: RecorderMessage,
            _ctx: &mut ActorContext<Recorder>,
        ) -> Result<Vec<u32>, Error> {
            match msg {
                RecorderMessage::Push(value) => {
                    self.seen.push(value);
                    Ok(Vec::new())
                }
                RecorderMessage::Get => Ok(self.seen.clone()),
            }
        }
    }

    #[derive(Clone, Debug, Serialize, Deserialize)]
    enum AlarmMessage {
        Arm,
        Fired,
    }

    #[derive(Default)]
    struct Alarm {
        fired: bool,
    }

    #[async_trait]
    impl Actor for Alarm {
        type Message = AlarmMessage;
        type Response = bool;

        async fn on_reminder(
            &mut self,
            name: &str,
            _ctx: &mut ActorContext<Self>,
        ) -> Result<(), Error> {
            if name == "wake" {
                self.fired = true;
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Handler<Alarm> for Alarm {
        async fn handle_message(
            &mut self,
            msg: AlarmMessage,
            ctx: &mut ActorContext<Alarm>,
        ) -> Result<bool, Error> {
            match msg {
                AlarmMessage::Arm => {
                    ctx.register_reminder("wake", Duration::from_secs(1)).await?;
                    Ok(self.fired)
                }
                AlarmMessage::Fired => Ok(self.fired),
            }
        }
    }

    #[derive(Clone, Debug, Serialize, Deserialize)]
    enum TickerMessage {
        Start,
        Stop,
        Ticks,
    }

    #[derive(Default)]
    struct Ticker {
        ticks: u32,
    }

    #[async_trait]
    impl Actor for Ticker {
        type Message = TickerMessage;
        type Response = u32;

        async fn on_timer(
            &mut self,
            _name: &str,
            _ctx: &mut ActorContext<Self>,
        ) -> Result<(), Error> {
            self.ticks += 1;
            Ok(())
        }
    }

    #[async_trait]
    impl Handler<Ticker> for Ticker {
        async fn handle_message(
            &mut self,
            msg: TickerMessage,
            ctx: &mut ActorContext<Ticker>,
        ) -> Result<u32, Error> {
            match msg {
                TickerMessage::Start => {
                    ctx.register_timer("tick", Duration::from_millis(100), true)?;
                    Ok(self.ticks)
                }
                TickerMessage::Stop => {
                    ctx.unregister_timer("tick");
                    Ok(self.ticks)
                }
                TickerMessage::Ticks => Ok(self.ticks),
            }
        }
    }

    #[derive(Clone, Debug, Serialize, Deserialize)]
    enum BusyMessage {
        Start,
        Block(u64),
    }

    /// Counts timer ticks handled once `stopping` is set.
    struct Busy {
        stopping: Arc<AtomicBool>,
        late: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Actor for Busy {
        type Message = BusyMessage;
        type Response = ();

        async fn on_timer(
            &mut self,
            _name: &str,
            _ctx: &mut ActorContext<Self>,
        ) -> Result<(), Error> {
            if self.stopping.load(Ordering::SeqCst) {
                self.late.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Handler<Busy> for Busy {
        async fn handle_message(
            &mut self,
            msg: BusyMessage,
            ctx: &mut ActorContext<Busy>,
        ) -> Result<(), Error> {
            match msg {
                BusyMessage::Start => {
                    ctx.register_timer("tick", Duration::from_millis(10), true)
                }
                BusyMessage::Block(millis) => {
                    tokio::time::sleep(Duration::from_millis(millis)).await;
                    Ok(())
                }
            }
        }
    }

    struct Sleeper;

    #[async_trait]
    impl Actor for Sleeper {
        type Message = u64;
        type Response = u64;
    }

    #[async_trait]
    impl Handler<Sleeper> for Sleeper {
        async fn handle_message(
            &mut self,
            millis: u64,
            _ctx: &mut ActorContext<Sleeper>,
        ) -> Result<u64, Error> {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok(millis)
        }
    }

    struct Faulty;

    #[async_trait]
    impl Actor for Faulty {
        type Message = String;
        type Response = String;

        async fn on_activate(
            &mut self,
            _ctx: &mut ActorContext<Self>,
        ) -> Result<(), Error> {
            Err(Error::Functional("refusing to start".to_owned()))
        }
    }

    #[async_trait]
    impl Handler<Faulty> for Faulty {
        async fn handle_message(
            &mut self,
            msg: String,
            _ctx: &mut ActorContext<Faulty>,
        ) -> Result<String, Error> {
            Ok(msg)
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_ask_greeter() {
        let store = MemoryStore::new();
        let system = start_node(&store, test_config("node")).await;
        system.register_actor("greeter", || Greeter).unwrap();

        let greeter = system.actor::<Greeter>("greeter", "joe");
        assert_eq!(greeter.ask("Joe".to_owned()).await.unwrap(), "Hello, Joe");
        assert!(system
            .execution()
            .is_active(&ActorIdentity::new("greeter", "joe")));
        assert_eq!(
            system
                .directory()
                .get_location(greeter.identity())
                .await
                .unwrap(),
            Some(system.node_id())
        );
        assert!(logs_contain("Registered actor type greeter."));
        system.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_handler_error_reaches_caller() {
        let store = MemoryStore::new();
        let system = start_node(&store, test_config("node")).await;
        system.register_actor("greeter", || Greeter).unwrap();

        let result = system.send::<Greeter>("greeter", "boom".to_owned()).await;
        assert_eq!(result, Err(Error::Functional("boom".to_owned())));
        // The instance survives a failing handler.
        let result = system.send::<Greeter>("greeter", "Ann".to_owned()).await;
        assert_eq!(result.unwrap(), "Hello, Ann");
        system.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_actor_calls_actor() {
        let store = MemoryStore::new();
        let system = start_node(&store, test_config("node")).await;
        system.register_actor("upper", || Upper).unwrap();
        system.register_actor("loud", || LoudGreeter).unwrap();

        let loud = system.actor::<LoudGreeter>("loud", 1);
        assert_eq!(loud.ask("Joe".to_owned()).await.unwrap(), "Hello, JOE");
        assert!(system.execution().is_active(loud.identity()));
        assert!(system
            .execution()
            .is_active(&ActorIdentity::new("upper", "Joe")));
        system.stop().await.unwrap();
        assert_eq!(system.execution().activation_count(), 0);
    }

    #[tokio::test]
    async fn test_tells_are_handled_in_order() {
        let store = MemoryStore::new();
        let system = start_node(&store, test_config("node")).await;
        system.register_actor("recorder", Recorder::default).unwrap();

        let recorder = system.actor::<Recorder>("recorder", "fifo");
        for value in 0..50 {
            recorder.tell(RecorderMessage::Push(value)).await.unwrap();
        }
        let seen = recorder.ask(RecorderMessage::Get).await.unwrap();
        assert_eq!(seen, (0..50).collect::<Vec<u32>>());
        system.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_reminder_fires() {
        let store = MemoryStore::new();
        let system = start_node(&store, test_config("node")).await;
        system.register_actor("alarm", Alarm::default).unwrap();

        let alarm = system.actor::<Alarm>("alarm", "clock");
        assert!(!alarm.ask(AlarmMessage::Arm).await.unwrap());
        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert!(alarm.ask(AlarmMessage::Fired).await.unwrap());

        // A delivered reminder leaves the schedule.
        let schedule = KeyGenerator::new("test").reminder_list();
        let due = store.zrange_by_score(&schedule, i64::MAX).await.unwrap();
        assert!(due.is_empty());
        system.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_timers() {
        let store = MemoryStore::new();
        let system = start_node(&store, test_config("node")).await;
        system.register_actor("ticker", Ticker::default).unwrap();

        let ticker = system.actor::<Ticker>("ticker", "t");
        ticker.ask(TickerMessage::Start).await.unwrap();
        assert_eq!(
            ticker.ask(TickerMessage::Start).await,
            Err(Error::TimerExists("tick".to_owned()))
        );
        tokio::time::sleep(Duration::from_millis(450)).await;
        let ticks = ticker.ask(TickerMessage::Stop).await.unwrap();
        assert!(ticks >= 2);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(ticker.ask(TickerMessage::Ticks).await.unwrap(), ticks);
        system.stop().await.unwrap();
    }

    #[tokio::test]
    #[traced_test]
    async fn test_request_times_out() {
        let store = MemoryStore::new();
        let system = start_node(&store, test_config("node")).await;
        system.register_actor("sleeper", || Sleeper).unwrap();

        let sleeper = system.actor::<Sleeper>("sleeper", "lazy");
        let result = sleeper.ask(2500).await;
        assert!(matches!(result, Err(Error::Timeout(_))));
        assert_eq!(system.messaging().pending_count(), 0);
        assert!(logs_contain("timed out."));

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert!(logs_contain("reply dropped."));
        system.stop().await.unwrap();
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failed_activation_is_torn_down() {
        let store = MemoryStore::new();
        let system = start_node(&store, test_config("node")).await;
        system.register_actor("faulty", || Faulty).unwrap();

        let faulty = system.actor::<Faulty>("faulty", "f");
        let result = faulty.ask("hi".to_owned()).await;
        assert!(matches!(result, Err(Error::Activation(_))));
        assert!(!system.execution().is_active(faulty.identity()));
        assert_eq!(
            system
                .directory()
                .get_location(faulty.identity())
                .await
                .unwrap(),
            None
        );
        assert!(logs_contain("Actor faulty/f is deactivated."));
        system.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_actor_expires() {
        let store = MemoryStore::new();
        let mut config = test_config("node");
        config.default_actor_lifetime_secs = 1;
        let system = start_node(&store, config).await;
        system.register_actor("greeter", || Greeter).unwrap();

        let greeter = system.actor::<Greeter>("greeter", "idle");
        greeter.ask("Idle".to_owned()).await.unwrap();
        assert!(system.execution().is_active(greeter.identity()));

        tokio::time::sleep(Duration::from_millis(2600)).await;
        assert!(!system.execution().is_active(greeter.identity()));
        assert_eq!(
            system
                .directory()
                .get_location(greeter.identity())
                .await
                .unwrap(),
            None
        );

        // The next message activates it again.
        assert_eq!(greeter.ask("Back".to_owned()).await.unwrap(), "Hello, Back");
        system.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_and_duplicate_types() {
        let store = MemoryStore::new();
        let system = start_node(&store, test_config("node")).await;
        system.register_actor("greeter", || Greeter).unwrap();

        assert_eq!(
            system.register_actor("greeter", || Greeter),
            Err(Error::ActorTypeExists("greeter".to_owned()))
        );
        let result = system.send::<Greeter>("nobody", "Joe".to_owned()).await;
        assert_eq!(result, Err(Error::UnknownActorType("nobody".to_owned())));
        system.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_no_running_node() {
        let store = MemoryStore::new();
        let (system, _runner) = ActorSystem::create(
            test_config("idle"),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            CancellationToken::new(),
        );
        let result = system.send::<Greeter>("greeter", "Joe".to_owned()).await;
        assert!(matches!(result, Err(Error::NoCapacity(_))));
    }

    #[tokio::test]
    async fn test_two_node_cluster() {
        let store = MemoryStore::new();
        let first = start_node(&store, test_config("first")).await;
        let second = start_node(&store, test_config("second")).await;
        for node in [&first, &second] {
            node.register_actor("greeter", || Greeter).unwrap();
        }
        first.update_cluster().await.unwrap();
        assert_eq!(first.cluster_info().node_count(), 2);
        assert_eq!(second.cluster_info().node_count(), 2);

        // Every actor has one owner, whichever node is asked.
        for id in 0..10 {
            let from_first = first.actor::<Greeter>("greeter", id);
            let from_second = second.actor::<Greeter>("greeter", id);
            assert_eq!(
                from_first.ask("a".to_owned()).await.unwrap(),
                "Hello, a"
            );
            assert_eq!(
                from_second.ask("b".to_owned()).await.unwrap(),
                "Hello, b"
            );
            let identity = ActorIdentity::new("greeter", id);
            let active = [&first, &second]
                .iter()
                .filter(|node| node.execution().is_active(&identity))
                .count();
            assert_eq!(active, 1);
        }

        first.stop().await.unwrap();
        second.update_cluster().await.unwrap();
        let members = second.cluster_info().snapshot().members;
        assert_eq!(
            members.get(&first.node_id()).map(|node| node.node_status),
            Some(NodeStatus::Idle)
        );
        second.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_request_to_non_owner_is_forwarded() {
        let store = MemoryStore::new();
        let first = start_node(&store, test_config("first")).await;
        let second = start_node(&store, test_config("second")).await;
        for node in [&first, &second] {
            node.register_actor("greeter", || Greeter).unwrap();
        }
        first.update_cluster().await.unwrap();

        let greeter = first.actor::<Greeter>("greeter", "roaming");
        greeter.ask("Joe".to_owned()).await.unwrap();
        let owner = first
            .directory()
            .get_location(greeter.identity())
            .await
            .unwrap()
            .unwrap();
        let other = if owner == first.node_id() {
            second.node_id()
        } else {
            first.node_id()
        };

        let payload = bincode::serialize(&"Ann".to_owned()).unwrap();
        let bytes = first
            .messaging()
            .request_at(
                &other,
                greeter.identity(),
                payload,
                crate::messaging::RequestKind::UserMessage,
            )
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        let reply: String = bincode::deserialize(&bytes).unwrap();
        assert_eq!(reply, "Hello, Ann");

        let active = [&first, &second]
            .iter()
            .filter(|node| node.execution().is_active(greeter.identity()))
            .count();
        assert_eq!(active, 1);
        first.stop().await.unwrap();
        second.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_reminder_registered_on_activation() {
        let store = MemoryStore::new();
        let system = start_node(&store, test_config("node")).await;
        system.register_actor("bird", EarlyBird::default).unwrap();

        let bird = system.actor::<EarlyBird>("bird", "robin");
        assert_eq!(bird.ask(()).await.unwrap(), 0);
        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(bird.ask(()).await.unwrap(), 1);

        // Still active, so the reminder is not registered again.
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(bird.ask(()).await.unwrap(), 1);
        system.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_queued_ticks_are_dropped_on_deactivation() {
        let store = MemoryStore::new();
        let system = start_node(&store, test_config("node")).await;
        let stopping = Arc::new(AtomicBool::new(false));
        let late = Arc::new(AtomicU32::new(0));
        {
            let stopping = stopping.clone();
            let late = late.clone();
            system
                .register_actor("busy", move || Busy {
                    stopping: stopping.clone(),
                    late: late.clone(),
                })
                .unwrap();
        }

        let busy = system.actor::<Busy>("busy", "b");
        busy.ask(BusyMessage::Start).await.unwrap();
        busy.tell(BusyMessage::Block(300)).await.unwrap();
        // Ticks pile up behind the blocking message.
        tokio::time::sleep(Duration::from_millis(100)).await;

        stopping.store(true, Ordering::SeqCst);
        system.execution().deactivate(busy.identity()).await.unwrap();
        assert!(!system.execution().is_active(busy.identity()));
        assert_eq!(late.load(Ordering::SeqCst), 0);
        system.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_request_during_deactivation_reactivates() {
        let store = MemoryStore::new();
        let mut config = test_config("node");
        config.default_actor_lifetime_secs = 1;
        config.actor_message_timeout_secs = 5;
        let system = start_node(&store, config).await;
        system.register_actor("slow", || SlowStop).unwrap();

        let slow = system.actor::<SlowStop>("slow", "s");
        assert_eq!(slow.ask("Joe".to_owned()).await.unwrap(), "Hello, Joe");

        let mut deactivating = false;
        for _ in 0..100 {
            let state = system
                .execution()
                .activation(slow.identity())
                .map(|activation| activation.state());
            if state == Some(ActivationState::Deactivating) {
                deactivating = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(deactivating);

        assert_eq!(slow.ask("Ann".to_owned()).await.unwrap(), "Hello, Ann");
        let state = system
            .execution()
            .activation(slow.identity())
            .map(|activation| activation.state());
        assert_eq!(state, Some(ActivationState::Active));
        system.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stopping_node_hands_new_actors_over() {
        let store = MemoryStore::new();
        let first = start_node(&store, test_config("first")).await;
        let second = start_node(&store, test_config("second")).await;
        for node in [&first, &second] {
            node.register_actor("greeter", || Greeter).unwrap();
            node.register_actor("slow", || SlowStop).unwrap();
        }
        first.update_cluster().await.unwrap();
        let ttl = Duration::from_secs(30);

        let slow = first.actor::<SlowStop>("slow", "x");
        first
            .directory()
            .put_or_get_location(slow.identity(), &first.node_id(), ttl)
            .await
            .unwrap();
        slow.ask("Joe".to_owned()).await.unwrap();
        assert!(first.execution().is_active(slow.identity()));

        let stopping = first.clone();
        let stop = tokio::spawn(async move { stopping.stop().await });
        tokio::time::sleep(Duration::from_millis(200)).await;

        // A stale claim sends the request to the stopping node.
        let greeter = second.actor::<Greeter>("greeter", "y");
        second
            .directory()
            .put_or_get_location(greeter.identity(), &first.node_id(), ttl)
            .await
            .unwrap();
        assert_eq!(greeter.ask("Ann".to_owned()).await.unwrap(), "Hello, Ann");

        stop.await.unwrap().unwrap();
        assert_eq!(first.execution().activation_count(), 0);
        assert_eq!(
            second
                .directory()
                .get_location(greeter.identity())
                .await
                .unwrap(),
            Some(second.node_id())
        );
        assert!(second.execution().is_active(greeter.identity()));
        second.stop().await.unwrap();
    }
}
