//! Shared fixture: in-memory store, in-process bus and recording
//! collaborators wired into a [`FlowContext`].

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};

use forum_bus::{
    Bus, DeliveryContext, Dispatcher, DispatcherConfig, DispatcherHandle, InProcessQueue,
    SubscriberDescriptor,
};
use forum_core::{Message, Transport, User, UserRepository, UserRole};
use forum_db::MemoryStore;
use forum_flows::mock::{MockChatModel, RecordingRag, RecordingStorage, RecordingWebhook};
use forum_flows::{register_all, BotConfig, FlowConfig, FlowContext, LiveHub, Stores};

pub struct Harness {
    pub store: MemoryStore,
    pub bus: Bus,
    pub local: InProcessQueue,
    pub durable: InProcessQueue,
    pub model: Arc<MockChatModel>,
    pub rag: Arc<RecordingRag>,
    pub webhook: Arc<RecordingWebhook>,
    pub storage: Arc<RecordingStorage>,
    pub live: Arc<LiveHub>,
    pub ctx: FlowContext,
    pub bot: User,
    pub admins: Vec<User>,
    descriptors: Vec<SubscriberDescriptor>,
}

impl Harness {
    pub async fn new(model: MockChatModel) -> Self {
        Self::with_bot(model, |bot| bot).await
    }

    /// Fixture whose bot settings are adjusted by `tune`.
    pub async fn with_bot(model: MockChatModel, tune: impl FnOnce(BotConfig) -> BotConfig) -> Self {
        let store = MemoryStore::new();
        let bot = store.add_user("forum-bot", UserRole::Normal).await;
        let admins = vec![
            store.add_user("alice", UserRole::Admin).await,
            store.add_user("bob", UserRole::Admin).await,
        ];

        let local = InProcessQueue::new();
        let durable = InProcessQueue::with_transport(Transport::Durable);
        let bus = Bus::new(Arc::new(local.clone()), Arc::new(durable.clone()));

        let model = Arc::new(model);
        let rag = Arc::new(RecordingRag::new());
        let webhook = Arc::new(RecordingWebhook::new());
        let storage = Arc::new(RecordingStorage::new());
        let live = Arc::new(LiveHub::new());

        let config =
            FlowConfig::default().with_bot(tune(BotConfig::default().with_user_id(bot.id)));
        let ctx = FlowContext::new(Stores::memory(&store), bus.clone(), config)
            .with_model(model.clone())
            .with_rag(rag.clone())
            .with_webhook(webhook.clone())
            .with_storage(storage.clone())
            .with_live(live.clone());
        let descriptors = register_all(&ctx).expect("registry builds").descriptors();

        Self {
            store,
            bus,
            local,
            durable,
            model,
            rag,
            webhook,
            storage,
            live,
            ctx,
            bot,
            admins,
            descriptors,
        }
    }

    /// Start a dispatcher with fast polling and redelivery.
    pub async fn start(&self) -> DispatcherHandle {
        let config = DispatcherConfig::default()
            .with_poll_interval(5)
            .with_redeliver_delay(5)
            .with_max_deliver(4);
        Dispatcher::new(self.bus.clone(), config)
            .start(register_all(&self.ctx).expect("registry builds"))
            .await
            .expect("dispatcher starts")
    }

    /// Wait until every group has acked or dead-lettered everything,
    /// including messages emitted by handlers along the way.
    pub async fn settle(&self) {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let mut pending = 0;
            for d in &self.descriptors {
                let queue = match d.transport {
                    Transport::InProcess => &self.local,
                    Transport::Durable => &self.durable,
                };
                pending += queue.pending(d.topic, &d.group).await;
            }
            if pending == 0 {
                return;
            }
            assert!(
                Instant::now() < deadline,
                "queues did not drain, {} messages pending",
                pending
            );
            sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn user(&self, name: &str) -> User {
        self.store.add_user(name, UserRole::Normal).await
    }

    pub async fn points(&self, user_id: i64) -> i64 {
        UserRepository::get(&self.store, user_id)
            .await
            .unwrap()
            .expect("user exists")
            .point
    }

    pub fn admin_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.admins.iter().map(|u| u.id).collect();
        ids.sort();
        ids
    }
}

/// Context of delivery number `n` of an `M` to `group`.
pub fn attempt<M: Message>(group: &str, n: u32) -> DeliveryContext {
    DeliveryContext::for_attempt(M::TOPIC, group, n)
}
