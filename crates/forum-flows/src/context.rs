//! Shared dependencies of every workflow.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};

use forum_bus::Bus;
use forum_core::{
    GenerationBackend, LivePushTransport, ObjectStorage, PromptRenderer, RagClient, WebhookSender,
};

use crate::config::FlowConfig;
use crate::ledger::PointLedger;
use crate::notify::{LiveHub, NotifyService};
use crate::prompt::PlainPromptRenderer;
use crate::stores::Stores;

/// Stores, bus, configuration and external collaborators.
///
/// Collaborators left as `None` disable the workflows that need them; see
/// [`crate::register_all`].
#[derive(Clone)]
pub struct FlowContext {
    pub stores: Stores,
    pub bus: Bus,
    pub config: FlowConfig,
    pub model: Option<Arc<dyn GenerationBackend>>,
    pub rag: Option<Arc<dyn RagClient>>,
    pub storage: Option<Arc<dyn ObjectStorage>>,
    pub webhook: Option<Arc<dyn WebhookSender>>,
    pub live: Arc<dyn LivePushTransport>,
    pub prompts: Arc<dyn PromptRenderer>,
}

impl FlowContext {
    pub fn new(stores: Stores, bus: Bus, config: FlowConfig) -> Self {
        let prompts = PlainPromptRenderer::new(config.bot.default_answer.clone());
        Self {
            stores,
            bus,
            config,
            model: None,
            rag: None,
            storage: None,
            webhook: None,
            live: Arc::new(LiveHub::new()),
            prompts: Arc::new(prompts),
        }
    }

    pub fn with_model(mut self, model: Arc<dyn GenerationBackend>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_rag(mut self, rag: Arc<dyn RagClient>) -> Self {
        self.rag = Some(rag);
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn ObjectStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_webhook(mut self, webhook: Arc<dyn WebhookSender>) -> Self {
        self.webhook = Some(webhook);
        self
    }

    pub fn with_live(mut self, live: Arc<dyn LivePushTransport>) -> Self {
        self.live = live;
        self
    }

    pub fn with_prompts(mut self, prompts: Arc<dyn PromptRenderer>) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn ledger(&self) -> PointLedger {
        PointLedger::new(self.stores.points.clone(), self.config.points.clone())
    }

    pub fn notifier(&self) -> NotifyService {
        NotifyService::new(
            self.stores.users.clone(),
            self.stores.notifies.clone(),
            self.bus.clone(),
            self.webhook.clone(),
            self.config.bot.user_id,
        )
    }

    pub fn bot_user_id(&self) -> Option<i64> {
        self.config.bot.user_id
    }
}

/// Current UTC day, the bucket for stats.
pub(crate) fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// First `max` characters of `text`, on a char boundary.
pub(crate) fn excerpt(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
