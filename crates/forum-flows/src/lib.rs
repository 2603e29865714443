//! # forum-flows
//!
//! The forum's background workflows: AI answers, RAG indexing, summaries,
//! trend stats, webhooks, the delete cascade, the point ledger and
//! notification fan-out.
//!
//! Every workflow is a [`forum_bus::Subscriber`] over a [`FlowContext`].
//! [`register_all`] builds the registry a worker hands to the dispatcher.
//!
//! ```ignore
//! let ctx = FlowContext::new(Stores::postgres(&db), bus.clone(), FlowConfig::from_env())
//!     .with_model(Arc::new(OpenAiChatModel::from_env()?));
//! let handle = Dispatcher::new(bus, DispatcherConfig::from_env())
//!     .start(register_all(&ctx)?)
//!     .await?;
//! ```

pub mod adapters;
pub mod config;
pub mod context;
pub mod ledger;
pub mod mock;
pub mod notify;
pub mod prompt;
pub mod stores;
pub mod subscribers;
pub mod webhook;

pub use adapters::{OpenAiChatModel, OpenAiConfig};
pub use config::{BotConfig, FlowConfig, RagConfig, WebhookConfig};
pub use context::FlowContext;
pub use ledger::{PointLedger, LIKE_TYPES};
pub use notify::{LiveHub, NotifyService};
pub use prompt::PlainPromptRenderer;
pub use stores::Stores;
pub use subscribers::{groups, register_all};
pub use webhook::HttpWebhookSender;
