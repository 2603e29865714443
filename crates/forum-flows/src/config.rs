//! Workflow configuration.

use std::time::Duration;

use forum_core::defaults;
use forum_core::PointConfig;

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| v != "false" && v != "0")
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse::<T>().ok())
}

/// AI answering bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotConfig {
    pub enabled: bool,
    /// System account that posts answers. Notifications addressed to it go
    /// to every admin. Without it the bot workflows are not registered.
    pub user_id: Option<i64>,
    /// Model output meaning "could not answer".
    pub default_answer: String,
    /// Comment posted when the bot gives up. Empty posts nothing.
    pub unknown_prompt: String,
    /// Deliveries on which an unknown answer is deferred for another try.
    pub unknown_retry_threshold: u32,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            user_id: None,
            default_answer: defaults::BOT_DEFAULT_ANSWER.to_string(),
            unknown_prompt: String::new(),
            unknown_retry_threshold: defaults::BOT_UNKNOWN_RETRY_THRESHOLD,
        }
    }
}

impl BotConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `BOT_ENABLED` | `true` | Enable AI answers |
    /// | `BOT_USER_ID` | unset | Bot account id |
    /// | `BOT_DEFAULT_ANSWER` | `I don't know.` | Unknown-answer sentinel |
    /// | `BOT_UNKNOWN_PROMPT` | empty | Fallback comment when unknown |
    /// | `BOT_UNKNOWN_RETRY_THRESHOLD` | `1` | Deliveries that may defer an unknown answer |
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            enabled: env_bool("BOT_ENABLED", base.enabled),
            user_id: env_parse("BOT_USER_ID").or(base.user_id),
            default_answer: std::env::var("BOT_DEFAULT_ANSWER").unwrap_or(base.default_answer),
            unknown_prompt: std::env::var("BOT_UNKNOWN_PROMPT").unwrap_or(base.unknown_prompt),
            unknown_retry_threshold: env_parse("BOT_UNKNOWN_RETRY_THRESHOLD")
                .unwrap_or(base.unknown_retry_threshold),
        }
    }

    pub fn with_user_id(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_default_answer(mut self, answer: impl Into<String>) -> Self {
        self.default_answer = answer.into();
        self
    }

    pub fn with_unknown_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.unknown_prompt = prompt.into();
        self
    }

    pub fn with_unknown_retry_threshold(mut self, threshold: u32) -> Self {
        self.unknown_retry_threshold = threshold;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Whether a model response is the "could not answer" sentinel.
    pub fn is_unknown(&self, answer: &str) -> bool {
        let answer = answer.trim();
        answer.is_empty() || answer.eq_ignore_ascii_case(self.default_answer.trim())
    }
}

/// RAG dataset names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RagConfig {
    pub forum_dataset: String,
    pub kb_dataset: String,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            forum_dataset: defaults::RAG_FORUM_DATASET.to_string(),
            kb_dataset: defaults::RAG_KB_DATASET.to_string(),
        }
    }
}

impl RagConfig {
    /// | Variable | Default |
    /// |----------|---------|
    /// | `RAG_FORUM_DATASET` | `forum` |
    /// | `RAG_KB_DATASET` | `kb` |
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            forum_dataset: std::env::var("RAG_FORUM_DATASET").unwrap_or(base.forum_dataset),
            kb_dataset: std::env::var("RAG_KB_DATASET").unwrap_or(base.kb_dataset),
        }
    }
}

/// Outbound webhook channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    pub urls: Vec<String>,
    /// HMAC-SHA256 signing secret. Unsigned when `None`.
    pub secret: Option<String>,
    pub timeout: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            secret: None,
            timeout: Duration::from_secs(defaults::WEBHOOK_TIMEOUT_SECS),
        }
    }
}

impl WebhookConfig {
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `WEBHOOK_URLS` | empty | Comma-separated endpoints |
    /// | `WEBHOOK_SECRET` | unset | Signing secret |
    /// | `WEBHOOK_TIMEOUT_SECS` | `10` | Per-request timeout |
    pub fn from_env() -> Self {
        let urls = std::env::var("WEBHOOK_URLS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Self {
            urls,
            secret: std::env::var("WEBHOOK_SECRET").ok().filter(|s| !s.is_empty()),
            timeout: Duration::from_secs(
                env_parse("WEBHOOK_TIMEOUT_SECS").unwrap_or(defaults::WEBHOOK_TIMEOUT_SECS),
            ),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.urls.is_empty()
    }
}

/// Everything the workflows read from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowConfig {
    pub bot: BotConfig,
    pub points: PointConfig,
    pub rag: RagConfig,
    pub webhook: WebhookConfig,
}

impl FlowConfig {
    pub fn from_env() -> Self {
        Self {
            bot: BotConfig::from_env(),
            points: PointConfig::from_env(),
            rag: RagConfig::from_env(),
            webhook: WebhookConfig::from_env(),
        }
    }

    pub fn with_bot(mut self, bot: BotConfig) -> Self {
        self.bot = bot;
        self
    }

    pub fn with_points(mut self, points: PointConfig) -> Self {
        self.points = points;
        self
    }
}
