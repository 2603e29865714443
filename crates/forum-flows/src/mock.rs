//! In-process collaborators for tests and local development.
//!
//! Each mock records what it was asked to do and can be switched into a
//! failing mode to exercise redelivery.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;

use forum_core::{
    Error, GenerationBackend, ObjectStorage, RagClient, Result, WebhookMessage, WebhookSender,
};

#[derive(Debug, Clone)]
enum Scripted {
    Answer(String),
    Fail,
}

/// Chat model with scripted responses.
///
/// Resolution order for each call: the next scripted response, then the
/// first rule whose needle occurs in the prompt, then the default response.
pub struct MockChatModel {
    default_response: String,
    rules: Vec<(String, String)>,
    scripted: Mutex<VecDeque<Scripted>>,
    prompts: Mutex<Vec<String>>,
}

impl MockChatModel {
    pub fn new(default_response: impl Into<String>) -> Self {
        Self {
            default_response: default_response.into(),
            rules: Vec::new(),
            scripted: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Answer `response` to any prompt containing `needle`.
    pub fn with_rule(mut self, needle: impl Into<String>, response: impl Into<String>) -> Self {
        self.rules.push((needle.into(), response.into()));
        self
    }

    pub async fn push_answer(&self, answer: impl Into<String>) {
        self.scripted
            .lock()
            .await
            .push_back(Scripted::Answer(answer.into()));
    }

    pub async fn push_failure(&self) {
        self.scripted.lock().await.push_back(Scripted::Fail);
    }

    /// Every prompt received, in call order.
    pub async fn prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }

    pub async fn calls(&self) -> usize {
        self.prompts.lock().await.len()
    }
}

#[async_trait]
impl GenerationBackend for MockChatModel {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().await.push(prompt.to_string());

        if let Some(next) = self.scripted.lock().await.pop_front() {
            return match next {
                Scripted::Answer(answer) => Ok(answer),
                Scripted::Fail => Err(Error::Inference("simulated failure".to_string())),
            };
        }
        let answer = self
            .rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| self.default_response.clone());
        Ok(answer)
    }
}

/// One `upsert_record` call.
#[derive(Debug, Clone, PartialEq)]
pub struct RagUpsert {
    pub dataset: String,
    pub doc_id: String,
    pub content: String,
    pub metadata: JsonValue,
}

/// RAG client that records calls. Record ids are `"{dataset}:{doc_id}"`.
#[derive(Default)]
pub struct RecordingRag {
    failing: AtomicBool,
    upserts: Mutex<Vec<RagUpsert>>,
    deletes: Mutex<Vec<(String, Vec<String>)>>,
}

impl RecordingRag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn upserts(&self) -> Vec<RagUpsert> {
        self.upserts.lock().await.clone()
    }

    pub async fn deletes(&self) -> Vec<(String, Vec<String>)> {
        self.deletes.lock().await.clone()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(Error::Rag("simulated failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RagClient for RecordingRag {
    async fn upsert_record(
        &self,
        dataset: &str,
        doc_id: &str,
        content: &str,
        metadata: JsonValue,
    ) -> Result<String> {
        self.check()?;
        self.upserts.lock().await.push(RagUpsert {
            dataset: dataset.to_string(),
            doc_id: doc_id.to_string(),
            content: content.to_string(),
            metadata,
        });
        Ok(format!("{}:{}", dataset, doc_id))
    }

    async fn delete_records(&self, dataset: &str, rag_ids: &[String]) -> Result<()> {
        self.check()?;
        self.deletes
            .lock()
            .await
            .push((dataset.to_string(), rag_ids.to_vec()));
        Ok(())
    }
}

/// Webhook sender that records messages.
#[derive(Default)]
pub struct RecordingWebhook {
    failing: AtomicBool,
    messages: Mutex<Vec<WebhookMessage>>,
}

impl RecordingWebhook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Messages accepted (failed sends are not recorded).
    pub async fn messages(&self) -> Vec<WebhookMessage> {
        self.messages.lock().await.clone()
    }
}

#[async_trait]
impl WebhookSender for RecordingWebhook {
    async fn send(&self, message: &WebhookMessage) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Webhook("simulated failure".to_string()));
        }
        self.messages.lock().await.push(message.clone());
        Ok(())
    }
}

/// Object storage that records deleted prefixes.
#[derive(Default)]
pub struct RecordingStorage {
    prefixes: Mutex<Vec<String>>,
}

impl RecordingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn deleted_prefixes(&self) -> Vec<String> {
        self.prefixes.lock().await.clone()
    }
}

#[async_trait]
impl ObjectStorage for RecordingStorage {
    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        self.prefixes.lock().await.push(prefix.to_string());
        Ok(1)
    }
}
