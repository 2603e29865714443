use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use forum_bus::{DeliveryContext, Subscriber, SubscriberDescriptor};
use forum_core::defaults::*;
use forum_core::{DeleteInfo, KbDocumentChange, Operation, RagClient, Result};

use super::groups;
use crate::context::FlowContext;

/// Mirrors knowledge-base documents into the KB RAG dataset.
pub struct KbDocumentRagIndex {
    ctx: FlowContext,
    rag: Arc<dyn RagClient>,
}

impl KbDocumentRagIndex {
    pub fn new(ctx: FlowContext, rag: Arc<dyn RagClient>) -> Self {
        Self { ctx, rag }
    }

    async fn index(&self, document_id: i64) -> Result<()> {
        let Some(document) = self.ctx.stores.kb_documents.get(document_id).await? else {
            debug!(document_id, "KB document gone, skipping");
            return Ok(());
        };
        let rag_id = self
            .rag
            .upsert_record(
                &self.ctx.config.rag.kb_dataset,
                &document.uuid.to_string(),
                &format!("{}\n\n{}", document.title, document.content),
                json!({ "kb_document_id": document.id, "title": document.title }),
            )
            .await?;
        if document.rag_id.as_deref() != Some(rag_id.as_str()) {
            self.ctx
                .stores
                .kb_documents
                .set_rag_id(document.id, Some(&rag_id))
                .await?;
        }
        debug!(document_id, rag_id = %rag_id, "KB document indexed");
        Ok(())
    }

    async fn remove(&self, document_id: i64, info: DeleteInfo) -> Result<()> {
        let rag_id = match info.rag_id {
            Some(rag_id) => Some(rag_id),
            None => self
                .ctx
                .stores
                .kb_documents
                .get(document_id)
                .await?
                .and_then(|d| d.rag_id),
        };
        let Some(rag_id) = rag_id else {
            debug!(document_id, "KB document was never indexed");
            return Ok(());
        };
        self.rag
            .delete_records(&self.ctx.config.rag.kb_dataset, &[rag_id])
            .await
    }
}

#[async_trait]
impl Subscriber for KbDocumentRagIndex {
    type Message = KbDocumentChange;

    fn descriptor(&self) -> SubscriberDescriptor {
        SubscriberDescriptor::of::<KbDocumentChange>(groups::KB_RAG)
            .with_concurrent(KB_RAG_CONCURRENT)
            .with_ack_wait(Duration::from_secs(KB_RAG_ACK_WAIT_SECS))
    }

    async fn handle(&self, _ctx: &DeliveryContext, event: KbDocumentChange) -> Result<()> {
        match event.op {
            Operation::Insert | Operation::Update => self.index(event.id).await,
            Operation::Delete(info) => self.remove(event.id, info).await,
        }
    }
}
