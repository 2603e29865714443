//! Notification fan-out and the live push hub.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use forum_bus::Bus;
use forum_core::defaults::LIVE_PUSH_BUFFER;
use forum_core::{
    LivePush, LivePushTransport, MessageNotify, NewMessageNotify, NotifyEvent, NotifyKind,
    NotifyRepository, Result, UserRepository, WebhookMessage, WebhookSender,
};

/// Persists notifications and pushes them to connected clients.
#[derive(Clone)]
pub struct NotifyService {
    users: Arc<dyn UserRepository>,
    notifies: Arc<dyn NotifyRepository>,
    bus: Bus,
    webhook: Option<Arc<dyn WebhookSender>>,
    bot_user_id: Option<i64>,
}

impl NotifyService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        notifies: Arc<dyn NotifyRepository>,
        bus: Bus,
        webhook: Option<Arc<dyn WebhookSender>>,
        bot_user_id: Option<i64>,
    ) -> Self {
        Self {
            users,
            notifies,
            bus,
            webhook,
            bot_user_id,
        }
    }

    /// Recipients of an event. The bot has no inbox: its mail goes to every
    /// admin.
    pub async fn recipients(&self, event: &NotifyEvent) -> Result<Vec<i64>> {
        if Some(event.to_user_id) == self.bot_user_id {
            self.users.list_admin_ids().await
        } else {
            Ok(vec![event.to_user_id])
        }
    }

    /// Write one inbox row per recipient and push the new ones live.
    ///
    /// Rows that already exist are left alone and not pushed again, so a
    /// redelivered event is a no-op. Returns the rows created by this call.
    ///
    /// Webhook kinds are sent only when this call created rows. The webhook
    /// is best-effort: if the process stops after the rows are written but
    /// before the send, the redelivered event finds the rows and the webhook
    /// is not sent.
    pub async fn fanout(&self, event: &NotifyEvent) -> Result<Vec<MessageNotify>> {
        let recipients = self.recipients(event).await?;
        if recipients.is_empty() {
            warn!(kind = %event.kind, to_user_id = event.to_user_id, "Notification has no recipients");
            return Ok(Vec::new());
        }

        let from_user_name = match self.users.get(event.from_user_id).await? {
            Some(user) => user.name,
            None => format!("user#{}", event.from_user_id),
        };

        let mut created = Vec::new();
        for user_id in recipients {
            let Some(recipient) = self.users.get(user_id).await? else {
                warn!(user_id, kind = %event.kind, "Notification recipient not found, skipping");
                continue;
            };

            let row = self
                .notifies
                .create_if_absent(NewMessageNotify {
                    user_id,
                    user_name: recipient.name,
                    from_user_id: event.from_user_id,
                    from_user_name: from_user_name.clone(),
                    kind: event.kind,
                    discussion_id: event.discussion_id,
                    comment_id: event.comment_id,
                    content: event.content.clone(),
                })
                .await?;

            match row {
                Some(row) => {
                    // Inbox row is committed; a failed push only delays delivery.
                    self.bus
                        .emit(&LivePush {
                            user_id,
                            notify_id: row.id,
                            kind: row.kind,
                            content: row.content.clone(),
                        })
                        .await;
                    created.push(row);
                }
                None => debug!(user_id, kind = %event.kind, "Notification already recorded"),
            }
        }

        if !created.is_empty() {
            info!(kind = %event.kind, recipients = created.len(), "Notifications recorded");
            if event.kind.triggers_webhook() {
                self.send_webhook(event).await;
            }
        }
        Ok(created)
    }

    async fn send_webhook(&self, event: &NotifyEvent) {
        let Some(webhook) = &self.webhook else {
            return;
        };
        let message = WebhookMessage {
            event: format!("notify.{}", event.kind),
            title: webhook_title(event.kind).to_string(),
            content: event.content.clone(),
            discussion_id: event.discussion_id,
        };
        if let Err(e) = webhook.send(&message).await {
            warn!(kind = %event.kind, error = %e, "Webhook delivery failed");
        }
    }
}

fn webhook_title(kind: NotifyKind) -> &'static str {
    match kind {
        NotifyKind::BotUnknown => "Bot could not answer a question",
        NotifyKind::HumanHelp => "A user asked for human help",
        NotifyKind::Comment => "New comment",
        NotifyKind::Reply => "New reply",
        NotifyKind::CommentLiked => "Comment liked",
    }
}

/// In-process registry of live client connections.
///
/// Each connected user has one broadcast channel; every open connection of
/// that user holds a receiver.
#[derive(Default)]
pub struct LiveHub {
    channels: Mutex<HashMap<i64, broadcast::Sender<LivePush>>>,
}

impl LiveHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a connection for `user_id`.
    pub async fn connect(&self, user_id: i64) -> broadcast::Receiver<LivePush> {
        let mut channels = self.channels.lock().await;
        channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(LIVE_PUSH_BUFFER).0)
            .subscribe()
    }

    /// Number of open connections for a user.
    pub async fn connections(&self, user_id: i64) -> usize {
        self.channels
            .lock()
            .await
            .get(&user_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl LivePushTransport for LiveHub {
    async fn push(&self, payload: &LivePush) -> bool {
        let mut channels = self.channels.lock().await;
        let Some(tx) = channels.get(&payload.user_id) else {
            return false;
        };
        if tx.send(payload.clone()).is_ok() {
            return true;
        }
        // Every receiver is gone.
        channels.remove(&payload.user_id);
        false
    }
}
