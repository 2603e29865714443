use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use forum_bus::{DeliveryContext, Subscriber, SubscriberDescriptor};
use forum_core::defaults::*;
use forum_core::{LivePush, LivePushTransport, NotifyEvent, Result};

use super::groups;
use crate::context::FlowContext;
use crate::notify::NotifyService;

/// Writes inbox rows for notify events.
pub struct NotifyFanout {
    service: NotifyService,
}

impl NotifyFanout {
    pub fn new(ctx: &FlowContext) -> Self {
        Self {
            service: ctx.notifier(),
        }
    }
}

#[async_trait]
impl Subscriber for NotifyFanout {
    type Message = NotifyEvent;

    fn descriptor(&self) -> SubscriberDescriptor {
        SubscriberDescriptor::of::<NotifyEvent>(groups::NOTIFY_FANOUT)
            .with_concurrent(NOTIFY_CONCURRENT)
            .with_ack_wait(Duration::from_secs(NOTIFY_ACK_WAIT_SECS))
    }

    async fn handle(&self, _ctx: &DeliveryContext, event: NotifyEvent) -> Result<()> {
        self.service.fanout(&event).await.map(|_| ())
    }
}

/// Hands live pushes to whatever holds the client connections.
pub struct LivePushDelivery {
    live: Arc<dyn LivePushTransport>,
}

impl LivePushDelivery {
    pub fn new(live: Arc<dyn LivePushTransport>) -> Self {
        Self { live }
    }
}

#[async_trait]
impl Subscriber for LivePushDelivery {
    type Message = LivePush;

    fn descriptor(&self) -> SubscriberDescriptor {
        SubscriberDescriptor::of::<LivePush>(groups::LIVE_PUSH)
            .with_concurrent(LIVE_PUSH_CONCURRENT)
            .with_ack_wait(Duration::from_secs(LIVE_PUSH_ACK_WAIT_SECS))
    }

    async fn handle(&self, _ctx: &DeliveryContext, push: LivePush) -> Result<()> {
        if !self.live.push(&push).await {
            debug!(user_id = push.user_id, notify_id = push.notify_id, "User not connected");
        }
        Ok(())
    }
}
