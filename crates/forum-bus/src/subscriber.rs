//! Subscriber contract.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use forum_core::defaults::{BUS_ACK_WAIT_SECS, BUS_CONCURRENT};
use forum_core::{Error, Message, Result, Transport};

use crate::envelope::{DeliveryContext, Envelope};

/// Static description of one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberDescriptor {
    pub topic: &'static str,
    /// Consumer group. Distinct groups each receive every message.
    pub group: String,
    pub transport: Transport,
    /// How long a handler may run before the message is redelivered.
    pub ack_wait: Duration,
    /// Maximum handlers in flight for this subscription.
    pub concurrent: usize,
}

impl SubscriberDescriptor {
    /// Descriptor for message type `M` in `group`, with default ack-wait and
    /// concurrency.
    pub fn of<M: Message>(group: impl Into<String>) -> Self {
        Self {
            topic: M::TOPIC,
            group: group.into(),
            transport: M::TRANSPORT,
            ack_wait: Duration::from_secs(BUS_ACK_WAIT_SECS),
            concurrent: BUS_CONCURRENT,
        }
    }

    pub fn with_ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = ack_wait;
        self
    }

    /// Set the concurrency limit (at least 1).
    pub fn with_concurrent(mut self, concurrent: usize) -> Self {
        self.concurrent = concurrent.max(1);
        self
    }
}

/// A unit of background work bound to one topic and group.
///
/// `Ok(())` acks the message. Any `Err` means "redeliver later"; a handler
/// that decides a message can never succeed logs it and returns `Ok(())`.
/// Handlers must tolerate running twice for the same message, including
/// concurrently with a redelivered copy of themselves after an ack-wait
/// timeout.
#[async_trait]
pub trait Subscriber: Send + Sync + 'static {
    type Message: Message;

    fn descriptor(&self) -> SubscriberDescriptor;

    async fn handle(&self, ctx: &DeliveryContext, message: Self::Message) -> Result<()>;
}

/// Outcome of one erased handler invocation.
#[derive(Debug)]
pub(crate) enum Handled {
    Ok,
    Failed(Error),
    /// The payload does not decode into the subscriber's message type.
    Undecodable(Error),
}

/// Object-safe form of [`Subscriber`] that decodes the envelope itself.
#[async_trait]
pub(crate) trait ErasedSubscriber: Send + Sync {
    fn descriptor(&self) -> &SubscriberDescriptor;

    fn name(&self) -> &'static str;

    async fn handle_envelope(&self, ctx: &DeliveryContext, envelope: &Envelope) -> Handled;
}

pub(crate) struct Erased<S: Subscriber> {
    inner: Arc<S>,
    descriptor: SubscriberDescriptor,
}

impl<S: Subscriber> Erased<S> {
    pub(crate) fn new(subscriber: S) -> Self {
        let descriptor = subscriber.descriptor();
        Self {
            inner: Arc::new(subscriber),
            descriptor,
        }
    }
}

#[async_trait]
impl<S: Subscriber> ErasedSubscriber for Erased<S> {
    fn descriptor(&self) -> &SubscriberDescriptor {
        &self.descriptor
    }

    fn name(&self) -> &'static str {
        std::any::type_name::<S>()
            .rsplit("::")
            .next()
            .unwrap_or("subscriber")
    }

    async fn handle_envelope(&self, ctx: &DeliveryContext, envelope: &Envelope) -> Handled {
        let message = match envelope.decode::<S::Message>() {
            Ok(message) => message,
            Err(e) => return Handled::Undecodable(e),
        };
        match self.inner.handle(ctx, message).await {
            Ok(()) => Handled::Ok,
            Err(e) => Handled::Failed(e),
        }
    }
}
