//! Dispatcher runtime: claims messages per subscription and runs handlers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use forum_core::defaults::{
    BUS_EVENT_CAPACITY, BUS_MAX_DELIVER, BUS_POLL_INTERVAL_MS, BUS_REDELIVER_DELAY_MS,
};
use forum_core::{Error, Result};

use crate::backend::QueueBackend;
use crate::bus::Bus;
use crate::envelope::{Delivery, DeliveryContext};
use crate::registry::SubscriberRegistry;
use crate::subscriber::{ErasedSubscriber, Handled};

/// Configuration for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Longest idle wait between claims when a queue is empty.
    pub poll_interval_ms: u64,
    /// Deliveries after which a message is dead-lettered.
    pub max_deliver: u32,
    /// Delay before a failed message is visible again.
    pub redeliver_delay_ms: u64,
    /// Whether to run subscribers at all.
    pub enabled: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: BUS_POLL_INTERVAL_MS,
            max_deliver: BUS_MAX_DELIVER,
            redeliver_delay_ms: BUS_REDELIVER_DELAY_MS,
            enabled: true,
        }
    }
}

impl DispatcherConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `BUS_ENABLED` | `true` | Enable/disable message dispatch |
    /// | `BUS_POLL_INTERVAL_MS` | `500` | Idle wait when a queue is empty |
    /// | `BUS_MAX_DELIVER` | `10` | Deliveries before dead-lettering |
    /// | `BUS_REDELIVER_DELAY_MS` | `1000` | Delay before a failed message is retried |
    pub fn from_env() -> Self {
        let enabled = std::env::var("BUS_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let poll_interval_ms = std::env::var("BUS_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(BUS_POLL_INTERVAL_MS);

        let max_deliver = std::env::var("BUS_MAX_DELIVER")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(BUS_MAX_DELIVER)
            .max(1);

        let redeliver_delay_ms = std::env::var("BUS_REDELIVER_DELAY_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(BUS_REDELIVER_DELAY_MS);

        Self {
            poll_interval_ms,
            max_deliver,
            redeliver_delay_ms,
            enabled,
        }
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_max_deliver(mut self, max_deliver: u32) -> Self {
        self.max_deliver = max_deliver.max(1);
        self
    }

    pub fn with_redeliver_delay(mut self, ms: u64) -> Self {
        self.redeliver_delay_ms = ms;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Event emitted by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    /// Dispatcher started with this many subscriptions.
    Started { subscriptions: usize },
    /// Handler succeeded; message acked.
    Handled {
        topic: &'static str,
        group: String,
        message_id: Uuid,
        num_delivered: u32,
    },
    /// Handler returned an error; message will be redelivered.
    Failed {
        topic: &'static str,
        group: String,
        message_id: Uuid,
        num_delivered: u32,
        error: String,
    },
    /// Handler exceeded its ack-wait; message will be redelivered.
    TimedOut {
        topic: &'static str,
        group: String,
        message_id: Uuid,
        num_delivered: u32,
    },
    /// Message exceeded max deliveries and was removed.
    DeadLettered {
        topic: &'static str,
        group: String,
        message_id: Uuid,
        num_delivered: u32,
    },
    /// Payload could not be decoded; message acked without handling.
    Skipped {
        topic: &'static str,
        group: String,
        message_id: Uuid,
        error: String,
    },
    /// Dispatcher stopped.
    Stopped,
}

impl DispatchEvent {
    /// Consumer group the event concerns, if any.
    pub fn group(&self) -> Option<&str> {
        match self {
            DispatchEvent::Handled { group, .. }
            | DispatchEvent::Failed { group, .. }
            | DispatchEvent::TimedOut { group, .. }
            | DispatchEvent::DeadLettered { group, .. }
            | DispatchEvent::Skipped { group, .. } => Some(group),
            DispatchEvent::Started { .. } | DispatchEvent::Stopped => None,
        }
    }
}

/// Handle for controlling a running dispatcher.
///
/// Dropping the handle stops the dispatcher without waiting for in-flight
/// handlers.
pub struct DispatcherHandle {
    shutdown_tx: watch::Sender<bool>,
    event_tx: broadcast::Sender<DispatchEvent>,
    runner: Option<JoinHandle<()>>,
}

impl DispatcherHandle {
    /// Stop claiming new messages and wait for in-flight handlers to finish.
    pub async fn shutdown(mut self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        if let Some(runner) = self.runner.take() {
            runner
                .await
                .map_err(|e| Error::Internal(format!("Dispatcher task failed: {}", e)))?;
        }
        Ok(())
    }

    /// Get a receiver for dispatcher events emitted from now on.
    pub fn events(&self) -> broadcast::Receiver<DispatchEvent> {
        self.event_tx.subscribe()
    }
}

/// Runs every registered subscriber against the bus backends.
pub struct Dispatcher {
    bus: Bus,
    config: DispatcherConfig,
    event_tx: broadcast::Sender<DispatchEvent>,
}

impl Dispatcher {
    pub fn new(bus: Bus, config: DispatcherConfig) -> Self {
        let (event_tx, _) = broadcast::channel(BUS_EVENT_CAPACITY);
        Self {
            bus,
            config,
            event_tx,
        }
    }

    /// Get a receiver for dispatcher events, including those emitted
    /// during [`start`](Self::start).
    pub fn events(&self) -> broadcast::Receiver<DispatchEvent> {
        self.event_tx.subscribe()
    }

    /// Register every subscription's group on its backend and start one
    /// supervisor task per subscription.
    ///
    /// Groups are registered before this returns, so messages published
    /// afterwards reach every subscriber.
    pub async fn start(self, registry: SubscriberRegistry) -> Result<DispatcherHandle> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        if !self.config.enabled {
            info!("Dispatcher is disabled, not starting");
            return Ok(DispatcherHandle {
                shutdown_tx,
                event_tx: self.event_tx,
                runner: None,
            });
        }

        let entries = registry.into_entries();
        let mut subscriptions = Vec::with_capacity(entries.len());
        for subscriber in entries {
            let descriptor = subscriber.descriptor();
            let backend = self.bus.backend(descriptor.transport).clone();
            backend
                .register_group(descriptor.topic, &descriptor.group)
                .await?;
            info!(
                topic = descriptor.topic,
                group = %descriptor.group,
                transport = %descriptor.transport,
                concurrent = descriptor.concurrent,
                ack_wait_ms = descriptor.ack_wait.as_millis() as u64,
                "Subscriber started"
            );
            subscriptions.push(Subscription {
                subscriber,
                backend,
                event_tx: self.event_tx.clone(),
                max_deliver: self.config.max_deliver,
                redeliver_delay: Duration::from_millis(self.config.redeliver_delay_ms),
                poll_interval: Duration::from_millis(self.config.poll_interval_ms),
            });
        }

        let count = subscriptions.len();
        info!(
            subscriptions = count,
            poll_interval_ms = self.config.poll_interval_ms,
            max_deliver = self.config.max_deliver,
            "Dispatcher started"
        );
        let _ = self.event_tx.send(DispatchEvent::Started {
            subscriptions: count,
        });

        let event_tx = self.event_tx.clone();
        let runner = tokio::spawn(async move {
            let mut supervisors = JoinSet::new();
            for subscription in subscriptions {
                supervisors.spawn(subscription.supervise(shutdown_rx.clone()));
            }
            while let Some(result) = supervisors.join_next().await {
                if let Err(e) = result {
                    error!(error = ?e, "Subscription supervisor panicked");
                }
            }
            let _ = event_tx.send(DispatchEvent::Stopped);
            info!("Dispatcher stopped");
        });

        Ok(DispatcherHandle {
            shutdown_tx,
            event_tx: self.event_tx,
            runner: Some(runner),
        })
    }
}

/// One subscriber bound to its backend.
#[derive(Clone)]
struct Subscription {
    subscriber: Arc<dyn ErasedSubscriber>,
    backend: Arc<dyn QueueBackend>,
    event_tx: broadcast::Sender<DispatchEvent>,
    max_deliver: u32,
    redeliver_delay: Duration,
    poll_interval: Duration,
}

impl Subscription {
    fn topic(&self) -> &'static str {
        self.subscriber.descriptor().topic
    }

    fn group(&self) -> &str {
        &self.subscriber.descriptor().group
    }

    /// Claim loop for one subscription.
    ///
    /// At most `concurrent` handlers are in flight; the loop only claims as
    /// many messages as there are free permits, so unclaimed messages stay
    /// queued (and claimable by other instances of the same group).
    #[instrument(skip_all, fields(topic = self.topic(), group = %self.group()))]
    async fn supervise(self, mut shutdown_rx: watch::Receiver<bool>) {
        let descriptor = self.subscriber.descriptor().clone();
        let permits = Arc::new(Semaphore::new(descriptor.concurrent));
        let mut in_flight = JoinSet::new();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            while let Some(result) = in_flight.try_join_next() {
                log_join(result);
            }

            let available = permits.available_permits();
            if available == 0 {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    Some(result) = in_flight.join_next() => log_join(result),
                }
                continue;
            }

            let deliveries = match self
                .backend
                .claim(descriptor.topic, &descriptor.group, available, descriptor.ack_wait)
                .await
            {
                Ok(deliveries) => deliveries,
                Err(e) => {
                    error!(error = %e, "Failed to claim messages");
                    tokio::select! {
                        _ = shutdown_rx.changed() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                    continue;
                }
            };

            if deliveries.is_empty() {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = self.backend.wait_for_messages(
                        descriptor.topic,
                        &descriptor.group,
                        self.poll_interval,
                    ) => {}
                }
                continue;
            }

            debug!(claimed = deliveries.len(), "Processing claimed messages");
            for delivery in deliveries {
                let permit = match permits.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let subscription = self.clone();
                in_flight.spawn(async move {
                    subscription.process(delivery).await;
                    drop(permit);
                });
            }
        }

        debug!(in_flight = in_flight.len(), "Draining in-flight handlers");
        while let Some(result) = in_flight.join_next().await {
            log_join(result);
        }
    }

    /// Run the handler for one delivery and settle the message.
    async fn process(&self, delivery: Delivery) {
        let descriptor = self.subscriber.descriptor();
        let topic = descriptor.topic;
        let group = descriptor.group.clone();
        let ctx = DeliveryContext::new(&group, &delivery);
        let message_id = ctx.message_id;
        let num_delivered = delivery.num_delivered;

        if num_delivered > self.max_deliver {
            warn!(
                topic,
                group = %group,
                %message_id,
                num_delivered,
                max_deliver = self.max_deliver,
                "Message exceeded max deliveries, dead-lettering"
            );
            let reason = format!("exceeded {} deliveries", self.max_deliver);
            if let Err(e) = self
                .backend
                .dead_letter(topic, &group, message_id, &reason)
                .await
            {
                error!(error = %e, %message_id, "Failed to dead-letter message");
                return;
            }
            let _ = self.event_tx.send(DispatchEvent::DeadLettered {
                topic,
                group,
                message_id,
                num_delivered,
            });
            return;
        }

        let outcome = tokio::time::timeout(
            descriptor.ack_wait,
            self.subscriber.handle_envelope(&ctx, &delivery.envelope),
        )
        .await;

        let event = match outcome {
            Ok(Handled::Ok) => {
                if let Err(e) = self.backend.ack(topic, &group, message_id).await {
                    error!(error = %e, %message_id, "Failed to ack message");
                    return;
                }
                debug!(topic, group = %group, %message_id, num_delivered, "Message handled");
                DispatchEvent::Handled {
                    topic,
                    group,
                    message_id,
                    num_delivered,
                }
            }
            Ok(Handled::Failed(err)) => {
                match &err {
                    Error::Deferred(reason) => {
                        debug!(topic, group = %group, %message_id, num_delivered, %reason, "Handler deferred message")
                    }
                    e if e.is_retryable() => {
                        warn!(topic, group = %group, %message_id, num_delivered, error = %e, "Handler failed, will redeliver")
                    }
                    e => {
                        error!(topic, group = %group, %message_id, num_delivered, error = %e, "Handler failed with non-retryable error, will redeliver")
                    }
                }
                if let Err(e) = self
                    .backend
                    .nack(topic, &group, message_id, self.redeliver_delay)
                    .await
                {
                    error!(error = %e, %message_id, "Failed to nack message");
                }
                DispatchEvent::Failed {
                    topic,
                    group,
                    message_id,
                    num_delivered,
                    error: err.to_string(),
                }
            }
            Ok(Handled::Undecodable(err)) => {
                error!(topic, group = %group, %message_id, error = %err, "Undecodable payload, skipping");
                if let Err(e) = self.backend.ack(topic, &group, message_id).await {
                    error!(error = %e, %message_id, "Failed to ack message");
                    return;
                }
                DispatchEvent::Skipped {
                    topic,
                    group,
                    message_id,
                    error: err.to_string(),
                }
            }
            Err(_) => {
                warn!(
                    topic,
                    group = %group,
                    %message_id,
                    num_delivered,
                    ack_wait_ms = descriptor.ack_wait.as_millis() as u64,
                    "Handler exceeded ack wait, will redeliver"
                );
                if let Err(e) = self
                    .backend
                    .nack(topic, &group, message_id, Duration::ZERO)
                    .await
                {
                    error!(error = %e, %message_id, "Failed to nack message");
                }
                DispatchEvent::TimedOut {
                    topic,
                    group,
                    message_id,
                    num_delivered,
                }
            }
        };

        let _ = self.event_tx.send(event);
    }
}

fn log_join(result: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        error!(error = ?e, "Handler task panicked");
    }
}
