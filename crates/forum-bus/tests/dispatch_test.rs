//! Dispatcher behaviour over the in-process backend.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;
use uuid::Uuid;

use forum_bus::{
    Bus, DeliveryContext, DispatchEvent, Dispatcher, DispatcherConfig, Envelope, InProcessQueue,
    QueueBackend, Subscriber, SubscriberDescriptor, SubscriberRegistry,
};
use forum_core::{DiscussionChange, Error, Message, Result, Transport};

#[derive(Clone, Copy)]
enum Behavior {
    Succeed,
    AlwaysFail,
    FailFirst,
    SleepFirst(Duration),
    Sleep(Duration),
}

#[derive(Clone)]
struct Scripted {
    group: &'static str,
    concurrent: usize,
    ack_wait: Duration,
    behavior: Behavior,
    seen: Arc<Mutex<Vec<(i64, u32)>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl Scripted {
    fn new(group: &'static str, behavior: Behavior) -> Self {
        Self {
            group,
            concurrent: 1,
            ack_wait: Duration::from_secs(30),
            behavior,
            seen: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn concurrent(mut self, n: usize) -> Self {
        self.concurrent = n;
        self
    }

    fn ack_wait(mut self, d: Duration) -> Self {
        self.ack_wait = d;
        self
    }

    fn seen(&self) -> Vec<(i64, u32)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Subscriber for Scripted {
    type Message = DiscussionChange;

    fn descriptor(&self) -> SubscriberDescriptor {
        SubscriberDescriptor::of::<DiscussionChange>(self.group)
            .with_concurrent(self.concurrent)
            .with_ack_wait(self.ack_wait)
    }

    async fn handle(&self, ctx: &DeliveryContext, message: DiscussionChange) -> Result<()> {
        self.seen
            .lock()
            .unwrap()
            .push((message.id, ctx.num_delivered()));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = match self.behavior {
            Behavior::Succeed => Ok(()),
            Behavior::AlwaysFail => Err(Error::Internal("always".into())),
            Behavior::FailFirst if ctx.metadata.is_first_delivery() => {
                Err(Error::Deferred("first".into()))
            }
            Behavior::FailFirst => Ok(()),
            Behavior::SleepFirst(d) if ctx.metadata.is_first_delivery() => {
                tokio::time::sleep(d).await;
                Ok(())
            }
            Behavior::SleepFirst(_) => Ok(()),
            Behavior::Sleep(d) => {
                tokio::time::sleep(d).await;
                Ok(())
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

fn fast_config() -> DispatcherConfig {
    DispatcherConfig::default()
        .with_poll_interval(20)
        .with_redeliver_delay(0)
}

async fn next_matching<F>(rx: &mut broadcast::Receiver<DispatchEvent>, pred: F) -> DispatchEvent
where
    F: Fn(&DispatchEvent) -> bool,
{
    let fut = async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out waiting for dispatch event")
}

fn publish_id(i: i64) -> DiscussionChange {
    DiscussionChange::insert(i, Uuid::now_v7())
}

#[tokio::test]
async fn test_fan_out_survives_failing_group() {
    let bus = Bus::in_memory();
    let good = Scripted::new("good", Behavior::Succeed);
    let other = Scripted::new("other", Behavior::Succeed);
    let bad = Scripted::new("bad", Behavior::AlwaysFail);

    let dispatcher = Dispatcher::new(bus.clone(), fast_config().with_max_deliver(2));
    let mut events = dispatcher.events();
    let registry = SubscriberRegistry::new()
        .with(bad.clone())
        .unwrap()
        .with(good.clone())
        .unwrap()
        .with(other.clone())
        .unwrap();
    let handle = dispatcher.start(registry).await.unwrap();

    bus.publish(&publish_id(1)).await.unwrap();

    let mut pending: HashSet<&str> = ["good", "other", "bad"].into_iter().collect();
    while !pending.is_empty() {
        let event = next_matching(&mut events, |e| {
            matches!(
                e,
                DispatchEvent::Handled { .. } | DispatchEvent::DeadLettered { .. }
            )
        })
        .await;
        if let Some(group) = event.group() {
            pending.remove(group);
        }
    }
    handle.shutdown().await.unwrap();

    assert_eq!(good.seen(), vec![(1, 1)]);
    assert_eq!(other.seen(), vec![(1, 1)]);
    assert_eq!(bad.seen(), vec![(1, 1), (1, 2)]);
}

#[tokio::test]
async fn test_competing_consumers_share_one_group() {
    let bus = Bus::in_memory();
    let first = Scripted::new("shared", Behavior::Sleep(Duration::from_millis(5)));
    let second = Scripted {
        seen: first.seen.clone(),
        ..Scripted::new("shared", Behavior::Sleep(Duration::from_millis(5)))
    };

    let a = Dispatcher::new(bus.clone(), fast_config())
        .start(SubscriberRegistry::new().with(first.clone()).unwrap())
        .await
        .unwrap();
    let b = Dispatcher::new(bus.clone(), fast_config())
        .start(SubscriberRegistry::new().with(second).unwrap())
        .await
        .unwrap();

    for i in 0..20 {
        bus.publish(&publish_id(i)).await.unwrap();
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while first.seen().len() < 20 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("not all messages handled");
    tokio::time::sleep(Duration::from_millis(100)).await;

    a.shutdown().await.unwrap();
    b.shutdown().await.unwrap();

    let seen = first.seen();
    assert_eq!(seen.len(), 20, "each message handled once by the group");
    let ids: HashSet<i64> = seen.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids.len(), 20);
}

#[tokio::test]
async fn test_error_triggers_redelivery_with_count() {
    let bus = Bus::in_memory();
    let sub = Scripted::new("retry", Behavior::FailFirst);
    let dispatcher = Dispatcher::new(bus.clone(), fast_config());
    let mut events = dispatcher.events();
    let handle = dispatcher
        .start(SubscriberRegistry::new().with(sub.clone()).unwrap())
        .await
        .unwrap();

    bus.publish(&publish_id(7)).await.unwrap();

    let failed = next_matching(&mut events, |e| matches!(e, DispatchEvent::Failed { .. })).await;
    assert!(matches!(failed, DispatchEvent::Failed { num_delivered: 1, .. }));
    let handled =
        next_matching(&mut events, |e| matches!(e, DispatchEvent::Handled { .. })).await;
    assert!(matches!(handled, DispatchEvent::Handled { num_delivered: 2, .. }));

    handle.shutdown().await.unwrap();
    assert_eq!(sub.seen(), vec![(7, 1), (7, 2)]);
}

#[tokio::test(start_paused = true)]
async fn test_ack_wait_timeout_redelivers() {
    let bus = Bus::in_memory();
    let sub = Scripted::new("slow", Behavior::SleepFirst(Duration::from_secs(600)))
        .ack_wait(Duration::from_secs(1));
    let dispatcher = Dispatcher::new(bus.clone(), fast_config());
    let mut events = dispatcher.events();
    let handle = dispatcher
        .start(SubscriberRegistry::new().with(sub.clone()).unwrap())
        .await
        .unwrap();

    bus.publish(&publish_id(3)).await.unwrap();

    let timed_out =
        next_matching(&mut events, |e| matches!(e, DispatchEvent::TimedOut { .. })).await;
    assert!(matches!(timed_out, DispatchEvent::TimedOut { num_delivered: 1, .. }));
    let handled =
        next_matching(&mut events, |e| matches!(e, DispatchEvent::Handled { .. })).await;
    assert!(matches!(handled, DispatchEvent::Handled { num_delivered: 2, .. }));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let bus = Bus::in_memory();
    let sub = Scripted::new("bounded", Behavior::Sleep(Duration::from_millis(30))).concurrent(2);
    let handle = Dispatcher::new(bus.clone(), fast_config())
        .start(SubscriberRegistry::new().with(sub.clone()).unwrap())
        .await
        .unwrap();

    for i in 0..6 {
        bus.publish(&publish_id(i)).await.unwrap();
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while sub.seen().len() < 6 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("not all messages handled");
    handle.shutdown().await.unwrap();

    let max = sub.max_in_flight.load(Ordering::SeqCst);
    assert!(max >= 1 && max <= 2, "max in flight was {}", max);
}

#[tokio::test]
async fn test_max_deliver_dead_letters() {
    let in_process = Arc::new(InProcessQueue::new());
    let durable = Arc::new(InProcessQueue::with_transport(Transport::Durable));
    let bus = Bus::new(in_process, durable.clone());
    let sub = Scripted::new("doomed", Behavior::AlwaysFail);

    let dispatcher = Dispatcher::new(bus.clone(), fast_config().with_max_deliver(3));
    let mut events = dispatcher.events();
    let handle = dispatcher
        .start(SubscriberRegistry::new().with(sub.clone()).unwrap())
        .await
        .unwrap();

    let id = bus.publish(&publish_id(9)).await.unwrap();
    let dead =
        next_matching(&mut events, |e| matches!(e, DispatchEvent::DeadLettered { .. })).await;
    handle.shutdown().await.unwrap();

    assert_eq!(
        dead,
        DispatchEvent::DeadLettered {
            topic: DiscussionChange::TOPIC,
            group: "doomed".to_string(),
            message_id: id,
            num_delivered: 4,
        }
    );
    assert_eq!(sub.seen().len(), 3, "handler not invoked past max deliver");
    let letters = durable.dead_letters().await;
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].envelope.id, id);
    assert_eq!(durable.pending(DiscussionChange::TOPIC, "doomed").await, 0);
}

#[tokio::test]
async fn test_undecodable_payload_is_skipped() {
    let in_process = Arc::new(InProcessQueue::new());
    let durable = Arc::new(InProcessQueue::with_transport(Transport::Durable));
    let bus = Bus::new(in_process, durable.clone());
    let sub = Scripted::new("strict", Behavior::Succeed);

    let dispatcher = Dispatcher::new(bus.clone(), fast_config());
    let mut events = dispatcher.events();
    let handle = dispatcher
        .start(SubscriberRegistry::new().with(sub.clone()).unwrap())
        .await
        .unwrap();

    durable
        .publish(Envelope {
            id: Uuid::now_v7(),
            topic: DiscussionChange::TOPIC.to_string(),
            published_at: Utc::now(),
            payload: serde_json::json!({"op": "explode"}),
        })
        .await
        .unwrap();

    next_matching(&mut events, |e| matches!(e, DispatchEvent::Skipped { .. })).await;
    handle.shutdown().await.unwrap();

    assert!(sub.seen().is_empty());
    assert_eq!(durable.pending(DiscussionChange::TOPIC, "strict").await, 0);
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_handlers() {
    let bus = Bus::in_memory();
    let sub = Scripted::new("draining", Behavior::Sleep(Duration::from_millis(150)));
    let dispatcher = Dispatcher::new(bus.clone(), fast_config());
    let mut events = dispatcher.events();
    let handle = dispatcher
        .start(SubscriberRegistry::new().with(sub.clone()).unwrap())
        .await
        .unwrap();

    bus.publish(&publish_id(1)).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while sub.seen().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("handler never started");

    handle.shutdown().await.unwrap();
    assert_eq!(sub.in_flight.load(Ordering::SeqCst), 0);

    next_matching(&mut events, |e| matches!(e, DispatchEvent::Handled { .. })).await;
    next_matching(&mut events, |e| matches!(e, DispatchEvent::Stopped)).await;
}
