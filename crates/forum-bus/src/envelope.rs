//! Envelope and delivery metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use forum_core::{Message, Result};

/// A published message as stored by a backend.
///
/// The payload stays JSON inside the backend; it is decoded into the
/// subscriber's message type only at delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique message identifier (UUIDv7 for temporal ordering).
    pub id: Uuid,
    pub topic: String,
    pub published_at: DateTime<Utc>,
    pub payload: JsonValue,
}

impl Envelope {
    /// Wrap a typed message for its topic.
    pub fn wrap<M: Message>(message: &M) -> Result<Self> {
        Ok(Self {
            id: Uuid::now_v7(),
            topic: M::TOPIC.to_string(),
            published_at: Utc::now(),
            payload: serde_json::to_value(message)?,
        })
    }

    /// Decode the payload into a typed message.
    pub fn decode<M: Message>(&self) -> Result<M> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// A message claimed by one consumer group.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub envelope: Envelope,
    /// Times this message has been handed to the group, including this one.
    pub num_delivered: u32,
}

/// Redelivery information visible to handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryMetadata {
    /// 1 on the first attempt.
    pub num_delivered: u32,
    pub published_at: DateTime<Utc>,
}

impl DeliveryMetadata {
    pub fn is_first_delivery(&self) -> bool {
        self.num_delivered <= 1
    }

    /// Time since the message was published.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.published_at
    }
}

/// Context passed to every handler invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryContext {
    pub message_id: Uuid,
    pub topic: String,
    pub group: String,
    pub metadata: DeliveryMetadata,
}

impl DeliveryContext {
    pub fn new(group: &str, delivery: &Delivery) -> Self {
        Self {
            message_id: delivery.envelope.id,
            topic: delivery.envelope.topic.clone(),
            group: group.to_string(),
            metadata: DeliveryMetadata {
                num_delivered: delivery.num_delivered,
                published_at: delivery.envelope.published_at,
            },
        }
    }

    /// Context for invoking a handler directly, outside a dispatcher.
    pub fn for_attempt(topic: &str, group: &str, num_delivered: u32) -> Self {
        Self {
            message_id: Uuid::now_v7(),
            topic: topic.to_string(),
            group: group.to_string(),
            metadata: DeliveryMetadata {
                num_delivered,
                published_at: Utc::now(),
            },
        }
    }

    pub fn num_delivered(&self) -> u32 {
        self.metadata.num_delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forum_core::{DiscussionChange, LivePush, NotifyKind};

    #[test]
    fn test_wrap_sets_topic_and_v7_id() {
        let envelope = Envelope::wrap(&DiscussionChange::insert(3, Uuid::nil())).unwrap();
        assert_eq!(envelope.topic, "forum.discussion.change");
        assert_eq!(envelope.id.get_version_num(), 7);
        assert_eq!(envelope.payload["id"], 3);
    }

    #[test]
    fn test_decode_back_to_message() {
        let push = LivePush {
            user_id: 5,
            notify_id: 9,
            kind: NotifyKind::Reply,
            content: "hi".to_string(),
        };
        let envelope = Envelope::wrap(&push).unwrap();
        let decoded: LivePush = envelope.decode().unwrap();
        assert_eq!(decoded, push);
    }

    #[test]
    fn test_decode_wrong_shape_is_serialization_error() {
        let envelope = Envelope {
            id: Uuid::now_v7(),
            topic: "live.user_notify".to_string(),
            published_at: Utc::now(),
            payload: serde_json::json!({"unexpected": true}),
        };
        let err = envelope.decode::<LivePush>().unwrap_err();
        assert!(matches!(err, forum_core::Error::Serialization(_)));
    }

    #[test]
    fn test_first_delivery_flag() {
        let first = DeliveryContext::for_attempt("t", "g", 1);
        let second = DeliveryContext::for_attempt("t", "g", 2);
        assert!(first.metadata.is_first_delivery());
        assert!(!second.metadata.is_first_delivery());
        assert_eq!(second.num_delivered(), 2);
    }
}
