//! Explicit subscriber registry assembled at bootstrap.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use forum_core::{Error, Result};

use crate::subscriber::{Erased, ErasedSubscriber, Subscriber, SubscriberDescriptor};

/// Ordered list of subscribers handed to the dispatcher.
#[derive(Default)]
pub struct SubscriberRegistry {
    entries: Vec<Arc<dyn ErasedSubscriber>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<S: Subscriber>(mut self, subscriber: S) -> Result<Self> {
        self.register(subscriber)?;
        Ok(self)
    }

    /// Add a subscriber. A second subscriber on the same topic and group is
    /// rejected.
    pub fn register<S: Subscriber>(&mut self, subscriber: S) -> Result<()> {
        let erased = Erased::new(subscriber);
        let descriptor = erased.descriptor();
        if self.contains(descriptor.topic, &descriptor.group) {
            return Err(Error::Config(format!(
                "duplicate subscriber for topic {} group {}",
                descriptor.topic, descriptor.group
            )));
        }
        debug!(
            topic = descriptor.topic,
            group = %descriptor.group,
            subscriber = erased.name(),
            "Registered subscriber"
        );
        self.entries.push(Arc::new(erased));
        Ok(())
    }

    fn contains(&self, topic: &str, group: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.descriptor().topic == topic && e.descriptor().group == group)
    }

    pub fn descriptors(&self) -> Vec<SubscriberDescriptor> {
        self.entries.iter().map(|e| e.descriptor().clone()).collect()
    }

    /// Distinct topics with at least one subscriber.
    pub fn topics(&self) -> HashSet<&'static str> {
        self.entries.iter().map(|e| e.descriptor().topic).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn into_entries(self) -> Vec<Arc<dyn ErasedSubscriber>> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use forum_core::{CommentChange, DiscussionChange};

    use crate::envelope::DeliveryContext;

    struct Named<M> {
        group: &'static str,
        marker: std::marker::PhantomData<fn() -> M>,
    }

    fn named<M>(group: &'static str) -> Named<M> {
        Named {
            group,
            marker: std::marker::PhantomData,
        }
    }

    #[async_trait]
    impl<M: forum_core::Message> Subscriber for Named<M> {
        type Message = M;

        fn descriptor(&self) -> SubscriberDescriptor {
            SubscriberDescriptor::of::<M>(self.group)
        }

        async fn handle(&self, _ctx: &DeliveryContext, _message: M) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_registry_keeps_order() {
        let registry = SubscriberRegistry::new()
            .with(named::<DiscussionChange>("b"))
            .unwrap()
            .with(named::<DiscussionChange>("a"))
            .unwrap()
            .with(named::<CommentChange>("a"))
            .unwrap();

        let groups: Vec<_> = registry
            .descriptors()
            .into_iter()
            .map(|d| (d.topic, d.group))
            .collect();
        assert_eq!(
            groups,
            vec![
                ("forum.discussion.change", "b".to_string()),
                ("forum.discussion.change", "a".to_string()),
                ("forum.comment.change", "a".to_string()),
            ]
        );
        assert_eq!(registry.topics().len(), 2);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_duplicate_topic_group_rejected() {
        let mut registry = SubscriberRegistry::new();
        registry.register(named::<DiscussionChange>("a")).unwrap();
        let err = registry
            .register(named::<DiscussionChange>("a"))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(registry.len(), 1);
    }
}
