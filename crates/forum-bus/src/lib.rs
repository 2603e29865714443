//! # forum-bus
//!
//! Topic-based publish/subscribe with at-least-once delivery.
//!
//! Write paths publish typed messages through a [`Bus`]; background
//! workflows implement [`Subscriber`], are collected in a
//! [`SubscriberRegistry`] at bootstrap and run by a [`Dispatcher`].
//!
//! ## Example
//!
//! ```ignore
//! use forum_bus::{Bus, Dispatcher, DispatcherConfig, SubscriberRegistry};
//!
//! let bus = Bus::in_memory();
//! let registry = SubscriberRegistry::new().with(MySubscriber::new())?;
//!
//! let handle = Dispatcher::new(bus.clone(), DispatcherConfig::from_env())
//!     .start(registry)
//!     .await?;
//!
//! bus.emit(&DiscussionChange::insert(id, uuid)).await;
//!
//! // Graceful shutdown
//! handle.shutdown().await?;
//! ```

pub mod backend;
pub mod bus;
pub mod dispatcher;
pub mod envelope;
pub mod memory;
pub mod registry;
pub mod subscriber;

pub use backend::QueueBackend;
pub use bus::Bus;
pub use dispatcher::{DispatchEvent, Dispatcher, DispatcherConfig, DispatcherHandle};
pub use envelope::{Delivery, DeliveryContext, DeliveryMetadata, Envelope};
pub use memory::{DeadLetter, InProcessQueue};
pub use registry::SubscriberRegistry;
pub use subscriber::{Subscriber, SubscriberDescriptor};
