//! Topic registry and handler contract.
//!
//! Maps topic names to their handler and processing configuration. The
//! handler is the per-topic business logic; the processor treats it as an
//! opaque success/failure oracle.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use inbox_core::{InboxEvent, TopicConfig};

use crate::error::{ProcessError, Result};

/// Per-topic business logic invoked for each claimed event.
///
/// Handlers must be idempotent: on a store-write failure after a successful
/// run the delivered guarantee degrades to at-least-once and the event may
/// be handled again.
pub trait Handler: Send + Sync + 'static {
    /// Processes one event. An `Err` drives the retry/dead-letter state
    /// machine; the error text is persisted as the event's last error.
    fn handle(
        &self,
        event: InboxEvent,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;
}

/// Adapter turning an async closure into a [`Handler`].
pub struct FnHandler<F> {
    func: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(InboxEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    /// Wraps an async closure as a handler.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(InboxEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn handle(
        &self,
        event: InboxEvent,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin((self.func)(event))
    }
}

/// Handler plus processing configuration for one topic.
#[derive(Clone)]
pub struct TopicSettings {
    /// Business logic for this topic's events.
    pub handler: Arc<dyn Handler>,

    /// Retry, ordering, and timeout configuration.
    pub config: TopicConfig,
}

/// Static mapping from topic name to handler and configuration.
#[derive(Clone, Default)]
pub struct TopicRegistry {
    topics: HashMap<String, TopicSettings>,
}

impl TopicRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self { topics: HashMap::new() }
    }

    /// Registers a handler and configuration for a topic, replacing any
    /// previous registration.
    pub fn register(
        &mut self,
        topic: impl Into<String>,
        handler: Arc<dyn Handler>,
        config: TopicConfig,
    ) {
        self.topics.insert(topic.into(), TopicSettings { handler, config });
    }

    /// Looks up the settings for a topic.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::NoHandler`] for unregistered topics.
    pub fn get(&self, topic: &str) -> Result<&TopicSettings> {
        self.topics.get(topic).ok_or_else(|| ProcessError::no_handler(topic))
    }

    /// Iterates over registered topics and their settings.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TopicSettings)> {
        self.topics.iter().map(|(topic, settings)| (topic.as_str(), settings))
    }

    /// Number of registered topics.
    pub fn len(&self) -> usize {
        self.topics.len()
    }

    /// Returns true if no topics are registered.
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_handler() -> Arc<dyn Handler> {
        Arc::new(FnHandler::new(|_event| async { Ok(()) }))
    }

    #[test]
    fn lookup_of_unregistered_topic_is_a_distinct_error() {
        let registry = TopicRegistry::new();
        assert!(matches!(
            registry.get("orders"),
            Err(ProcessError::NoHandler { topic }) if topic == "orders"
        ));
    }

    #[test]
    fn registration_replaces_previous_config() {
        let mut registry = TopicRegistry::new();
        registry.register("orders", noop_handler(), TopicConfig::default());
        registry.register("orders", noop_handler(), TopicConfig::ordered());

        assert_eq!(registry.len(), 1);
        assert!(registry.get("orders").unwrap().config.ordered_by_key);
    }
}
