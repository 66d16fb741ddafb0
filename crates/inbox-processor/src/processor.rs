//! Processor orchestration and the retry/dead-letter state machine.
//!
//! One `process` call makes a bounded pass over every registered topic:
//! claim a batch, dispatch each event to its handler, and transition status
//! based on the outcome. Failures never propagate to the caller; they are
//! logged, counted in the pass summary, and isolated to the topic or event
//! that produced them.

use std::sync::Arc;

use anyhow::anyhow;
use inbox_core::{Clock, InboxEvent, ProcessorConfig, TopicConfig};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    backoff::retry_delay,
    error::{ProcessError, Result},
    registry::{TopicRegistry, TopicSettings},
    storage::InboxStorage,
};

/// Counters for one processing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Events claimed across all topics.
    pub claimed: usize,
    /// Events whose handler succeeded.
    pub completed: usize,
    /// Events returned to the pool with a backoff schedule.
    pub retried: usize,
    /// Events dead-lettered after exhausting retries.
    pub dead_lettered: usize,
    /// Fetch or persistence errors encountered during the pass.
    pub errors: usize,
}

/// Outcome of handling a single claimed event.
enum EventOutcome {
    Completed,
    Retried,
    DeadLettered,
    /// Shutdown interrupted the handler; the event stays `processing` and
    /// returns to the pool through lease expiry.
    Abandoned,
}

/// Orchestrates claiming and handling of staged inbox events.
///
/// Stateless between passes: the store is the single source of truth, so
/// any number of processors may run concurrently against it.
pub struct Processor {
    storage: Arc<dyn InboxStorage>,
    registry: TopicRegistry,
    config: ProcessorConfig,
    clock: Arc<dyn Clock>,
    cancellation_token: CancellationToken,
}

impl Processor {
    /// Creates a new processor.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::InvalidConfig`] for a zero batch size or a
    /// topic configured with no permitted attempts, a zero backoff, or a
    /// zero handler timeout. Configuration faults are the only errors this
    /// component surfaces synchronously.
    pub fn new(
        storage: Arc<dyn InboxStorage>,
        registry: TopicRegistry,
        config: ProcessorConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(ProcessError::invalid_config("batch_size must be at least 1"));
        }
        for (topic, settings) in registry.iter() {
            Self::validate_topic(topic, &settings.config)?;
        }

        Ok(Self {
            storage,
            registry,
            config,
            clock,
            cancellation_token: CancellationToken::new(),
        })
    }

    fn validate_topic(topic: &str, config: &TopicConfig) -> Result<()> {
        if config.max_retries < 1 {
            return Err(ProcessError::invalid_config(format!(
                "topic {topic}: max_retries must be at least 1"
            )));
        }
        if config.retry_backoff.is_zero() {
            return Err(ProcessError::invalid_config(format!(
                "topic {topic}: retry_backoff must be non-zero"
            )));
        }
        if config.handler_timeout.is_zero() {
            return Err(ProcessError::invalid_config(format!(
                "topic {topic}: handler_timeout must be non-zero"
            )));
        }
        Ok(())
    }

    /// Returns the processor-wide configuration.
    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Token cancelling in-flight handler invocations and stopping the
    /// pass between events. Cancelled events stay `processing` until their
    /// lease expires, after which they are reclaimed.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Looks up the registered settings for a topic.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::NoHandler`] for unregistered topics. Exposed
    /// so dispatching collaborators can fail loudly instead of staging
    /// events nothing will ever claim.
    pub fn settings_for(&self, topic: &str) -> Result<&TopicSettings> {
        self.registry.get(topic)
    }

    /// Makes one bounded pass over every registered topic, claiming up to
    /// `batch_size` events per topic.
    ///
    /// Never returns an error: a failed claim skips that topic for this
    /// pass, a failed event affects only itself, and everything is reported
    /// through logs and the returned summary.
    pub async fn process(&self, batch_size: usize) -> PassSummary {
        let mut summary = PassSummary::default();

        for (topic, settings) in self.registry.iter() {
            if self.cancellation_token.is_cancelled() {
                break;
            }
            self.process_topic(topic, settings, batch_size, &mut summary).await;
        }

        summary
    }

    /// Claims and handles one batch for a single topic.
    async fn process_topic(
        &self,
        topic: &str,
        settings: &TopicSettings,
        batch_size: usize,
        summary: &mut PassSummary,
    ) {
        let claimed = if settings.config.ordered_by_key {
            self.storage.claim_ordered(topic, batch_size).await
        } else {
            self.storage.claim_unordered(topic, batch_size).await
        };

        let events = match claimed {
            Ok(events) => events,
            Err(e) => {
                error!(topic, error = %e, "failed to claim events, skipping topic this pass");
                summary.errors += 1;
                return;
            },
        };

        if events.is_empty() {
            return;
        }

        debug!(
            topic,
            batch = events.len(),
            ordered = settings.config.ordered_by_key,
            "processing claimed batch"
        );
        summary.claimed += events.len();

        for event in events {
            if self.cancellation_token.is_cancelled() {
                break;
            }

            match self.handle_event(event, settings).await {
                Ok(EventOutcome::Completed) => summary.completed += 1,
                Ok(EventOutcome::Retried) => summary.retried += 1,
                Ok(EventOutcome::DeadLettered) => summary.dead_lettered += 1,
                Ok(EventOutcome::Abandoned) => {},
                Err(e) => {
                    error!(topic, error = %e, "event processing failed");
                    summary.errors += 1;
                },
            }
        }
    }

    /// Dispatches one claimed event and applies the resulting transition.
    ///
    /// The event is already `processing`; the claim performed that
    /// transition atomically. A handler timeout counts as an ordinary
    /// handler failure and goes through the retry path. Shutdown
    /// cancellation does not: like a crash, it is no evidence against the
    /// handler, so the event is left to lease recovery with its attempt
    /// count unchanged.
    async fn handle_event(
        &self,
        event: InboxEvent,
        settings: &TopicSettings,
    ) -> Result<EventOutcome> {
        let event_id = event.id;
        let topic = event.topic.clone();
        let attempts = event.attempts;
        let handler_timeout = settings.config.handler_timeout;

        let invocation = tokio::time::timeout(handler_timeout, settings.handler.handle(event));

        let handler_result = tokio::select! {
            result = invocation => match result {
                Ok(result) => result,
                Err(_) => Err(anyhow!("handler timed out after {handler_timeout:?}")),
            },
            () = self.cancellation_token.cancelled() => {
                debug!(event_id = %event_id, topic = %topic, "handler interrupted by shutdown");
                return Ok(EventOutcome::Abandoned);
            },
        };

        match handler_result {
            Ok(()) => {
                // A failed write here degrades to at-least-once: the lease
                // expires and the event is handled again.
                self.storage
                    .mark_completed(event_id)
                    .await
                    .map_err(|e| ProcessError::storage(e.to_string()))?;

                info!(event_id = %event_id, topic = %topic, "event processed");
                Ok(EventOutcome::Completed)
            },
            Err(handler_err) => {
                self.handle_failure(event_id, &topic, attempts, handler_err, &settings.config).await
            },
        }
    }

    /// Applies the retry/dead-letter transition after a handler failure.
    async fn handle_failure(
        &self,
        event_id: inbox_core::EventId,
        topic: &str,
        attempts: i32,
        handler_err: anyhow::Error,
        config: &TopicConfig,
    ) -> Result<EventOutcome> {
        let new_attempts = attempts + 1;
        let message = format!("{handler_err:#}");

        if new_attempts >= config.max_retries {
            self.storage
                .mark_failed(event_id, new_attempts, message.clone())
                .await
                .map_err(|e| ProcessError::storage(e.to_string()))?;

            error!(
                event_id = %event_id,
                topic,
                attempts = new_attempts,
                error = %message,
                "event dead-lettered after exhausting retries"
            );
            return Ok(EventOutcome::DeadLettered);
        }

        let delay = retry_delay(new_attempts.unsigned_abs(), config.retry_backoff);
        let scheduled_at = self.clock.now_utc()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::days(3650));

        self.storage
            .schedule_retry(event_id, new_attempts, scheduled_at, message.clone())
            .await
            .map_err(|e| ProcessError::storage(e.to_string()))?;

        warn!(
            event_id = %event_id,
            topic,
            attempt = new_attempts,
            max_retries = config.max_retries,
            retry_in = ?delay,
            error = %message,
            "handler failed, retry scheduled"
        );
        Ok(EventOutcome::Retried)
    }
}
