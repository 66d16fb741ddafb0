//! Per-topic and processor-wide configuration.
//!
//! Configuration is constructed explicitly at startup and passed into the
//! processor; there is no process-wide mutable default.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default maximum handler attempts before dead-lettering.
pub const DEFAULT_MAX_RETRIES: i32 = 3;

/// Default base delay for exponential backoff.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(60);

/// Default bound on a single handler invocation.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

/// Default events claimed per topic per processing pass.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default idle delay between worker polling passes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Processing configuration for a single topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicConfig {
    /// When true, events sharing a message key are processed strictly in
    /// created-at order, one in flight per key.
    pub ordered_by_key: bool,

    /// Maximum handler attempts before the event is dead-lettered.
    pub max_retries: i32,

    /// Base delay for exponential retry backoff.
    pub retry_backoff: Duration,

    /// Upper bound on a single handler invocation; exceeding it counts as a
    /// handler failure.
    pub handler_timeout: Duration,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            ordered_by_key: false,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
        }
    }
}

impl TopicConfig {
    /// Config for a topic with per-key causal ordering enabled.
    pub fn ordered() -> Self {
        Self { ordered_by_key: true, ..Self::default() }
    }
}

/// Processor-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Events claimed per topic per `process` call.
    pub batch_size: usize,

    /// Idle delay between polling passes when no events were claimed.
    pub poll_interval: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self { batch_size: DEFAULT_BATCH_SIZE, poll_interval: DEFAULT_POLL_INTERVAL }
    }
}
