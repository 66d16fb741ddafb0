//! Inbox event processor with reliability guarantees.
//!
//! This crate implements the processing side of the inbox pattern: events
//! staged in PostgreSQL by a stream consumer are claimed in batches,
//! dispatched to per-topic handlers, and transitioned through the
//! retry/dead-letter state machine based on the outcome.
//!
//! # Architecture
//!
//! Any number of workers may run against the same store. Work distribution
//! is lock-free: claims use `FOR UPDATE SKIP LOCKED` so concurrent claimers
//! never receive overlapping batches, and a lock lease recovers events whose
//! worker crashed mid-flight. Each processing pass:
//!
//! 1. **Claim** - per registered topic, claim a batch (ordered or unordered)
//! 2. **Dispatch** - invoke the topic handler per event, bounded by a timeout
//! 3. **Transition** - mark completed, schedule a backoff retry, or
//!    dead-letter once retries are exhausted
//!
//! Failures are isolated: a fetch error skips one topic for one pass, a
//! handler error affects only its event, and a pass never returns an error
//! to the caller.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use inbox_core::{storage::Storage, ProcessorConfig, RealClock, TopicConfig};
//! use inbox_processor::{FnHandler, PostgresInboxStorage, Processor, TopicRegistry};
//! use sqlx::PgPool;
//!
//! # async fn example(pool: PgPool) -> anyhow::Result<()> {
//! let clock = Arc::new(RealClock::new());
//! let storage = Arc::new(Storage::new(pool, clock.clone()));
//!
//! let mut registry = TopicRegistry::new();
//! registry.register(
//!     "orders",
//!     Arc::new(FnHandler::new(|event| async move {
//!         println!("order event {}", event.id);
//!         Ok(())
//!     })),
//!     TopicConfig::ordered(),
//! );
//!
//! let processor = Processor::new(
//!     Arc::new(PostgresInboxStorage::new(storage)),
//!     registry,
//!     ProcessorConfig::default(),
//!     clock,
//! )?;
//! let summary = processor.process(10).await;
//! println!("completed {} events", summary.completed);
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod error;
pub mod processor;
pub mod registry;
pub mod storage;
pub mod worker;

pub use backoff::retry_delay;
pub use error::{ProcessError, Result};
pub use processor::{PassSummary, Processor};
pub use registry::{FnHandler, Handler, TopicRegistry, TopicSettings};
pub use storage::{InboxStorage, PostgresInboxStorage};
pub use worker::InboxWorker;
