//! Core domain models and storage for the inbox processor.
//!
//! Provides the staged-event data model, the status state machine,
//! per-topic configuration, the clock abstraction, and the PostgreSQL
//! repository layer. The processor crate depends only on these types and on
//! the storage contract they define.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod models;
pub mod storage;
pub mod time;

pub use config::{ProcessorConfig, TopicConfig};
pub use error::{CoreError, Result};
pub use models::{EventId, EventStatus, InboxEvent};
pub use time::{Clock, RealClock, TestClock};
