//! Domain models for staged inbox events.
//!
//! Defines the event row, its lifecycle status, and the strongly-typed event
//! identifier. Includes database serialization traits so the repository
//! layer can read and write rows without conversion boilerplate.

use std::{collections::HashMap, fmt};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Strongly-typed event identifier.
///
/// Wraps the BIGSERIAL primary key of the inbox table. Ids are monotonic in
/// insertion order, which the claiming protocol relies on as a tiebreaker
/// for rows created in the same instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub i64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for EventId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl sqlx::Type<PgDb> for EventId {
    fn type_info() -> PgTypeInfo {
        <i64 as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for EventId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let id = <i64 as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(id))
    }
}

impl sqlx::Encode<'_, PgDb> for EventId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <i64 as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Event lifecycle status.
///
/// Events progress through these states during processing. Retry scheduling
/// returns an event to `Pending` with an advanced `scheduled_at`, so the
/// claim predicate never has to distinguish first attempts from retries:
///
/// ```text
/// pending -> processing -> completed
///                       -> pending   (retry scheduled, scheduled_at advanced)
///                       -> failed    (dead-lettered, retries exhausted)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Waiting to be claimed. Covers both fresh events and scheduled
    /// retries; `scheduled_at` gates visibility for the latter.
    Pending,

    /// Claimed by a worker under a lock lease.
    ///
    /// Prevents duplicate processing. If the owning worker crashes, the
    /// lease expires and the event becomes claimable again.
    Processing,

    /// Successfully processed. Terminal; never claimed again.
    Completed,

    /// Dead-lettered after exhausting retries. Terminal; retains the last
    /// handler error for diagnosis and requires manual remediation.
    Failed,
}

impl EventStatus {
    /// Returns true for terminal states that are never claimed again.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid event status: {s}")),
        }
    }
}

impl sqlx::Type<PgDb> for EventStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for EventStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        s.parse().map_err(Into::into)
    }
}

/// One staged stream message awaiting processing.
///
/// Rows are created by the ingestion collaborator with `status = pending`
/// and `attempts = 0`, mutated exclusively through the repository's
/// transactional operations, and never deleted by the processor: terminal
/// rows persist for audit and dead-letter inspection.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct InboxEvent {
    /// Unique identifier, monotonic in insertion order.
    pub id: EventId,

    /// Source stream topic.
    pub topic: String,

    /// Source partition. Provenance only; the processor does not
    /// reinterpret it.
    pub partition: i32,

    /// Source offset within the partition. Provenance only.
    pub offset: i64,

    /// Message key. `None` means the event participates in no ordering
    /// grouping even on ordered topics.
    pub message_key: Option<Vec<u8>>,

    /// Opaque message payload.
    pub message_value: Vec<u8>,

    /// Stream message headers.
    pub headers: sqlx::types::Json<HashMap<String, String>>,

    /// Current lifecycle status.
    pub status: EventStatus,

    /// Failed handler attempts so far. Monotonically non-decreasing and
    /// bounded by the topic's `max_retries`.
    pub attempts: i32,

    /// Error text from the most recent failed attempt.
    pub last_error: Option<String>,

    /// Lock-lease marker. Set when a worker claims the event; a lease older
    /// than the configured timeout no longer protects the row.
    pub locked_at: Option<DateTime<Utc>>,

    /// When the row was staged.
    pub created_at: DateTime<Utc>,

    /// Earliest time the event is visible for claiming. Advanced by retry
    /// scheduling.
    pub scheduled_at: DateTime<Utc>,

    /// When the event reached a terminal state.
    pub processed_at: Option<DateTime<Utc>>,
}

impl InboxEvent {
    /// Headers as a plain map for handler access.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers.0
    }

    /// Copies the payload into `Bytes` for cheaply cloneable hand-off to
    /// handlers.
    pub fn value_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.message_value)
    }

    /// Returns true if another attempt is permitted under `max_retries`.
    pub fn is_retryable(&self, max_retries: i32) -> bool {
        self.attempts < max_retries && !self.status.is_terminal()
    }

    /// Returns true if the event is visible for claiming at `now`,
    /// ignoring lease state.
    pub fn should_process(&self, now: DateTime<Utc>) -> bool {
        self.status == EventStatus::Pending && self.scheduled_at <= now
    }
}
