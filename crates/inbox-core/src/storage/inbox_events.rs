//! Repository for inbox event database operations.
//!
//! Implements the atomic claiming protocol on top of `FOR UPDATE SKIP
//! LOCKED`, plus the status transitions of the retry state machine. Claims
//! are the only multi-statement operations and always run inside a single
//! transaction so that selecting eligible rows and flipping them to
//! `processing` is invisible to concurrent claimers.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;

use crate::{
    error::Result,
    models::{EventId, EventStatus, InboxEvent},
    time::Clock,
};

const EVENT_COLUMNS: &str = r#"id, topic, partition, "offset", message_key, message_value,
           headers, status, attempts, last_error, locked_at,
           created_at, scheduled_at, processed_at"#;

/// Repository for inbox event database operations.
///
/// Every claimable-row predicate in this module is the same: a row is
/// eligible when it is `pending` with `scheduled_at` in the past, or
/// `processing` with an expired lease (crashed worker), and in either case
/// not protected by a live lease.
pub struct Repository {
    pool: Arc<PgPool>,
    clock: Arc<dyn Clock>,
    lease_timeout: chrono::Duration,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>, clock: Arc<dyn Clock>, lease_timeout: Duration) -> Self {
        let lease_timeout = chrono::Duration::from_std(lease_timeout)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        Self { pool, clock, lease_timeout }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Claims up to `limit` eligible events for a topic in FIFO order.
    ///
    /// Runs a locking read with `SKIP LOCKED` so concurrent claimers never
    /// receive overlapping sets, then atomically flips the selected rows to
    /// `processing` and refreshes their lease.
    ///
    /// # Errors
    ///
    /// Returns error if the claim transaction fails.
    pub async fn claim_unordered(&self, topic: &str, limit: usize) -> Result<Vec<InboxEvent>> {
        let now = self.clock.now_utc();
        let lease_cutoff = now - self.lease_timeout;

        let mut tx = self.pool.begin().await?;

        let event_ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM inbox_events
            WHERE topic = $1
              AND ((status = 'pending' AND scheduled_at <= $2) OR status = 'processing')
              AND (locked_at IS NULL OR locked_at < $3)
            ORDER BY created_at ASC, id ASC
            LIMIT $4
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(topic)
        .bind(now)
        .bind(lease_cutoff)
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await?;

        if event_ids.is_empty() {
            tx.rollback().await?;
            return Ok(Vec::new());
        }

        let events = self.mark_claimed(&mut tx, &event_ids, now).await?;
        tx.commit().await?;

        debug!(topic, claimed = events.len(), "claimed unordered batch");
        Ok(events)
    }

    /// Claims up to `limit` eligible events for an ordered-by-key topic.
    ///
    /// For each distinct non-null message key only the earliest-created
    /// non-terminal event (the key head) is considered, and it is claimed
    /// only if it is itself eligible. A key whose head is `processing`
    /// under a live lease is excluded entirely, which preserves per-key
    /// causal order: no event for a key is claimed while an earlier event
    /// for the same key is still outstanding. Null-key rows carry no
    /// ordering grouping and are claimed with unordered semantics.
    ///
    /// # Errors
    ///
    /// Returns error if the claim transaction fails.
    pub async fn claim_ordered(&self, topic: &str, limit: usize) -> Result<Vec<InboxEvent>> {
        let now = self.clock.now_utc();
        let lease_cutoff = now - self.lease_timeout;

        let mut tx = self.pool.begin().await?;

        let event_ids: Vec<i64> = sqlx::query_scalar(
            r#"
            WITH heads AS (
                SELECT DISTINCT ON (message_key) id, status, scheduled_at, locked_at
                FROM inbox_events
                WHERE topic = $1
                  AND status IN ('pending', 'processing')
                  AND message_key IS NOT NULL
                ORDER BY message_key, created_at ASC, id ASC
            ),
            eligible AS (
                SELECT id FROM heads
                WHERE ((status = 'pending' AND scheduled_at <= $2) OR status = 'processing')
                  AND (locked_at IS NULL OR locked_at < $3)
                UNION ALL
                SELECT id FROM inbox_events
                WHERE topic = $1
                  AND message_key IS NULL
                  AND ((status = 'pending' AND scheduled_at <= $2) OR status = 'processing')
                  AND (locked_at IS NULL OR locked_at < $3)
            )
            SELECT id FROM inbox_events
            WHERE id IN (SELECT id FROM eligible)
            ORDER BY created_at ASC, id ASC
            LIMIT $4
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(topic)
        .bind(now)
        .bind(lease_cutoff)
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await?;

        if event_ids.is_empty() {
            tx.rollback().await?;
            return Ok(Vec::new());
        }

        let events = self.mark_claimed(&mut tx, &event_ids, now).await?;
        tx.commit().await?;

        debug!(topic, claimed = events.len(), "claimed ordered batch");
        Ok(events)
    }

    /// Flips selected rows to `processing` and refreshes their lease.
    async fn mark_claimed(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        event_ids: &[i64],
        now: DateTime<Utc>,
    ) -> Result<Vec<InboxEvent>> {
        let mut events = sqlx::query_as::<_, InboxEvent>(&format!(
            r#"
            UPDATE inbox_events
            SET status = 'processing', locked_at = $2
            WHERE id = ANY($1)
            RETURNING {EVENT_COLUMNS}
            "#,
        ))
        .bind(event_ids)
        .bind(now)
        .fetch_all(&mut **tx)
        .await?;

        // RETURNING does not guarantee row order; restore FIFO order here.
        events.sort_by_key(|event| (event.created_at, event.id));

        Ok(events)
    }

    /// Stages a new event. Used by the ingestion collaborator, not by the
    /// processor.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
        message_key: Option<&[u8]>,
        message_value: &[u8],
        headers: &HashMap<String, String>,
    ) -> Result<EventId> {
        let now = self.clock.now_utc();

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO inbox_events (
                topic, partition, "offset", message_key, message_value,
                headers, status, attempts, created_at, scheduled_at
            ) VALUES ($1, $2, $3, $4, $5, $6, 'pending', 0, $7, $7)
            RETURNING id
            "#,
        )
        .bind(topic)
        .bind(partition)
        .bind(offset)
        .bind(message_key)
        .bind(message_value)
        .bind(sqlx::types::Json(headers))
        .bind(now)
        .fetch_one(&*self.pool)
        .await?;

        Ok(EventId(id))
    }

    /// Updates the status and last error of an event.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn update_status(
        &self,
        id: EventId,
        status: EventStatus,
        last_error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE inbox_events
            SET status = $2, last_error = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .bind(last_error)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Schedules a retry: back to `pending` with an advanced `scheduled_at`,
    /// the new attempt count, the handler's error text, and the lease
    /// cleared.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn schedule_retry(
        &self,
        id: EventId,
        attempts: i32,
        scheduled_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE inbox_events
            SET status = 'pending',
                attempts = $2,
                scheduled_at = $3,
                last_error = $4,
                locked_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(attempts)
        .bind(scheduled_at)
        .bind(last_error)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Marks an event as successfully processed. Terminal.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_completed(&self, id: EventId) -> Result<()> {
        let now = self.clock.now_utc();

        sqlx::query(
            r#"
            UPDATE inbox_events
            SET status = 'completed', processed_at = $2, locked_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Dead-letters an event after retries are exhausted. Terminal; the
    /// final error text is retained for diagnosis.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_failed(&self, id: EventId, attempts: i32, last_error: &str) -> Result<()> {
        let now = self.clock.now_utc();

        sqlx::query(
            r#"
            UPDATE inbox_events
            SET status = 'failed',
                attempts = $2,
                last_error = $3,
                processed_at = $4,
                locked_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(attempts)
        .bind(last_error)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Finds an event by id.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, id: EventId) -> Result<Option<InboxEvent>> {
        let event = sqlx::query_as::<_, InboxEvent>(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM inbox_events
            WHERE id = $1
            "#,
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(event)
    }

    /// Counts events for a topic in a given status.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count_by_status(&self, topic: &str, status: EventStatus) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM inbox_events
            WHERE topic = $1 AND status = $2
            "#,
        )
        .bind(topic)
        .bind(status.to_string())
        .fetch_one(&*self.pool)
        .await?;

        Ok(count.0)
    }

    /// Resets a dead-lettered event so it can be processed again.
    ///
    /// Operational escape hatch for manual replay once the underlying issue
    /// is fixed. The processor itself never calls this.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn reset_dead_letter(&self, id: EventId) -> Result<()> {
        let now = self.clock.now_utc();

        sqlx::query(
            r#"
            UPDATE inbox_events
            SET status = 'pending',
                attempts = 0,
                last_error = NULL,
                scheduled_at = $2,
                locked_at = NULL,
                processed_at = NULL
            WHERE id = $1 AND status = 'failed'
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::RealClock;

    #[tokio::test]
    async fn repository_can_be_created() {
        let pool = sqlx::PgPool::connect_lazy("postgresql://test").unwrap();
        let _repo = Repository::new(
            Arc::new(pool),
            Arc::new(RealClock::new()),
            Duration::from_secs(300),
        );
    }
}
