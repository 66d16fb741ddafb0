//! Storage abstraction for the processor.
//!
//! Trait-based contract over the inbox table so processing logic can be
//! tested without a database. Production uses the PostgreSQL repository in
//! `inbox-core`; tests use the in-memory mock, which enforces the same
//! eligibility predicate (status, schedule, lock lease) as the SQL claims.

use std::{future::Future, pin::Pin, sync::Arc};

use chrono::{DateTime, Utc};
use inbox_core::{error::Result, EventId, InboxEvent};

/// Storage operations required by the processor.
///
/// Implementations must make both claim operations atomic with respect to
/// concurrent callers: two claims never return the same event.
pub trait InboxStorage: Send + Sync + 'static {
    /// Claims up to `limit` eligible events for a topic in created-at order.
    fn claim_unordered(
        &self,
        topic: &str,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<InboxEvent>>> + Send + '_>>;

    /// Claims up to `limit` eligible events for an ordered-by-key topic: at
    /// most one event per key, and only the earliest outstanding event for
    /// each key.
    fn claim_ordered(
        &self,
        topic: &str,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<InboxEvent>>> + Send + '_>>;

    /// Returns a claimed event to the pool with a new attempt count, an
    /// advanced schedule, and the handler's error text.
    fn schedule_retry(
        &self,
        id: EventId,
        attempts: i32,
        scheduled_at: DateTime<Utc>,
        last_error: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Marks an event as successfully processed. Terminal.
    fn mark_completed(&self, id: EventId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Dead-letters an event with its final attempt count and error text.
    /// Terminal.
    fn mark_failed(
        &self,
        id: EventId,
        attempts: i32,
        last_error: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Production storage implementation backed by PostgreSQL.
///
/// Thin adapter over `inbox_core::storage::Storage`; all SQL lives in the
/// repository layer.
pub struct PostgresInboxStorage {
    storage: Arc<inbox_core::storage::Storage>,
}

impl PostgresInboxStorage {
    /// Creates a new PostgreSQL storage adapter.
    pub fn new(storage: Arc<inbox_core::storage::Storage>) -> Self {
        Self { storage }
    }
}

impl InboxStorage for PostgresInboxStorage {
    fn claim_unordered(
        &self,
        topic: &str,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<InboxEvent>>> + Send + '_>> {
        let storage = self.storage.clone();
        let topic = topic.to_string();
        Box::pin(async move { storage.inbox_events.claim_unordered(&topic, limit).await })
    }

    fn claim_ordered(
        &self,
        topic: &str,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<InboxEvent>>> + Send + '_>> {
        let storage = self.storage.clone();
        let topic = topic.to_string();
        Box::pin(async move { storage.inbox_events.claim_ordered(&topic, limit).await })
    }

    fn schedule_retry(
        &self,
        id: EventId,
        attempts: i32,
        scheduled_at: DateTime<Utc>,
        last_error: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move {
            storage.inbox_events.schedule_retry(id, attempts, scheduled_at, &last_error).await
        })
    }

    fn mark_completed(&self, id: EventId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.inbox_events.mark_completed(id).await })
    }

    fn mark_failed(
        &self,
        id: EventId,
        attempts: i32,
        last_error: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.inbox_events.mark_failed(id, attempts, &last_error).await })
    }
}

pub mod mock {
    //! In-memory mock storage for testing processor logic.
    //!
    //! Implements the same claim eligibility predicate as the SQL layer,
    //! including lock-lease expiry and per-key head selection, over a plain
    //! map. Supports injecting per-topic claim failures and inspecting
    //! event state.

    use std::{
        collections::{BTreeMap, HashMap},
        future::Future,
        pin::Pin,
        sync::Arc,
        time::Duration,
    };

    use chrono::{DateTime, Utc};
    use inbox_core::{error::CoreError, Clock, EventId, EventStatus, InboxEvent};
    use tokio::sync::RwLock;

    use super::{InboxStorage, Result};

    /// Mock storage holding events in a map keyed by id.
    ///
    /// Uses a `BTreeMap` so iteration follows insertion (id) order, which
    /// doubles as created-at order when a `TestClock` is advanced between
    /// inserts.
    pub struct MockInboxStorage {
        events: Arc<RwLock<BTreeMap<i64, InboxEvent>>>,
        claim_errors: Arc<RwLock<HashMap<String, String>>>,
        clock: Arc<dyn Clock>,
        lease_timeout: chrono::Duration,
        next_id: Arc<RwLock<i64>>,
    }

    impl MockInboxStorage {
        /// Creates an empty mock with the default five minute lease.
        pub fn new(clock: Arc<dyn Clock>) -> Self {
            Self::with_lease_timeout(clock, Duration::from_secs(300))
        }

        /// Creates an empty mock with a custom lock-lease window.
        pub fn with_lease_timeout(clock: Arc<dyn Clock>, lease_timeout: Duration) -> Self {
            let lease_timeout = chrono::Duration::from_std(lease_timeout)
                .unwrap_or_else(|_| chrono::Duration::minutes(5));
            Self {
                events: Arc::new(RwLock::new(BTreeMap::new())),
                claim_errors: Arc::new(RwLock::new(HashMap::new())),
                clock,
                lease_timeout,
                next_id: Arc::new(RwLock::new(1)),
            }
        }

        /// Stages a pending event, mirroring the ingestion collaborator.
        pub async fn insert_event(
            &self,
            topic: &str,
            message_key: Option<&[u8]>,
            message_value: &[u8],
        ) -> EventId {
            let now = self.clock.now_utc();
            let mut next_id = self.next_id.write().await;
            let id = *next_id;
            *next_id += 1;
            drop(next_id);

            let event = InboxEvent {
                id: EventId(id),
                topic: topic.to_string(),
                partition: 0,
                offset: id,
                message_key: message_key.map(<[u8]>::to_vec),
                message_value: message_value.to_vec(),
                headers: sqlx::types::Json(HashMap::new()),
                status: EventStatus::Pending,
                attempts: 0,
                last_error: None,
                locked_at: None,
                created_at: now,
                scheduled_at: now,
                processed_at: None,
            };
            self.events.write().await.insert(id, event);
            EventId(id)
        }

        /// Injects an error for the next claim on a topic.
        pub async fn inject_claim_error(&self, topic: &str, error: impl Into<String>) {
            self.claim_errors.write().await.insert(topic.to_string(), error.into());
        }

        /// Returns a snapshot of an event.
        pub async fn find_event(&self, id: EventId) -> Option<InboxEvent> {
            self.events.read().await.get(&id.0).cloned()
        }

        /// Counts events for a topic in a given status.
        pub async fn count_by_status(&self, topic: &str, status: EventStatus) -> usize {
            self.events
                .read()
                .await
                .values()
                .filter(|e| e.topic == topic && e.status == status)
                .count()
        }

        fn is_eligible(event: &InboxEvent, now: DateTime<Utc>, lease_cutoff: DateTime<Utc>) -> bool {
            let visible = match event.status {
                EventStatus::Pending => event.scheduled_at <= now,
                // Expired lease means the owning worker crashed
                EventStatus::Processing => true,
                EventStatus::Completed | EventStatus::Failed => false,
            };
            visible && event.locked_at.map_or(true, |locked_at| locked_at < lease_cutoff)
        }

        async fn take_claim_error(&self, topic: &str) -> Option<CoreError> {
            self.claim_errors.write().await.remove(topic).map(CoreError::Database)
        }

        async fn claim_ids(&self, ids: Vec<i64>, now: DateTime<Utc>) -> Vec<InboxEvent> {
            let mut events = self.events.write().await;
            let mut claimed = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(event) = events.get_mut(&id) {
                    event.status = EventStatus::Processing;
                    event.locked_at = Some(now);
                    claimed.push(event.clone());
                }
            }
            claimed
        }
    }

    impl InboxStorage for MockInboxStorage {
        fn claim_unordered(
            &self,
            topic: &str,
            limit: usize,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<InboxEvent>>> + Send + '_>> {
            let topic = topic.to_string();
            Box::pin(async move {
                if let Some(err) = self.take_claim_error(&topic).await {
                    return Err(err);
                }

                let now = self.clock.now_utc();
                let lease_cutoff = now - self.lease_timeout;

                let mut candidates: Vec<(DateTime<Utc>, i64)> = self
                    .events
                    .read()
                    .await
                    .values()
                    .filter(|e| e.topic == topic && Self::is_eligible(e, now, lease_cutoff))
                    .map(|e| (e.created_at, e.id.0))
                    .collect();
                candidates.sort();
                candidates.truncate(limit);

                let ids = candidates.into_iter().map(|(_, id)| id).collect();
                Ok(self.claim_ids(ids, now).await)
            })
        }

        fn claim_ordered(
            &self,
            topic: &str,
            limit: usize,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<InboxEvent>>> + Send + '_>> {
            let topic = topic.to_string();
            Box::pin(async move {
                if let Some(err) = self.take_claim_error(&topic).await {
                    return Err(err);
                }

                let now = self.clock.now_utc();
                let lease_cutoff = now - self.lease_timeout;

                let events = self.events.read().await;

                // Earliest non-terminal event per non-null key
                let mut heads: HashMap<&[u8], &InboxEvent> = HashMap::new();
                for event in events.values() {
                    if event.topic != topic || event.status.is_terminal() {
                        continue;
                    }
                    let Some(key) = event.message_key.as_deref() else { continue };
                    let earlier = heads.get(key).is_some_and(|head| {
                        (head.created_at, head.id) <= (event.created_at, event.id)
                    });
                    if !earlier {
                        heads.insert(key, event);
                    }
                }

                let mut candidates: Vec<(DateTime<Utc>, i64)> = heads
                    .values()
                    .filter(|e| Self::is_eligible(e, now, lease_cutoff))
                    .map(|e| (e.created_at, e.id.0))
                    .collect();

                // Keyless rows have no ordering grouping
                candidates.extend(
                    events
                        .values()
                        .filter(|e| {
                            e.topic == topic
                                && e.message_key.is_none()
                                && Self::is_eligible(e, now, lease_cutoff)
                        })
                        .map(|e| (e.created_at, e.id.0)),
                );
                drop(events);

                candidates.sort();
                candidates.truncate(limit);

                let ids = candidates.into_iter().map(|(_, id)| id).collect();
                Ok(self.claim_ids(ids, now).await)
            })
        }

        fn schedule_retry(
            &self,
            id: EventId,
            attempts: i32,
            scheduled_at: DateTime<Utc>,
            last_error: String,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async move {
                if let Some(event) = self.events.write().await.get_mut(&id.0) {
                    event.status = EventStatus::Pending;
                    event.attempts = attempts;
                    event.scheduled_at = scheduled_at;
                    event.last_error = Some(last_error);
                    event.locked_at = None;
                }
                Ok(())
            })
        }

        fn mark_completed(
            &self,
            id: EventId,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async move {
                let now = self.clock.now_utc();
                if let Some(event) = self.events.write().await.get_mut(&id.0) {
                    event.status = EventStatus::Completed;
                    event.processed_at = Some(now);
                    event.locked_at = None;
                }
                Ok(())
            })
        }

        fn mark_failed(
            &self,
            id: EventId,
            attempts: i32,
            last_error: String,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async move {
                let now = self.clock.now_utc();
                if let Some(event) = self.events.write().await.get_mut(&id.0) {
                    event.status = EventStatus::Failed;
                    event.attempts = attempts;
                    event.last_error = Some(last_error);
                    event.processed_at = Some(now);
                    event.locked_at = None;
                }
                Ok(())
            })
        }
    }
}
