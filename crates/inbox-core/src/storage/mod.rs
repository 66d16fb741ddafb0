//! Database access layer implementing the repository pattern for the inbox
//! table.
//!
//! The repository translates between domain models and the persisted schema.
//! All database operations MUST go through it; direct SQL elsewhere is
//! forbidden so the claiming discipline stays in one place.

use std::{sync::Arc, time::Duration};

use sqlx::PgPool;

pub mod inbox_events;

use crate::{error::Result, time::Clock};

/// Default lock-lease window after which a claimed event is considered
/// abandoned by its worker.
pub const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(300);

/// Container for repository instances providing unified database access.
#[derive(Clone)]
pub struct Storage {
    /// Repository for inbox event operations.
    pub inbox_events: Arc<inbox_events::Repository>,
}

impl Storage {
    /// Creates a new storage instance with the given pool and clock.
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self::with_lease_timeout(pool, clock, DEFAULT_LEASE_TIMEOUT)
    }

    /// Creates a storage instance with a custom lock-lease window.
    pub fn with_lease_timeout(pool: PgPool, clock: Arc<dyn Clock>, lease_timeout: Duration) -> Self {
        let pool = Arc::new(pool);
        Self {
            inbox_events: Arc::new(inbox_events::Repository::new(pool, clock, lease_timeout)),
        }
    }

    /// Performs a health check on the database connection.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.inbox_events.pool()).await?;

        Ok(())
    }
}
