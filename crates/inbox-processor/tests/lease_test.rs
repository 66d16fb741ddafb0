//! Lock-lease tests: a claimed event is protected while its lease is
//! live, becomes claimable again after the lease expires (crashed-worker
//! recovery), and expiry never touches terminal rows or the attempt count.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use inbox_core::{EventStatus, ProcessorConfig, TestClock, TopicConfig};
use inbox_processor::{
    storage::mock::MockInboxStorage, FnHandler, InboxStorage, Processor, TopicRegistry,
};
use tokio_util::sync::CancellationToken;

const LEASE: Duration = Duration::from_secs(300);

#[tokio::test]
async fn live_lease_blocks_reclaim() {
    let clock = Arc::new(TestClock::new());
    let storage = MockInboxStorage::new(clock.clone());

    storage.insert_event("orders", None, b"order-1").await;

    let claimed = storage.claim_unordered("orders", 10).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].status, EventStatus::Processing);
    assert!(claimed[0].locked_at.is_some());

    // Claimed rows are invisible while the lease is live.
    assert!(storage.claim_unordered("orders", 10).await.unwrap().is_empty());

    clock.advance(LEASE - Duration::from_secs(1));
    assert!(storage.claim_unordered("orders", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn expired_lease_allows_reclaim_without_counting_an_attempt() {
    let clock = Arc::new(TestClock::new());
    let storage = MockInboxStorage::new(clock.clone());

    let id = storage.insert_event("orders", None, b"order-1").await;

    let claimed = storage.claim_unordered("orders", 10).await.unwrap();
    let first_lock = claimed[0].locked_at.unwrap();

    // The owning worker crashes; past the lease the row is claimable again.
    clock.advance(LEASE + Duration::from_secs(1));
    let reclaimed = storage.claim_unordered("orders", 10).await.unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].id, id);
    assert_eq!(reclaimed[0].status, EventStatus::Processing);
    assert!(reclaimed[0].locked_at.unwrap() > first_lock);

    // A crash is not a handler failure: attempts are unchanged.
    assert_eq!(reclaimed[0].attempts, 0);
}

#[tokio::test]
async fn successive_claims_never_overlap() {
    let clock = Arc::new(TestClock::new());
    let storage = MockInboxStorage::new(clock.clone());

    for i in 0..4u8 {
        storage.insert_event("orders", None, &[i]).await;
        clock.advance(Duration::from_secs(1));
    }

    let first = storage.claim_unordered("orders", 2).await.unwrap();
    let second = storage.claim_unordered("orders", 10).await.unwrap();

    assert_eq!(first.len(), 2);
    assert_eq!(second.len(), 2);
    for claimed in &first {
        assert!(second.iter().all(|other| other.id != claimed.id));
    }
}

#[tokio::test]
async fn terminal_events_are_never_reclaimed() {
    let clock = Arc::new(TestClock::new());
    let storage = MockInboxStorage::new(clock.clone());

    let completed = storage.insert_event("orders", None, b"order-1").await;
    let failed = storage.insert_event("orders", None, b"order-2").await;

    let claimed = storage.claim_unordered("orders", 10).await.unwrap();
    assert_eq!(claimed.len(), 2);
    storage.mark_completed(completed).await.unwrap();
    storage.mark_failed(failed, 3, "gave up".to_string()).await.unwrap();

    clock.advance(LEASE * 100);
    assert!(storage.claim_unordered("orders", 10).await.unwrap().is_empty());
    assert_eq!(storage.find_event(completed).await.unwrap().status, EventStatus::Completed);
    assert_eq!(storage.find_event(failed).await.unwrap().status, EventStatus::Failed);
}

#[tokio::test]
async fn ordered_claims_also_recover_expired_leases() {
    let clock = Arc::new(TestClock::new());
    let storage = MockInboxStorage::new(clock.clone());

    let head = storage.insert_event("orders", Some(b"k1"), b"first").await;
    clock.advance(Duration::from_secs(1));
    storage.insert_event("orders", Some(b"k1"), b"second").await;

    let claimed = storage.claim_ordered("orders", 10).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, head);

    // While the head's lease is live its key stays blocked.
    assert!(storage.claim_ordered("orders", 10).await.unwrap().is_empty());

    // After expiry the head itself is reclaimed, not its successor.
    clock.advance(LEASE + Duration::from_secs(1));
    let reclaimed = storage.claim_ordered("orders", 10).await.unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].id, head);
}

#[tokio::test]
async fn cancellation_mid_handler_leaves_event_to_lease_recovery() {
    let clock = Arc::new(TestClock::new());
    let storage = Arc::new(MockInboxStorage::new(clock.clone()));

    // The handler triggers shutdown itself, then blocks as if mid-work.
    let token_slot: Arc<Mutex<Option<CancellationToken>>> = Arc::new(Mutex::new(None));
    let handler_slot = token_slot.clone();

    let mut registry = TopicRegistry::new();
    registry.register(
        "orders",
        Arc::new(FnHandler::new(move |_event| {
            let slot = handler_slot.clone();
            async move {
                if let Some(token) = slot.lock().unwrap().clone() {
                    token.cancel();
                }
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }
        })),
        TopicConfig::default(),
    );
    let processor =
        Processor::new(storage.clone(), registry, ProcessorConfig::default(), clock.clone())
            .expect("valid processor config");
    *token_slot.lock().unwrap() = Some(processor.cancellation_token());

    let id = storage.insert_event("orders", None, b"order-1").await;

    let summary = processor.process(10).await;
    assert_eq!(summary.claimed, 1);
    assert_eq!(summary.completed, 0);
    assert_eq!(summary.retried, 0);
    assert_eq!(summary.dead_lettered, 0);

    // Shutdown is not a handler failure: no transition, no attempt charged.
    let event = storage.find_event(id).await.unwrap();
    assert_eq!(event.status, EventStatus::Processing);
    assert_eq!(event.attempts, 0);
    assert!(event.last_error.is_none());

    // Lease expiry returns it to the pool.
    clock.advance(LEASE + Duration::from_secs(1));
    let reclaimed = storage.claim_unordered("orders", 10).await.unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].id, id);
}

#[tokio::test]
async fn processor_completes_event_abandoned_by_crashed_worker() {
    let clock = Arc::new(TestClock::new());
    let storage = Arc::new(MockInboxStorage::new(clock.clone()));
    let handled = Arc::new(AtomicUsize::new(0));

    let mut registry = TopicRegistry::new();
    let counter = handled.clone();
    registry.register(
        "orders",
        Arc::new(FnHandler::new(move |_event| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })),
        TopicConfig::default(),
    );
    let processor =
        Processor::new(storage.clone(), registry, ProcessorConfig::default(), clock.clone())
            .expect("valid processor config");

    let id = storage.insert_event("orders", None, b"order-1").await;

    // Another worker claims the event and dies without finishing it.
    storage.claim_unordered("orders", 10).await.unwrap();

    let summary = processor.process(10).await;
    assert_eq!(summary.claimed, 0);
    assert_eq!(handled.load(Ordering::SeqCst), 0);

    clock.advance(LEASE + Duration::from_secs(1));
    let summary = processor.process(10).await;
    assert_eq!(summary.completed, 1);
    assert_eq!(handled.load(Ordering::SeqCst), 1);
    assert_eq!(storage.find_event(id).await.unwrap().status, EventStatus::Completed);
}
