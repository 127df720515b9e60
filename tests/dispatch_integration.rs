//! End-to-end tests for assignment, escalation and completion
//!
//! These tests drive the public `Dispatcher` facade against both store
//! backends and verify:
//! - Ranking, ETA and the `no-helpers` soft failure
//! - Timer-driven reassignment and exhaustion (paused clock)
//! - At-most-once claims under concurrent requests
//! - Completion stopping the escalation chain
//! - Owed releases surviving helper store failures
//! - Re-arming open bookings on startup

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use common::{memory_dispatcher, plumber, sqlite_dispatcher, ORIGIN};
use helper_dispatch::dispatch::{
    BookingEvent, DispatchError, Dispatcher, DormantReason, RecoveryReport, StepOutcome,
};
use helper_dispatch::models::{
    AssignRequest, Booking, BookingPatch, BookingStatus, GeoPoint, Helper, HelperStatus,
    NewBooking,
};
use helper_dispatch::storage::{
    BookingStore, ClaimOutcome, HelperStore, MemoryStore, StoreError, StoreResult, Stores,
    UpdateOutcome,
};

fn plumbing_request() -> AssignRequest {
    AssignRequest::new("plumbing", ORIGIN, "Kitchen sink is leaking").with_requester("user-1")
}

async fn advance(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

// ============================================================================
// Assignment
// ============================================================================

#[tokio::test]
async fn test_assigns_nearest_helper_with_eta() {
    let (dispatcher, store) = memory_dispatcher(vec![
        plumber("far", 0.05, 5.0),
        plumber("near", 0.0179, 4.2),
    ]);

    let outcome = dispatcher.assign_helper(&plumbing_request()).await.unwrap();

    assert_eq!(outcome.status, BookingStatus::Assigned);
    assert_eq!(outcome.message, "Helper near is on the way!");
    assert_eq!(outcome.eta_minutes, Some(8));
    let distance = outcome.distance_km.unwrap();
    assert!((distance - 1.99).abs() < 0.01, "distance was {distance}");

    let booking = dispatcher
        .get_booking(outcome.booking_id.as_deref().unwrap())
        .await
        .unwrap();
    assert_eq!(booking.assigned_helper_id, "near");
    assert_eq!(booking.requester_id, "user-1");
    assert_eq!(booking.candidates.len(), 2);
    assert_eq!(booking.candidates[1].helper_id, "far");
    assert_eq!(booking.next_candidate_index, 1);
    assert_eq!(booking.reassignment_count, 0);

    let near = store.get_helper("near").await.unwrap().unwrap();
    assert_eq!(near.status, HelperStatus::Busy);
    dispatcher.shutdown();
}

#[tokio::test]
async fn test_no_helpers_is_soft_failure() {
    let electrician = Helper::new(
        "e-1",
        "Ravi",
        vec!["electrical".to_string()],
        4.9,
        ORIGIN,
    );
    let (dispatcher, store) = memory_dispatcher(vec![electrician]);

    let outcome = dispatcher.assign_helper(&plumbing_request()).await.unwrap();

    assert_eq!(outcome.status, BookingStatus::NoHelpers);
    assert_eq!(outcome.message, "No helpers available at the moment.");
    assert!(outcome.booking_id.is_none());
    assert_eq!(store.booking_count().await, 0);
    assert_eq!(dispatcher.active_escalations(), 0);
}

#[tokio::test]
async fn test_invalid_requests_rejected() {
    let (dispatcher, store) = memory_dispatcher(vec![plumber("a", 0.01, 4.0)]);

    let blank = AssignRequest::new("   ", ORIGIN, "");
    assert!(matches!(
        dispatcher.assign_helper(&blank).await,
        Err(DispatchError::InvalidRequest { .. })
    ));

    let off_globe = AssignRequest::new("plumbing", GeoPoint::new(123.0, 0.0), "");
    assert!(matches!(
        dispatcher.assign_helper(&off_globe).await,
        Err(DispatchError::InvalidRequest { .. })
    ));

    assert_eq!(store.booking_count().await, 0);
}

#[tokio::test]
async fn test_location_update_changes_ranking() {
    let (dispatcher, _store) = memory_dispatcher(vec![
        plumber("a", 0.01, 4.0),
        plumber("b", 0.03, 4.0),
    ]);

    let before = dispatcher.rank(&plumbing_request()).await.unwrap();
    assert_eq!(before[0].helper_id, "a");

    dispatcher
        .update_helper_location("b", ORIGIN)
        .await
        .unwrap();

    let after = dispatcher.rank(&plumbing_request()).await.unwrap();
    assert_eq!(after[0].helper_id, "b");
    assert!(after[0].distance_km < 1e-9);
}

// ============================================================================
// Escalation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_reassigns_after_timeout() {
    let (dispatcher, store) = memory_dispatcher(vec![
        plumber("a", 0.01, 4.0),
        plumber("b", 0.02, 4.0),
    ]);

    let outcome = dispatcher.assign_helper(&plumbing_request()).await.unwrap();
    let booking_id = outcome.booking_id.unwrap();

    advance(29).await;
    let booking = dispatcher.get_booking(&booking_id).await.unwrap();
    assert_eq!(booking.assigned_helper_id, "a");

    advance(2).await;
    let booking = dispatcher.get_booking(&booking_id).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Assigned);
    assert_eq!(booking.assigned_helper_id, "b");
    assert_eq!(booking.reassignment_count, 1);
    assert_eq!(booking.next_candidate_index, 2);

    let a = store.get_helper("a").await.unwrap().unwrap();
    let b = store.get_helper("b").await.unwrap().unwrap();
    assert_eq!(a.status, HelperStatus::Available);
    assert_eq!(b.status, HelperStatus::Busy);
    assert!(dispatcher.escalation().is_armed(&booking_id));
    dispatcher.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_exhaustion_marks_no_helpers_available() {
    let (dispatcher, store) = memory_dispatcher(vec![
        plumber("a", 0.01, 4.0),
        plumber("b", 0.02, 4.0),
    ]);

    let booking_id = dispatcher
        .assign_helper(&plumbing_request())
        .await
        .unwrap()
        .booking_id
        .unwrap();

    advance(61).await;

    let booking = dispatcher.get_booking(&booking_id).await.unwrap();
    assert_eq!(booking.status, BookingStatus::NoHelpersAvailable);
    assert_eq!(booking.reassignment_count, 1);
    assert!(!dispatcher.escalation().is_armed(&booking_id));

    for helper in store.list_helpers().await.unwrap() {
        assert_eq!(helper.status, HelperStatus::Available, "{} still busy", helper.id);
    }

    let err = dispatcher.complete_booking(&booking_id, 4.0).await.unwrap_err();
    assert!(matches!(err, DispatchError::InvalidState { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_escalation_skips_busy_candidate() {
    let (dispatcher, store) = memory_dispatcher(vec![
        plumber("a", 0.01, 4.0),
        plumber("b", 0.02, 4.0),
        plumber("c", 0.03, 4.0),
    ]);
    let mut events = dispatcher.subscribe();

    let booking_id = dispatcher
        .assign_helper(&plumbing_request())
        .await
        .unwrap()
        .booking_id
        .unwrap();

    // Someone else grabs b before the timer fires
    assert!(store.conditional_claim_helper("b").await.unwrap().is_claimed());

    advance(31).await;

    let booking = dispatcher.get_booking(&booking_id).await.unwrap();
    assert_eq!(booking.assigned_helper_id, "c");
    assert_eq!(booking.reassignment_count, 1);
    assert_eq!(booking.next_candidate_index, 3);

    let kinds: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|envelope| envelope.event)
        .collect();
    assert!(matches!(kinds[0], BookingEvent::Assigned { .. }));
    assert!(matches!(
        &kinds[1],
        BookingEvent::CandidateSkipped { helper_id, index: 1, .. } if helper_id == "b"
    ));
    assert!(matches!(
        &kinds[2],
        BookingEvent::Reassigned { from_helper_id, to_helper_id, reassignment_count: 1, .. }
            if from_helper_id == "a" && to_helper_id == "c"
    ));
    dispatcher.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_escalation_uses_live_location() {
    let (dispatcher, _store) = memory_dispatcher(vec![
        plumber("a", 0.01, 4.0),
        plumber("b", 0.02, 4.0),
    ]);

    let booking_id = dispatcher
        .assign_helper(&plumbing_request())
        .await
        .unwrap()
        .booking_id
        .unwrap();

    dispatcher
        .update_helper_location("b", GeoPoint::new(ORIGIN.lat + 0.0179, ORIGIN.lng))
        .await
        .unwrap();
    advance(31).await;

    let booking = dispatcher.get_booking(&booking_id).await.unwrap();
    assert_eq!(booking.assigned_helper_id, "b");
    assert_eq!(booking.eta_minutes, 8);
    dispatcher.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_escalation_on_sqlite_store() {
    let (dispatcher, store) = sqlite_dispatcher(vec![
        plumber("a", 0.01, 4.0),
        plumber("b", 0.02, 4.0),
    ])
    .await;

    let booking_id = dispatcher
        .assign_helper(&plumbing_request())
        .await
        .unwrap()
        .booking_id
        .unwrap();

    advance(31).await;
    let booking = dispatcher.get_booking(&booking_id).await.unwrap();
    assert_eq!(booking.assigned_helper_id, "b");
    assert_eq!(booking.reassignment_count, 1);
    // Reassignment, then the write clearing the released assignee
    assert_eq!(booking.version, 3);
    assert!(booking.pending_releases.is_empty());

    advance(30).await;
    let booking = dispatcher.get_booking(&booking_id).await.unwrap();
    assert_eq!(booking.status, BookingStatus::NoHelpersAvailable);
    assert!(store.get_helper("b").await.unwrap().unwrap().is_available());
}

// ============================================================================
// Completion
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_completion_stops_escalation() {
    let (dispatcher, store) = memory_dispatcher(vec![
        plumber("a", 0.01, 4.0),
        plumber("b", 0.02, 4.0),
    ]);

    let booking_id = dispatcher
        .assign_helper(&plumbing_request())
        .await
        .unwrap()
        .booking_id
        .unwrap();

    advance(10).await;
    let receipt = dispatcher.complete_booking(&booking_id, 4.5).await.unwrap();
    assert!(receipt.success);
    assert_eq!(dispatcher.active_escalations(), 0);

    advance(120).await;

    let booking = dispatcher.get_booking(&booking_id).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Completed);
    assert_eq!(booking.assigned_helper_id, "a");
    assert_eq!(booking.reassignment_count, 0);
    assert_eq!(booking.rating, Some(4.5));
    assert!(booking.completed_at.is_some());

    let b = store.get_helper("b").await.unwrap().unwrap();
    assert_eq!(b.status, HelperStatus::Available);
    let a = store.get_helper("a").await.unwrap().unwrap();
    assert_eq!(a.status, HelperStatus::Available);
}

#[tokio::test]
async fn test_late_timer_after_completion_is_noop() {
    let (dispatcher, _store) = memory_dispatcher(vec![
        plumber("a", 0.01, 4.0),
        plumber("b", 0.02, 4.0),
    ]);

    let booking_id = dispatcher
        .assign_helper(&plumbing_request())
        .await
        .unwrap()
        .booking_id
        .unwrap();
    dispatcher.complete_booking(&booking_id, 5.0).await.unwrap();
    let before = dispatcher.get_booking(&booking_id).await.unwrap();

    let step = dispatcher.escalation().check_and_advance(&booking_id, 1).await;

    assert!(matches!(
        step,
        StepOutcome::Dormant(DormantReason::NotAssigned(BookingStatus::Completed))
    ));
    assert_eq!(dispatcher.get_booking(&booking_id).await.unwrap(), before);
}

#[tokio::test]
async fn test_complete_rejects_bad_input() {
    let (dispatcher, _store) = memory_dispatcher(vec![plumber("a", 0.01, 4.0)]);
    let booking_id = dispatcher
        .assign_helper(&plumbing_request())
        .await
        .unwrap()
        .booking_id
        .unwrap();

    assert!(matches!(
        dispatcher.complete_booking(&booking_id, 7.5).await,
        Err(DispatchError::InvalidRequest { .. })
    ));
    assert!(matches!(
        dispatcher.complete_booking("missing", 4.0).await,
        Err(DispatchError::NotFound { .. })
    ));

    dispatcher.complete_booking(&booking_id, 3.0).await.unwrap();
    assert!(matches!(
        dispatcher.complete_booking(&booking_id, 3.0).await,
        Err(DispatchError::InvalidState { status: BookingStatus::Completed, .. })
    ));
}

// ============================================================================
// Concurrency
// ============================================================================

async fn race_for_single_helper(dispatcher: Arc<Dispatcher>) -> usize {
    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                let request = plumbing_request().with_requester(format!("user-{i}"));
                dispatcher.assign_helper(&request).await
            })
        })
        .collect();

    let mut assigned = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(outcome) if outcome.status == BookingStatus::Assigned => assigned += 1,
            Ok(outcome) => assert_eq!(outcome.status, BookingStatus::NoHelpers),
            Err(err) => assert!(matches!(err, DispatchError::ClaimConflict { attempted: 1 })),
        }
    }
    dispatcher.shutdown();
    assigned
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_claim_once_memory() {
    let (dispatcher, store) = memory_dispatcher(vec![plumber("only", 0.01, 4.0)]);

    assert_eq!(race_for_single_helper(dispatcher).await, 1);
    assert_eq!(store.booking_count().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_claim_once_sqlite() {
    let (dispatcher, store) = sqlite_dispatcher(vec![plumber("only", 0.01, 4.0)]).await;

    assert_eq!(race_for_single_helper(dispatcher).await, 1);
    assert!(!store.get_helper("only").await.unwrap().unwrap().is_available());
}

fn shared_pool() -> Vec<Helper> {
    vec![
        plumber("p1", 0.01, 4.0),
        plumber("p2", 0.02, 4.5),
        plumber("p3", 0.03, 5.0),
    ]
}

/// Fire `requests` concurrent assignments; the helper id each booking got
async fn race_for_shared_pool(dispatcher: Arc<Dispatcher>, requests: usize) -> Vec<String> {
    let tasks: Vec<_> = (0..requests)
        .map(|i| {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                let request = plumbing_request().with_requester(format!("user-{i}"));
                dispatcher.assign_helper(&request).await
            })
        })
        .collect();

    let mut assigned = Vec::new();
    for task in tasks {
        match task.await.unwrap() {
            Ok(outcome) if outcome.status == BookingStatus::Assigned => {
                let booking = dispatcher.get_booking(&outcome.booking_id.unwrap()).await.unwrap();
                assigned.push(booking.assigned_helper_id);
            }
            Ok(outcome) => assert_eq!(outcome.status, BookingStatus::NoHelpers),
            Err(err) => assert!(matches!(err, DispatchError::ClaimConflict { .. })),
        }
    }
    dispatcher.shutdown();
    assigned
}

fn assert_pairwise_distinct(assigned: &[String]) {
    let mut unique = assigned.to_vec();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), assigned.len(), "helper assigned twice: {assigned:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_pools_claim_once_memory() {
    let (dispatcher, store) = memory_dispatcher(shared_pool());

    let assigned = race_for_shared_pool(dispatcher, 12).await;

    assert_eq!(assigned.len(), 3);
    assert_pairwise_distinct(&assigned);
    assert_eq!(store.booking_count().await, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_pools_claim_once_sqlite() {
    let (dispatcher, store) = sqlite_dispatcher(shared_pool()).await;

    let assigned = race_for_shared_pool(dispatcher, 12).await;

    assert_eq!(assigned.len(), 3);
    assert_pairwise_distinct(&assigned);
    for helper in store.list_helpers().await.unwrap() {
        assert_eq!(helper.status, HelperStatus::Busy, "{} never claimed", helper.id);
    }
}

// ============================================================================
// Completion racing a reassignment
// ============================================================================

/// Booking store that completes the booking just before the first update
struct CompletesFirst {
    inner: Arc<MemoryStore>,
    raced: AtomicBool,
}

#[async_trait]
impl BookingStore for CompletesFirst {
    async fn create_booking(&self, booking: NewBooking) -> StoreResult<String> {
        self.inner.create_booking(booking).await
    }

    async fn read_booking(&self, booking_id: &str) -> StoreResult<Option<Booking>> {
        self.inner.read_booking(booking_id).await
    }

    async fn update_booking(
        &self,
        booking_id: &str,
        expected_version: u64,
        patch: BookingPatch,
    ) -> StoreResult<UpdateOutcome> {
        if !self.raced.swap(true, Ordering::SeqCst) {
            let completed = BookingPatch::complete(4.0, Utc::now());
            self.inner
                .update_booking(booking_id, expected_version, completed)
                .await?;
        }
        self.inner.update_booking(booking_id, expected_version, patch).await
    }

    async fn list_unsettled_bookings(&self) -> StoreResult<Vec<Booking>> {
        self.inner.list_unsettled_bookings().await
    }
}

#[tokio::test]
async fn test_completion_wins_race_against_reassignment() {
    let store = Arc::new(MemoryStore::with_helpers(vec![
        plumber("a", 0.01, 4.0),
        plumber("b", 0.02, 4.0),
    ]));
    let stores = Stores {
        helpers: store.clone(),
        bookings: Arc::new(CompletesFirst {
            inner: store.clone(),
            raced: AtomicBool::new(false),
        }),
    };
    let dispatcher = Dispatcher::new(stores, common::escalation_config(), 16);

    let booking_id = dispatcher
        .assign_helper(&plumbing_request())
        .await
        .unwrap()
        .booking_id
        .unwrap();
    dispatcher.escalation().cancel(&booking_id);

    let step = dispatcher.escalation().check_and_advance(&booking_id, 1).await;

    assert!(matches!(step, StepOutcome::Dormant(DormantReason::Superseded)));
    let booking = dispatcher.get_booking(&booking_id).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Completed);
    assert_eq!(booking.assigned_helper_id, "a");
    assert_eq!(booking.reassignment_count, 0);
    assert!(store.get_helper("b").await.unwrap().unwrap().is_available());
}

// ============================================================================
// Helper store failures
// ============================================================================

/// Helper store that can reject releases and can let a claim land right
/// before an upsert
struct FlakyHelpers {
    inner: Arc<MemoryStore>,
    fail_releases: AtomicBool,
    claim_before_upsert: AtomicBool,
}

#[async_trait]
impl HelperStore for FlakyHelpers {
    async fn query_available_helpers(&self, skill: &str) -> StoreResult<Vec<Helper>> {
        self.inner.query_available_helpers(skill).await
    }

    async fn get_helper(&self, helper_id: &str) -> StoreResult<Option<Helper>> {
        self.inner.get_helper(helper_id).await
    }

    async fn conditional_claim_helper(&self, helper_id: &str) -> StoreResult<ClaimOutcome> {
        self.inner.conditional_claim_helper(helper_id).await
    }

    async fn release_helper(&self, helper_id: &str) -> StoreResult<()> {
        if self.fail_releases.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("release rejected"));
        }
        self.inner.release_helper(helper_id).await
    }

    async fn update_helper_location(&self, helper_id: &str, location: GeoPoint) -> StoreResult<bool> {
        self.inner.update_helper_location(helper_id, location).await
    }

    async fn upsert_helper(&self, helper: Helper) -> StoreResult<()> {
        if self.claim_before_upsert.swap(false, Ordering::SeqCst) {
            self.inner.conditional_claim_helper(&helper.id).await?;
        }
        self.inner.upsert_helper(helper).await
    }

    async fn list_helpers(&self) -> StoreResult<Vec<Helper>> {
        self.inner.list_helpers().await
    }
}

fn flaky_dispatcher(helpers: Vec<Helper>) -> (Dispatcher, Arc<FlakyHelpers>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::with_helpers(helpers));
    let flaky = Arc::new(FlakyHelpers {
        inner: store.clone(),
        fail_releases: AtomicBool::new(false),
        claim_before_upsert: AtomicBool::new(false),
    });
    let stores = Stores {
        helpers: flaky.clone(),
        bookings: store.clone(),
    };
    (Dispatcher::new(stores, common::escalation_config(), 16), flaky, store)
}

async fn helper_status(store: &MemoryStore, id: &str) -> HelperStatus {
    store.get_helper(id).await.unwrap().unwrap().status
}

#[tokio::test(start_paused = true)]
async fn test_completion_retry_releases_helper_after_store_failure() {
    let (dispatcher, flaky, store) = flaky_dispatcher(vec![plumber("a", 0.01, 4.0)]);
    let booking_id = dispatcher
        .assign_helper(&plumbing_request())
        .await
        .unwrap()
        .booking_id
        .unwrap();

    flaky.fail_releases.store(true, Ordering::SeqCst);
    let err = dispatcher.complete_booking(&booking_id, 4.0).await.unwrap_err();
    assert!(matches!(err, DispatchError::StoreUnavailable(_)));

    let booking = dispatcher.get_booking(&booking_id).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Completed);
    assert_eq!(booking.pending_releases, vec!["a"]);
    assert_eq!(helper_status(&store, "a").await, HelperStatus::Busy);
    assert!(!dispatcher.escalation().is_armed(&booking_id));

    flaky.fail_releases.store(false, Ordering::SeqCst);
    let receipt = dispatcher.complete_booking(&booking_id, 4.0).await.unwrap();
    assert!(receipt.success);
    assert_eq!(helper_status(&store, "a").await, HelperStatus::Available);
    assert!(dispatcher.get_booking(&booking_id).await.unwrap().pending_releases.is_empty());

    let err = dispatcher.complete_booking(&booking_id, 4.0).await.unwrap_err();
    assert!(matches!(err, DispatchError::InvalidState { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_failed_reassignment_release_settled_by_next_check() {
    let (dispatcher, flaky, store) =
        flaky_dispatcher(vec![plumber("a", 0.01, 4.0), plumber("b", 0.02, 4.0)]);
    let booking_id = dispatcher
        .assign_helper(&plumbing_request())
        .await
        .unwrap()
        .booking_id
        .unwrap();
    dispatcher.escalation().cancel(&booking_id);

    flaky.fail_releases.store(true, Ordering::SeqCst);
    let step = dispatcher.escalation().check_and_advance(&booking_id, 1).await;
    assert!(matches!(step, StepOutcome::Reassigned { ref helper_id, next_index: 2 } if helper_id == "b"));

    let booking = dispatcher.get_booking(&booking_id).await.unwrap();
    assert_eq!(booking.assigned_helper_id, "b");
    assert_eq!(booking.pending_releases, vec!["a"]);
    assert_eq!(helper_status(&store, "a").await, HelperStatus::Busy);

    flaky.fail_releases.store(false, Ordering::SeqCst);
    let step = dispatcher.escalation().check_and_advance(&booking_id, 2).await;
    assert!(matches!(step, StepOutcome::Dormant(DormantReason::Exhausted)));

    let booking = dispatcher.get_booking(&booking_id).await.unwrap();
    assert_eq!(booking.status, BookingStatus::NoHelpersAvailable);
    assert!(booking.pending_releases.is_empty());
    for helper in store.list_helpers().await.unwrap() {
        assert_eq!(helper.status, HelperStatus::Available, "{} still busy", helper.id);
    }
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_chain_keeps_running_until_release_lands() {
    let (dispatcher, flaky, store) = flaky_dispatcher(vec![plumber("a", 0.01, 4.0)]);
    let booking_id = dispatcher
        .assign_helper(&plumbing_request())
        .await
        .unwrap()
        .booking_id
        .unwrap();

    flaky.fail_releases.store(true, Ordering::SeqCst);
    advance(31).await;

    let booking = dispatcher.get_booking(&booking_id).await.unwrap();
    assert_eq!(booking.status, BookingStatus::NoHelpersAvailable);
    assert_eq!(booking.pending_releases, vec!["a"]);
    assert!(dispatcher.escalation().is_armed(&booking_id));

    flaky.fail_releases.store(false, Ordering::SeqCst);
    advance(31).await;

    assert_eq!(helper_status(&store, "a").await, HelperStatus::Available);
    assert!(dispatcher.get_booking(&booking_id).await.unwrap().pending_releases.is_empty());
    assert!(!dispatcher.escalation().is_armed(&booking_id));
}

#[tokio::test]
async fn test_register_keeps_claim_that_lands_first() {
    let (dispatcher, flaky, store) = flaky_dispatcher(vec![plumber("a", 0.01, 4.0)]);

    flaky.claim_before_upsert.store(true, Ordering::SeqCst);
    let registered = dispatcher.register_helper(plumber("a", 0.03, 4.8)).await.unwrap();

    assert_eq!(registered.status, HelperStatus::Busy);
    let live = store.get_helper("a").await.unwrap().unwrap();
    assert_eq!(live.status, HelperStatus::Busy);
    assert_eq!(live.rating, 4.8);
    assert_eq!(store.conditional_claim_helper("a").await.unwrap(), ClaimOutcome::Conflict);
}

// ============================================================================
// Startup recovery
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_recover_rearms_assigned_bookings() {
    let store = Arc::new(MemoryStore::with_helpers(vec![
        plumber("a", 0.01, 4.0),
        plumber("b", 0.02, 4.0),
    ]));

    let first = Dispatcher::new(Stores::shared(store.clone()), common::escalation_config(), 16);
    let booking_id = first
        .assign_helper(&plumbing_request())
        .await
        .unwrap()
        .booking_id
        .unwrap();
    first.shutdown();

    let second = Dispatcher::new(Stores::shared(store.clone()), common::escalation_config(), 16);
    let report = second.recover().await.unwrap();
    assert_eq!(report, RecoveryReport { rearmed: 1, released: 0 });
    assert!(second.escalation().is_armed(&booking_id));
    assert_eq!(second.recover().await.unwrap().rearmed, 0);

    advance(31).await;

    let booking = second.get_booking(&booking_id).await.unwrap();
    assert_eq!(booking.assigned_helper_id, "b");
    assert_eq!(booking.reassignment_count, 1);
    assert_eq!(helper_status(&store, "a").await, HelperStatus::Available);
    second.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_recover_settles_owed_releases() {
    let (dispatcher, flaky, store) = flaky_dispatcher(vec![plumber("a", 0.01, 4.0)]);
    let booking_id = dispatcher
        .assign_helper(&plumbing_request())
        .await
        .unwrap()
        .booking_id
        .unwrap();
    flaky.fail_releases.store(true, Ordering::SeqCst);
    assert!(dispatcher.complete_booking(&booking_id, 5.0).await.is_err());

    let restarted = Dispatcher::new(Stores::shared(store.clone()), common::escalation_config(), 16);
    let report = restarted.recover().await.unwrap();

    assert_eq!(report, RecoveryReport { rearmed: 0, released: 1 });
    assert_eq!(helper_status(&store, "a").await, HelperStatus::Available);
    assert!(!restarted.escalation().is_armed(&booking_id));
}
