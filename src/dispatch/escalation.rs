//! Timed escalation chain
//!
//! Each booking that gets a helper also gets one background task. The task
//! sleeps for the escalation window and then checks the booking: if it is
//! still `assigned`, the next candidate from the ranked snapshot is claimed
//! and the task sleeps again. The chain ends (goes dormant) when the booking
//! leaves `assigned`, the candidates run out, or the chain is cancelled.
//!
//! ```text
//!            arm()
//!              │
//!              ▼
//!  ┌──────▶ Armed ──── cancel() ─────────────┐
//!  │           │ window elapses              │
//!  │           ▼                             ▼
//!  │        Check ── not assigned ───────▶ Dormant
//!  │           │ ─── candidates exhausted ──▶ │
//!  │           │ ─── booking changed ───────▶ │
//!  │           │ skip unavailable (no wait)
//!  └──── reassigned
//! ```
//!
//! Every booking write is conditional on the version read at the start of
//! the check, so a timer that fires after completion changes nothing and
//! releases the helper it may have just claimed. A helper the booking lets
//! go of is recorded as owed in the same write and settled afterwards; each
//! check first settles whatever an earlier step left owed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::events::{BookingEvent, EventBus};
use super::geo::{eta_minutes, haversine_km};
use super::release::{release_with_retry, settle_releases};
use crate::metrics;
use crate::models::{BookingPatch, BookingStatus, Candidate};
use crate::storage::{BookingStore, ClaimOutcome, HelperStore, StoreError, UpdateOutcome};

/// Default escalation window
pub const DEFAULT_ESCALATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of consecutive store failures a chain tolerates
pub const DEFAULT_MAX_STORE_RETRIES: u32 = 3;

// ============================================================================
// Configuration
// ============================================================================

/// Escalation timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationConfig {
    /// How long an assignee has before the chain moves on
    pub timeout: Duration,

    /// Consecutive failed checks before the chain gives up
    pub max_store_retries: u32,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_ESCALATION_TIMEOUT,
            max_store_retries: DEFAULT_MAX_STORE_RETRIES,
        }
    }
}

// ============================================================================
// Step Outcomes
// ============================================================================

/// Why a chain stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DormantReason {
    /// Booking no longer exists
    BookingMissing,
    /// Booking left `assigned` (completed or already exhausted)
    NotAssigned(BookingStatus),
    /// Ran past the last candidate; booking marked `no-helpers-available`
    Exhausted,
    /// Booking changed between read and write
    Superseded,
    /// Cancelled explicitly or replaced by a newer chain
    Cancelled,
    /// Too many consecutive store failures
    StoreFailures,
}

impl DormantReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BookingMissing => "booking_missing",
            Self::NotAssigned(_) => "not_assigned",
            Self::Exhausted => "exhausted",
            Self::Superseded => "superseded",
            Self::Cancelled => "cancelled",
            Self::StoreFailures => "store_failures",
        }
    }
}

/// Result of one check of the chain
#[derive(Debug)]
pub enum StepOutcome {
    /// A new helper was claimed; wait again before inspecting `next_index`
    Reassigned { helper_id: String, next_index: usize },
    /// Chain is finished
    Dormant(DormantReason),
    /// Store failed while inspecting `index`; retry from there next cycle
    StoreFailed { index: usize, error: StoreError },
}

// ============================================================================
// Scheduler
// ============================================================================

struct ArmedChain {
    generation: u64,
    token: CancellationToken,
}

struct Inner {
    helpers: Arc<dyn HelperStore>,
    bookings: Arc<dyn BookingStore>,
    events: EventBus,
    config: EscalationConfig,
    chains: Mutex<HashMap<String, ArmedChain>>,
    generation: AtomicU64,
}

/// Per-booking escalation timers
///
/// Cheap to clone; clones share the same set of armed chains.
#[derive(Clone)]
pub struct EscalationScheduler {
    inner: Arc<Inner>,
}

impl EscalationScheduler {
    pub fn new(
        helpers: Arc<dyn HelperStore>,
        bookings: Arc<dyn BookingStore>,
        events: EventBus,
        config: EscalationConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                helpers,
                bookings,
                events,
                config,
                chains: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> EscalationConfig {
        self.inner.config
    }

    /// Start the chain for a booking at candidate `next_index`
    ///
    /// An already armed chain for the same booking is cancelled first.
    /// Must be called from within a tokio runtime.
    pub fn arm(&self, booking_id: &str, next_index: usize) {
        let token = CancellationToken::new();
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);

        let previous = self.chains().insert(
            booking_id.to_string(),
            ArmedChain {
                generation,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
            tracing::debug!(booking_id, "Replaced armed escalation chain");
        }
        metrics::set_active_escalations(self.active_count());

        tracing::debug!(
            booking_id,
            next_index,
            timeout_secs = self.inner.config.timeout.as_secs(),
            "Escalation armed"
        );

        let scheduler = self.clone();
        let booking_id = booking_id.to_string();
        tokio::spawn(async move {
            let reason = scheduler.run_chain(&booking_id, next_index, token).await;
            scheduler.disarm(&booking_id, generation);
            metrics::record_escalation(reason.as_str());
            tracing::debug!(booking_id = %booking_id, reason = reason.as_str(), "Escalation dormant");
        });
    }

    /// Stop a pending chain; `false` if none was armed
    pub fn cancel(&self, booking_id: &str) -> bool {
        let removed = self.chains().remove(booking_id);
        metrics::set_active_escalations(self.active_count());
        match removed {
            Some(chain) => {
                chain.token.cancel();
                tracing::debug!(booking_id, "Escalation cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel every armed chain
    pub fn shutdown(&self) {
        let drained: Vec<_> = self.chains().drain().collect();
        for (booking_id, chain) in &drained {
            chain.token.cancel();
            tracing::debug!(booking_id = %booking_id, "Escalation cancelled on shutdown");
        }
        metrics::set_active_escalations(0);
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "Escalation chains cancelled");
        }
    }

    pub fn is_armed(&self, booking_id: &str) -> bool {
        self.chains().contains_key(booking_id)
    }

    pub fn active_count(&self) -> usize {
        self.chains().len()
    }

    fn chains(&self) -> MutexGuard<'_, HashMap<String, ArmedChain>> {
        self.inner
            .chains
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove the chain entry unless a newer chain has replaced it
    fn disarm(&self, booking_id: &str, generation: u64) {
        let mut chains = self.chains();
        if chains
            .get(booking_id)
            .is_some_and(|chain| chain.generation == generation)
        {
            chains.remove(booking_id);
        }
        drop(chains);
        metrics::set_active_escalations(self.active_count());
    }

    async fn run_chain(
        &self,
        booking_id: &str,
        mut index: usize,
        token: CancellationToken,
    ) -> DormantReason {
        let max_failures = self.inner.config.max_store_retries.max(1);
        let mut failures = 0u32;

        loop {
            tokio::select! {
                _ = token.cancelled() => return DormantReason::Cancelled,
                _ = tokio::time::sleep(self.inner.config.timeout) => {}
            }

            if token.is_cancelled() {
                return DormantReason::Cancelled;
            }

            match self.check_and_advance(booking_id, index).await {
                StepOutcome::Reassigned { next_index, .. } => {
                    failures = 0;
                    index = next_index;
                }
                StepOutcome::Dormant(reason) => return reason,
                StepOutcome::StoreFailed { index: at, error } => {
                    failures += 1;
                    index = at;
                    tracing::warn!(
                        booking_id,
                        index,
                        attempt = failures,
                        error = %error,
                        "Escalation check failed"
                    );
                    if failures >= max_failures {
                        tracing::error!(booking_id, index, "Escalation abandoned after store failures");
                        return DormantReason::StoreFailures;
                    }
                }
            }
        }
    }

    /// One check of the chain starting at candidate `index`
    ///
    /// Unavailable candidates are skipped without waiting. Store failures
    /// are returned, never raised.
    pub async fn check_and_advance(&self, booking_id: &str, index: usize) -> StepOutcome {
        let inner = &self.inner;

        if let Err(error) =
            settle_releases(inner.helpers.as_ref(), inner.bookings.as_ref(), booking_id).await
        {
            return StepOutcome::StoreFailed { index, error };
        }

        let booking = match inner.bookings.read_booking(booking_id).await {
            Ok(Some(booking)) => booking,
            Ok(None) => return StepOutcome::Dormant(DormantReason::BookingMissing),
            Err(error) => return StepOutcome::StoreFailed { index, error },
        };

        if booking.status != BookingStatus::Assigned {
            return StepOutcome::Dormant(DormantReason::NotAssigned(booking.status));
        }

        let mut index = index;
        loop {
            let Some(candidate) = booking.candidates.get(index) else {
                return self.exhaust(&booking.id, booking.version, &booking.assigned_helper_id, index).await;
            };

            let live = match inner.helpers.get_helper(&candidate.helper_id).await {
                Ok(live) => live,
                Err(error) => return StepOutcome::StoreFailed { index, error },
            };

            let Some(live) = live.filter(|h| h.is_available()) else {
                self.skip(&booking.id, candidate, index);
                index += 1;
                continue;
            };

            match inner.helpers.conditional_claim_helper(&candidate.helper_id).await {
                Ok(ClaimOutcome::Claimed) => {}
                Ok(ClaimOutcome::Conflict | ClaimOutcome::NotFound) => {
                    self.skip(&booking.id, candidate, index);
                    index += 1;
                    continue;
                }
                Err(error) => return StepOutcome::StoreFailed { index, error },
            }

            let distance_km = haversine_km(booking.requester_location, live.location);
            let assignee = Candidate {
                location: live.location,
                distance_km,
                ..candidate.clone()
            };
            let reassignment_count = booking.reassignment_count + 1;
            let mut patch = BookingPatch::reassign(
                &assignee,
                eta_minutes(distance_km),
                reassignment_count,
                index + 1,
            );
            if booking.assigned_helper_id != candidate.helper_id {
                patch = patch.owing_release(&booking.assigned_helper_id);
            }
            // The new assignee is held again, so any release still owed for it is void
            patch.settled_releases.push(candidate.helper_id.clone());

            match inner.bookings.update_booking(&booking.id, booking.version, patch).await {
                Ok(UpdateOutcome::Applied(_)) => {}
                Ok(UpdateOutcome::VersionConflict | UpdateOutcome::NotFound) => {
                    tracing::info!(
                        booking_id = %booking.id,
                        helper_id = %candidate.helper_id,
                        "Booking changed during escalation, releasing claim"
                    );
                    self.release_claim(&candidate.helper_id).await;
                    return StepOutcome::Dormant(DormantReason::Superseded);
                }
                Err(error) => {
                    self.release_claim(&candidate.helper_id).await;
                    return StepOutcome::StoreFailed { index, error };
                }
            }

            self.settle(&booking.id).await;

            tracing::info!(
                booking_id = %booking.id,
                from = %booking.assigned_helper_id,
                to = %candidate.helper_id,
                reassignment_count,
                "Booking reassigned"
            );
            inner.events.publish(BookingEvent::Reassigned {
                booking_id: booking.id.clone(),
                from_helper_id: booking.assigned_helper_id.clone(),
                to_helper_id: candidate.helper_id.clone(),
                reassignment_count,
            });

            return StepOutcome::Reassigned {
                helper_id: candidate.helper_id.clone(),
                next_index: index + 1,
            };
        }
    }

    async fn exhaust(
        &self,
        booking_id: &str,
        version: u64,
        last_assignee: &str,
        index: usize,
    ) -> StepOutcome {
        let patch = BookingPatch::status(BookingStatus::NoHelpersAvailable).owing_release(last_assignee);
        match self.inner.bookings.update_booking(booking_id, version, patch).await {
            Ok(UpdateOutcome::Applied(_)) => {
                tracing::warn!(booking_id, "No helpers left for booking");
                self.inner.events.publish(BookingEvent::Exhausted {
                    booking_id: booking_id.to_string(),
                });
                // The chain stays alive until the last assignee is released
                let inner = &self.inner;
                match settle_releases(inner.helpers.as_ref(), inner.bookings.as_ref(), booking_id).await {
                    Ok(_) => StepOutcome::Dormant(DormantReason::Exhausted),
                    Err(error) => StepOutcome::StoreFailed { index, error },
                }
            }
            Ok(UpdateOutcome::VersionConflict | UpdateOutcome::NotFound) => {
                StepOutcome::Dormant(DormantReason::Superseded)
            }
            Err(error) => StepOutcome::StoreFailed { index, error },
        }
    }

    fn skip(&self, booking_id: &str, candidate: &Candidate, index: usize) {
        tracing::debug!(booking_id, helper_id = %candidate.helper_id, index, "Candidate unavailable, skipping");
        self.inner.events.publish(BookingEvent::CandidateSkipped {
            booking_id: booking_id.to_string(),
            helper_id: candidate.helper_id.clone(),
            index,
        });
    }

    /// Undo a claim the booking never recorded
    async fn release_claim(&self, helper_id: &str) {
        if let Err(e) = release_with_retry(self.inner.helpers.as_ref(), helper_id).await {
            tracing::error!(helper_id, error = %e, "Failed to release claimed helper");
        }
    }

    /// Release what the booking owes; failures stay owed for the next check
    async fn settle(&self, booking_id: &str) {
        let inner = &self.inner;
        if let Err(e) = settle_releases(inner.helpers.as_ref(), inner.bookings.as_ref(), booking_id).await {
            tracing::warn!(booking_id, error = %e, "Owed helper release deferred");
        }
    }
}
