//! Facade wiring stores, engine, escalation and lifecycle together

use tokio::sync::broadcast;

use super::assignment::AssignmentEngine;
use super::error::DispatchResult;
use super::escalation::{EscalationConfig, EscalationScheduler};
use super::events::{EventBus, EventEnvelope};
use super::lifecycle::BookingLifecycle;
use super::release::settle_releases;
use crate::models::{
    AssignOutcome, AssignRequest, Booking, BookingStatus, Candidate, GeoPoint, Helper, Receipt,
};
use crate::storage::Stores;

/// What [`Dispatcher::recover`] picked up from the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Assigned bookings whose escalation chain was armed again
    pub rearmed: usize,
    /// Owed helper releases settled
    pub released: usize,
}

/// Entry point used by the HTTP server and the CLI
pub struct Dispatcher {
    stores: Stores,
    engine: AssignmentEngine,
    lifecycle: BookingLifecycle,
    escalation: EscalationScheduler,
    events: EventBus,
}

impl Dispatcher {
    pub fn new(stores: Stores, config: EscalationConfig, event_capacity: usize) -> Self {
        let events = EventBus::new(event_capacity);
        let escalation = EscalationScheduler::new(
            stores.helpers.clone(),
            stores.bookings.clone(),
            events.clone(),
            config,
        );
        let engine = AssignmentEngine::new(
            stores.helpers.clone(),
            stores.bookings.clone(),
            escalation.clone(),
            events.clone(),
        );
        let lifecycle = BookingLifecycle::new(
            stores.helpers.clone(),
            stores.bookings.clone(),
            escalation.clone(),
            events.clone(),
        );

        Self {
            stores,
            engine,
            lifecycle,
            escalation,
            events,
        }
    }

    pub async fn assign_helper(&self, request: &AssignRequest) -> DispatchResult<AssignOutcome> {
        self.engine.assign(request).await
    }

    /// Ranked candidates for a request, nobody claimed
    pub async fn rank(&self, request: &AssignRequest) -> DispatchResult<Vec<Candidate>> {
        self.engine.preview(request).await
    }

    pub async fn complete_booking(&self, booking_id: &str, rating: f64) -> DispatchResult<Receipt> {
        self.lifecycle.complete_booking(booking_id, rating).await
    }

    pub async fn get_booking(&self, booking_id: &str) -> DispatchResult<Booking> {
        self.lifecycle.get_booking(booking_id).await
    }

    pub async fn update_helper_location(
        &self,
        helper_id: &str,
        location: GeoPoint,
    ) -> DispatchResult<Receipt> {
        self.lifecycle.update_helper_location(helper_id, location).await
    }

    pub async fn register_helper(&self, helper: Helper) -> DispatchResult<Helper> {
        self.lifecycle.register_helper(helper).await
    }

    pub async fn list_helpers(&self, available_only: bool) -> DispatchResult<Vec<Helper>> {
        self.lifecycle.list_helpers(available_only).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.events.subscribe()
    }

    pub fn escalation(&self) -> &EscalationScheduler {
        &self.escalation
    }

    /// Number of bookings with a pending escalation timer
    pub fn active_escalations(&self) -> usize {
        self.escalation.active_count()
    }

    /// Pick up bookings a previous process left open
    ///
    /// Settles owed helper releases and arms escalation again for every
    /// booking still `assigned`, resuming at its stored candidate index. A
    /// re-armed chain waits a full window from now. Must be called from
    /// within a tokio runtime.
    pub async fn recover(&self) -> DispatchResult<RecoveryReport> {
        let unsettled = self.stores.bookings.list_unsettled_bookings().await?;
        let mut report = RecoveryReport::default();

        for booking in unsettled {
            if !booking.pending_releases.is_empty() {
                match settle_releases(
                    self.stores.helpers.as_ref(),
                    self.stores.bookings.as_ref(),
                    &booking.id,
                )
                .await
                {
                    Ok(released) => report.released += released.len(),
                    Err(e) => {
                        tracing::warn!(booking_id = %booking.id, error = %e, "Owed helper release still pending");
                    }
                }
            }

            if booking.status == BookingStatus::Assigned && !self.escalation.is_armed(&booking.id) {
                self.escalation.arm(&booking.id, booking.next_candidate_index);
                report.rearmed += 1;
            }
        }

        tracing::info!(
            rearmed = report.rearmed,
            released = report.released,
            "Recovered open bookings"
        );
        Ok(report)
    }

    /// Cancel all pending escalation timers
    pub fn shutdown(&self) {
        self.escalation.shutdown();
    }
}
