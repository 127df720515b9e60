//! Booking lifecycle and helper registry operations

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use super::assignment::validate_location;
use super::error::{DispatchError, DispatchResult};
use super::escalation::EscalationScheduler;
use super::events::{BookingEvent, EventBus};
use super::release::settle_releases;
use crate::metrics;
use crate::models::{Booking, BookingPatch, BookingStatus, GeoPoint, Helper, HelperStatus, Receipt};
use crate::storage::{BookingStore, HelperStore, StoreError, UpdateOutcome};

/// Completion re-reads the booking at most this many times on version conflicts
const MAX_COMPLETE_ATTEMPTS: usize = 5;

/// Inclusive bounds of a rating
pub const RATING_RANGE: std::ops::RangeInclusive<f64> = 0.0..=5.0;

fn validate_rating(rating: f64) -> DispatchResult<()> {
    if rating.is_finite() && RATING_RANGE.contains(&rating) {
        Ok(())
    } else {
        Err(DispatchError::invalid_request(format!(
            "rating {rating} must be between 0 and 5"
        )))
    }
}

/// Completion, lookup and helper maintenance
pub struct BookingLifecycle {
    helpers: Arc<dyn HelperStore>,
    bookings: Arc<dyn BookingStore>,
    escalation: EscalationScheduler,
    events: EventBus,
}

impl BookingLifecycle {
    pub fn new(
        helpers: Arc<dyn HelperStore>,
        bookings: Arc<dyn BookingStore>,
        escalation: EscalationScheduler,
        events: EventBus,
    ) -> Self {
        Self {
            helpers,
            bookings,
            escalation,
            events,
        }
    }

    /// Mark a booking completed and free its helper
    ///
    /// The helper released is the assignee stored at the version the write
    /// succeeded against, so a concurrent reassignment cannot cause the wrong
    /// helper to be freed. The completing write records that release as
    /// owed; if the helper store fails afterwards the call errors and a retry
    /// finishes the release without touching the booking again.
    pub async fn complete_booking(&self, booking_id: &str, rating: f64) -> DispatchResult<Receipt> {
        validate_rating(rating)?;

        for attempt in 1..=MAX_COMPLETE_ATTEMPTS {
            let booking = self
                .bookings
                .read_booking(booking_id)
                .await?
                .ok_or_else(|| DispatchError::booking_not_found(booking_id))?;

            if booking.is_terminal() {
                return self.finish_terminal(booking).await;
            }

            let patch = BookingPatch::complete(rating, Utc::now())
                .owing_release(&booking.assigned_helper_id);
            match self.bookings.update_booking(booking_id, booking.version, patch).await? {
                UpdateOutcome::Applied(_) => {
                    self.escalation.cancel(booking_id);

                    tracing::info!(
                        booking_id,
                        helper_id = %booking.assigned_helper_id,
                        rating,
                        "Booking completed"
                    );
                    metrics::record_completion();
                    self.events.publish(BookingEvent::Completed {
                        booking_id: booking_id.to_string(),
                        helper_id: booking.assigned_helper_id,
                        rating,
                    });

                    settle_releases(self.helpers.as_ref(), self.bookings.as_ref(), booking_id)
                        .await?;
                    return Ok(Receipt::ok("Booking completed"));
                }
                UpdateOutcome::VersionConflict => {
                    tracing::debug!(booking_id, attempt, "Booking changed during completion, retrying");
                }
                UpdateOutcome::NotFound => return Err(DispatchError::booking_not_found(booking_id)),
            }
        }

        Err(StoreError::unavailable(format!(
            "booking '{booking_id}' kept changing during completion"
        ))
        .into())
    }

    /// Settle releases a terminal booking still owes
    ///
    /// A completed booking with nothing owed was already completed, which is
    /// an invalid state for a second completion.
    async fn finish_terminal(&self, booking: Booking) -> DispatchResult<Receipt> {
        if booking.pending_releases.is_empty() {
            return Err(DispatchError::invalid_state(booking.id, booking.status));
        }

        let released =
            settle_releases(self.helpers.as_ref(), self.bookings.as_ref(), &booking.id).await?;
        tracing::info!(booking_id = %booking.id, ?released, "Finished pending helper release");

        if booking.status == BookingStatus::Completed {
            Ok(Receipt::ok("Booking completed"))
        } else {
            Err(DispatchError::invalid_state(booking.id, booking.status))
        }
    }

    pub async fn get_booking(&self, booking_id: &str) -> DispatchResult<Booking> {
        self.bookings
            .read_booking(booking_id)
            .await?
            .ok_or_else(|| DispatchError::booking_not_found(booking_id))
    }

    pub async fn update_helper_location(
        &self,
        helper_id: &str,
        location: GeoPoint,
    ) -> DispatchResult<Receipt> {
        validate_location(location)?;

        if !self.helpers.update_helper_location(helper_id, location).await? {
            return Err(DispatchError::helper_not_found(helper_id));
        }

        tracing::debug!(helper_id, %location, "Helper location updated");
        Ok(Receipt::ok("Location updated"))
    }

    /// Insert or update a helper
    ///
    /// A blank id gets a generated one. Re-registering an existing helper
    /// never changes its availability; the store keeps the stored status.
    pub async fn register_helper(&self, mut helper: Helper) -> DispatchResult<Helper> {
        helper.name = helper.name.trim().to_string();
        if helper.name.is_empty() {
            return Err(DispatchError::invalid_request("helper name is required"));
        }
        helper.skills.retain(|s| !s.trim().is_empty());
        if helper.skills.is_empty() {
            return Err(DispatchError::invalid_request("helper needs at least one skill"));
        }
        validate_rating(helper.rating)?;
        validate_location(helper.location)?;

        if helper.id.trim().is_empty() {
            helper.id = Uuid::new_v4().to_string();
        }
        helper.status = HelperStatus::Available;
        helper.last_updated = Utc::now();

        self.helpers.upsert_helper(helper.clone()).await?;
        tracing::info!(helper_id = %helper.id, name = %helper.name, "Helper registered");

        let stored = self.helpers.get_helper(&helper.id).await?;
        Ok(stored.unwrap_or(helper))
    }

    pub async fn list_helpers(&self, available_only: bool) -> DispatchResult<Vec<Helper>> {
        let mut helpers = self.helpers.list_helpers().await?;
        if available_only {
            helpers.retain(Helper::is_available);
        }
        Ok(helpers)
    }
}
