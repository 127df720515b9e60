//! Returning helpers to the available pool
//!
//! Every terminal or reassigning booking write records the helper it lets go
//! of in `pending_releases` in the same compare-and-swap. The release itself
//! happens afterwards, and the entry is cleared only once the helper store
//! confirmed it. A failed release therefore stays on the booking and is
//! settled by the next completion call, escalation check or startup
//! recovery.

use std::time::Duration;

use crate::models::BookingPatch;
use crate::storage::{BookingStore, HelperStore, StoreError, StoreResult, UpdateOutcome};

/// Attempts per helper before a release is left pending
pub const RELEASE_ATTEMPTS: u32 = 3;

const RELEASE_BACKOFF: Duration = Duration::from_millis(50);

/// Clearing owed releases re-reads the booking at most this many times
const MAX_SETTLE_ATTEMPTS: usize = 5;

/// Release a helper, retrying with exponential backoff
pub async fn release_with_retry(helpers: &dyn HelperStore, helper_id: &str) -> StoreResult<()> {
    let mut delay = RELEASE_BACKOFF;
    let mut attempt = 1;

    loop {
        match helpers.release_helper(helper_id).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt >= RELEASE_ATTEMPTS => return Err(e),
            Err(e) => {
                tracing::warn!(helper_id, attempt, error = %e, "Helper release failed, retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
        }
    }
}

/// Release every helper `booking_id` still owes and clear them from it
///
/// Helpers released by this call are never released twice, even when the
/// clearing write has to be retried after a concurrent booking change.
/// Returns the helpers released.
pub async fn settle_releases(
    helpers: &dyn HelperStore,
    bookings: &dyn BookingStore,
    booking_id: &str,
) -> StoreResult<Vec<String>> {
    let mut released: Vec<String> = Vec::new();

    for attempt in 1..=MAX_SETTLE_ATTEMPTS {
        let Some(booking) = bookings.read_booking(booking_id).await? else {
            return Ok(released);
        };
        if booking.pending_releases.is_empty() {
            return Ok(released);
        }

        let mut failure = None;
        for helper_id in &booking.pending_releases {
            if released.contains(helper_id) {
                continue;
            }
            match release_with_retry(helpers, helper_id).await {
                Ok(()) => released.push(helper_id.clone()),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        let done: Vec<String> = booking
            .pending_releases
            .iter()
            .filter(|id| released.contains(id))
            .cloned()
            .collect();

        let outcome = if done.is_empty() {
            None
        } else {
            Some(
                bookings
                    .update_booking(booking_id, booking.version, BookingPatch::settle(done))
                    .await?,
            )
        };

        if let Some(error) = failure {
            tracing::warn!(booking_id, error = %error, "Helper release left pending");
            return Err(error);
        }

        match outcome {
            Some(UpdateOutcome::VersionConflict) => {
                tracing::debug!(booking_id, attempt, "Booking changed while settling releases, retrying");
            }
            _ => return Ok(released),
        }
    }

    Err(StoreError::unavailable(format!(
        "booking '{booking_id}' kept changing while settling releases"
    )))
}
