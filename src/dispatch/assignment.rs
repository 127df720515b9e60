//! Assignment engine
//!
//! Turns a service request into a booking: validate, query, rank, claim the
//! best candidate still free, persist the booking and arm its escalation.

use std::sync::Arc;

use super::error::{DispatchError, DispatchResult};
use super::escalation::EscalationScheduler;
use super::events::{BookingEvent, EventBus};
use super::geo::eta_minutes;
use super::ranking::rank_candidates;
use super::release::release_with_retry;
use crate::metrics;
use crate::models::{
    AssignOutcome, AssignRequest, Candidate, GeoPoint, NewBooking,
    ANONYMOUS_REQUESTER,
};
use crate::storage::{BookingStore, ClaimOutcome, HelperStore};

/// Validated form of an [`AssignRequest`]
#[derive(Debug, Clone, PartialEq)]
pub struct ValidRequest {
    pub service_type: String,
    pub location: GeoPoint,
    pub description: String,
    pub requester_id: String,
}

/// Check an assignment request
pub fn validate_request(request: &AssignRequest) -> DispatchResult<ValidRequest> {
    let service_type = request.service_type.trim();
    if service_type.is_empty() {
        return Err(DispatchError::invalid_request("service type is required"));
    }

    let location = request
        .location
        .ok_or_else(|| DispatchError::invalid_request("location is required"))?;
    validate_location(location)?;

    let requester_id = request
        .requester_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .unwrap_or(ANONYMOUS_REQUESTER);

    Ok(ValidRequest {
        service_type: service_type.to_string(),
        location,
        description: request.description.clone(),
        requester_id: requester_id.to_string(),
    })
}

/// Finite coordinates inside the latitude/longitude ranges
pub fn validate_location(location: GeoPoint) -> DispatchResult<()> {
    if location.is_valid() {
        Ok(())
    } else {
        Err(DispatchError::invalid_request(format!(
            "location ({}, {}) is out of range",
            location.lat, location.lng
        )))
    }
}

/// Claims the nearest qualified helper for a request
pub struct AssignmentEngine {
    helpers: Arc<dyn HelperStore>,
    bookings: Arc<dyn BookingStore>,
    escalation: EscalationScheduler,
    events: EventBus,
}

impl AssignmentEngine {
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

    /// Query and rank eligible helpers without claiming anyone
    pub async fn preview(&self, request: &AssignRequest) -> DispatchResult<Vec<Candidate>> {
        let request = validate_request(request)?;
        let helpers = self.helpers.query_available_helpers(&request.service_type).await?;
        match rank_candidates(&helpers, request.location) {
            Ok(candidates) => Ok(candidates),
            Err(DispatchError::NoEligibleHelpers) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Assign a helper and arm escalation for the new booking
    ///
    /// An empty candidate list is a soft failure reported with status
    /// `no-helpers`; no booking is written in that case.
    pub async fn assign(&self, request: &AssignRequest) -> DispatchResult<AssignOutcome> {
        let request = validate_request(request)?;

        let helpers = self.helpers.query_available_helpers(&request.service_type).await?;
        let candidates = match rank_candidates(&helpers, request.location) {
            Ok(candidates) => candidates,
            Err(DispatchError::NoEligibleHelpers) => {
                tracing::info!(service_type = %request.service_type, "No eligible helpers");
                metrics::record_assignment("no_helpers");
                return Ok(AssignOutcome::no_helpers());
            }
            Err(e) => return Err(e),
        };

        let index = self.claim_first(&candidates).await?;
        let chosen = &candidates[index];
        let eta = eta_minutes(chosen.distance_km);

        let new_booking = NewBooking {
            requester_id: request.requester_id,
            service_type: request.service_type,
            description: request.description,
            requester_location: request.location,
            assigned_helper_id: chosen.helper_id.clone(),
            assigned_helper_name: chosen.name.clone(),
            distance_km: chosen.distance_km,
            eta_minutes: eta,
            candidates: candidates.clone(),
            next_candidate_index: index + 1,
        };

        let booking_id = match self.bookings.create_booking(new_booking).await {
            Ok(id) => id,
            Err(e) => {
                if let Err(release_err) = release_with_retry(self.helpers.as_ref(), &chosen.helper_id).await {
                    tracing::error!(
                        helper_id = %chosen.helper_id,
                        error = %release_err,
                        "Failed to release helper after booking write failed"
                    );
                }
                metrics::record_assignment("error");
                return Err(e.into());
            }
        };

        self.escalation.arm(&booking_id, index + 1);

        tracing::info!(
            booking_id = %booking_id,
            helper_id = %chosen.helper_id,
            distance_km = chosen.distance_km,
            eta_minutes = eta,
            candidates = candidates.len(),
            "Helper assigned"
        );
        metrics::record_assignment("assigned");
        self.events.publish(BookingEvent::Assigned {
            booking_id: booking_id.clone(),
            helper_id: chosen.helper_id.clone(),
            distance_km: chosen.distance_km,
            eta_minutes: eta,
        });

        Ok(AssignOutcome::assigned(booking_id, chosen, eta))
    }

    /// Claim candidates in rank order; index of the first one won
    async fn claim_first(&self, candidates: &[Candidate]) -> DispatchResult<usize> {
        for (index, candidate) in candidates.iter().enumerate() {
            match self.helpers.conditional_claim_helper(&candidate.helper_id).await? {
                ClaimOutcome::Claimed => return Ok(index),
                outcome => {
                    tracing::debug!(
                        helper_id = %candidate.helper_id,
                        index,
                        ?outcome,
                        "Claim lost, trying next candidate"
                    );
                }
            }
        }

        metrics::record_assignment("conflict");
        Err(DispatchError::ClaimConflict {
            attempted: candidates.len(),
        })
    }
}
