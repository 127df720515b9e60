//! Error types for the dispatch core

use thiserror::Error;

use crate::models::BookingStatus;
use crate::storage::StoreError;

/// Result type for dispatch operations
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Dispatch-specific errors
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Missing service type, bad coordinates or an out-of-range rating
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Ranking received no helpers
    ///
    /// The assignment engine turns this into the `no-helpers` result
    /// instead of surfacing it.
    #[error("no eligible helpers")]
    NoEligibleHelpers,

    /// Every ranked candidate was claimed by someone else first
    #[error("all {attempted} candidates were claimed concurrently")]
    ClaimConflict { attempted: usize },

    /// Backing store failed
    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),

    /// Booking or helper does not exist
    #[error("{what} '{id}' not found")]
    NotFound { what: &'static str, id: String },

    /// Operation not allowed in the booking's current status
    #[error("booking '{booking_id}' is {status}")]
    InvalidState {
        booking_id: String,
        status: BookingStatus,
    },
}

impl DispatchError {
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    pub fn booking_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            what: "booking",
            id: id.into(),
        }
    }

    pub fn helper_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            what: "helper",
            id: id.into(),
        }
    }

    pub fn invalid_state(booking_id: impl Into<String>, status: BookingStatus) -> Self {
        Self::InvalidState {
            booking_id: booking_id.into(),
            status,
        }
    }

    /// Whether retrying the same call may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ClaimConflict { .. } | Self::StoreUnavailable(_))
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "INVALID_REQUEST",
            Self::NoEligibleHelpers => "NO_ELIGIBLE_HELPERS",
            Self::ClaimConflict { .. } => "CLAIM_CONFLICT",
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidState { .. } => "INVALID_STATE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DispatchError::booking_not_found("b-42");
        assert_eq!(err.to_string(), "booking 'b-42' not found");

        let err = DispatchError::invalid_state("b-1", BookingStatus::Completed);
        assert_eq!(err.to_string(), "booking 'b-1' is completed");

        let err = DispatchError::from(StoreError::unavailable("memory store is offline"));
        assert_eq!(err.to_string(), "store unavailable: memory store is offline");
    }

    #[test]
    fn test_recoverable() {
        assert!(DispatchError::ClaimConflict { attempted: 2 }.is_recoverable());
        assert!(DispatchError::from(StoreError::unavailable("down")).is_recoverable());
        assert!(!DispatchError::invalid_request("bad").is_recoverable());
        assert!(!DispatchError::helper_not_found("h").is_recoverable());
    }

    #[test]
    fn test_codes() {
        assert_eq!(DispatchError::NoEligibleHelpers.code(), "NO_ELIGIBLE_HELPERS");
        assert_eq!(
            DispatchError::from(StoreError::unavailable("down")).code(),
            "STORE_UNAVAILABLE"
        );
    }
}
