//! Store contracts consumed by the dispatch core
//!
//! The core never touches a database directly. It reads and writes helpers
//! and bookings through the two traits below, so the same assignment and
//! escalation logic runs against SQLite in production and an in-memory map
//! in tests.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Dispatch Core                          │
//! │        (assignment engine, escalation, lifecycle)           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Store Traits                            │
//! │               HelperStore, BookingStore                     │
//! └─────────────────────────────────────────────────────────────┘
//!                    │                       │
//!                    ▼                       ▼
//!          ┌─────────────────┐     ┌─────────────────┐
//!          │     SQLite      │     │     Memory      │
//!          │  Implementation │     │  Implementation │
//!          └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Atomicity
//!
//! Two writes carry a compare-and-swap contract that every implementation
//! must honour:
//!
//! - [`HelperStore::conditional_claim_helper`] flips a helper from
//!   `available` to `busy` only if it is still `available`.
//! - [`BookingStore::update_booking`] applies a patch only if the stored
//!   version equals the version the caller read.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Booking, BookingPatch, GeoPoint, Helper, NewBooking};

// ============================================================================
// Errors
// ============================================================================

/// Failures raised by a store backend
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Stored document could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A lock guarding the backend was poisoned by a panicking writer
    #[error("store lock poisoned: {0}")]
    LockPoisoned(String),

    /// Backend cannot serve requests right now
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Stored row holds a value the model cannot represent
    #[error("corrupt record '{id}': {reason}")]
    Corrupt { id: String, reason: String },
}

impl StoreError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable(reason.into())
    }

    pub fn corrupt(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

// ============================================================================
// Outcomes
// ============================================================================

/// Result of a conditional claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The helper was available and is now busy
    Claimed,
    /// The helper exists but someone else holds it
    Conflict,
    /// No helper with that id
    NotFound,
}

impl ClaimOutcome {
    pub fn is_claimed(&self) -> bool {
        matches!(self, Self::Claimed)
    }
}

/// Result of a version-checked booking update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Patch written; carries the new version
    Applied(u64),
    /// The booking changed since it was read
    VersionConflict,
    /// No booking with that id
    NotFound,
}

impl UpdateOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

// ============================================================================
// Store Traits
// ============================================================================

/// Query and claim interface over the helper collection
#[async_trait]
pub trait HelperStore: Send + Sync {
    /// Helpers whose status is available and whose skills contain `skill`
    async fn query_available_helpers(&self, skill: &str) -> StoreResult<Vec<Helper>>;

    /// Live helper record
    async fn get_helper(&self, helper_id: &str) -> StoreResult<Option<Helper>>;

    /// Atomically move a helper from available to busy
    async fn conditional_claim_helper(&self, helper_id: &str) -> StoreResult<ClaimOutcome>;

    /// Return a helper to available; unknown ids are ignored
    async fn release_helper(&self, helper_id: &str) -> StoreResult<()>;

    /// Overwrite a helper's location; `false` if the helper does not exist
    async fn update_helper_location(&self, helper_id: &str, location: GeoPoint) -> StoreResult<bool>;

    /// Insert a helper, or replace an existing one's profile
    ///
    /// An existing helper keeps its stored status; only claims and releases
    /// change availability.
    async fn upsert_helper(&self, helper: Helper) -> StoreResult<()>;

    /// Every helper, ordered by id
    async fn list_helpers(&self) -> StoreResult<Vec<Helper>>;
}

/// Read/write interface over booking documents
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Persist a new booking and return its generated id
    async fn create_booking(&self, booking: NewBooking) -> StoreResult<String>;

    /// Fetch a booking by id
    async fn read_booking(&self, booking_id: &str) -> StoreResult<Option<Booking>>;

    /// Apply `patch` if the stored version still equals `expected_version`
    async fn update_booking(
        &self,
        booking_id: &str,
        expected_version: u64,
        patch: BookingPatch,
    ) -> StoreResult<UpdateOutcome>;

    /// Bookings still `assigned` or still owing a helper release, by id
    async fn list_unsettled_bookings(&self) -> StoreResult<Vec<Booking>>;
}
