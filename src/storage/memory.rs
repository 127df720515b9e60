//! In-memory store backend
//!
//! Keeps helpers and bookings in `RwLock`-guarded maps. Every conditional
//! write takes the write lock for its whole check-and-set, which makes the
//! claim and the version check atomic within the process.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::repository::{
    BookingStore, ClaimOutcome, HelperStore, StoreError, StoreResult, UpdateOutcome,
};
use crate::models::{Booking, BookingPatch, BookingStatus, GeoPoint, Helper, HelperStatus, NewBooking};

/// Store backed by process memory
#[derive(Default)]
pub struct MemoryStore {
    helpers: RwLock<BTreeMap<String, Helper>>,
    bookings: RwLock<BTreeMap<String, Booking>>,
    /// When set, every call fails with `StoreError::Unavailable`
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with helpers
    pub fn with_helpers(helpers: impl IntoIterator<Item = Helper>) -> Self {
        let map = helpers.into_iter().map(|h| (h.id.clone(), h)).collect();
        Self {
            helpers: RwLock::new(map),
            ..Default::default()
        }
    }

    /// Simulate an outage of the backing store
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("memory store is offline"));
        }
        Ok(())
    }

    /// Number of stored bookings
    pub async fn booking_count(&self) -> usize {
        self.bookings.read().await.len()
    }
}

#[async_trait]
impl HelperStore for MemoryStore {
    async fn query_available_helpers(&self, skill: &str) -> StoreResult<Vec<Helper>> {
        self.check_online()?;
        Ok(self
            .helpers
            .read()
            .await
            .values()
            .filter(|h| h.is_available() && h.has_skill(skill))
            .cloned()
            .collect())
    }

    async fn get_helper(&self, helper_id: &str) -> StoreResult<Option<Helper>> {
        self.check_online()?;
        Ok(self.helpers.read().await.get(helper_id).cloned())
    }

    async fn conditional_claim_helper(&self, helper_id: &str) -> StoreResult<ClaimOutcome> {
        self.check_online()?;
        let mut helpers = self.helpers.write().await;
        let Some(helper) = helpers.get_mut(helper_id) else {
            return Ok(ClaimOutcome::NotFound);
        };

        if helper.status != HelperStatus::Available {
            return Ok(ClaimOutcome::Conflict);
        }

        helper.status = HelperStatus::Busy;
        helper.last_updated = Utc::now();
        Ok(ClaimOutcome::Claimed)
    }

    async fn release_helper(&self, helper_id: &str) -> StoreResult<()> {
        self.check_online()?;
        if let Some(helper) = self.helpers.write().await.get_mut(helper_id) {
            helper.status = HelperStatus::Available;
            helper.last_updated = Utc::now();
        }
        Ok(())
    }

    async fn update_helper_location(&self, helper_id: &str, location: GeoPoint) -> StoreResult<bool> {
        self.check_online()?;
        match self.helpers.write().await.get_mut(helper_id) {
            Some(helper) => {
                helper.location = location;
                helper.last_updated = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn upsert_helper(&self, mut helper: Helper) -> StoreResult<()> {
        self.check_online()?;
        let mut helpers = self.helpers.write().await;
        if let Some(existing) = helpers.get(&helper.id) {
            helper.status = existing.status;
        }
        helpers.insert(helper.id.clone(), helper);
        Ok(())
    }

    async fn list_helpers(&self) -> StoreResult<Vec<Helper>> {
        self.check_online()?;
        Ok(self.helpers.read().await.values().cloned().collect())
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn create_booking(&self, booking: NewBooking) -> StoreResult<String> {
        self.check_online()?;
        let id = Uuid::new_v4().to_string();
        let record = Booking::from_new(id.clone(), booking, Utc::now());
        self.bookings.write().await.insert(id.clone(), record);
        Ok(id)
    }

    async fn read_booking(&self, booking_id: &str) -> StoreResult<Option<Booking>> {
        self.check_online()?;
        Ok(self.bookings.read().await.get(booking_id).cloned())
    }

    async fn list_unsettled_bookings(&self) -> StoreResult<Vec<Booking>> {
        self.check_online()?;
        let mut unsettled: Vec<Booking> = self
            .bookings
            .read()
            .await
            .values()
            .filter(|b| b.status == BookingStatus::Assigned || !b.pending_releases.is_empty())
            .cloned()
            .collect();
        unsettled.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(unsettled)
    }

    async fn update_booking(
        &self,
        booking_id: &str,
        expected_version: u64,
        patch: BookingPatch,
    ) -> StoreResult<UpdateOutcome> {
        self.check_online()?;
        let mut bookings = self.bookings.write().await;
        let Some(booking) = bookings.get_mut(booking_id) else {
            return Ok(UpdateOutcome::NotFound);
        };

        if booking.version != expected_version {
            return Ok(UpdateOutcome::VersionConflict);
        }

        booking.apply(&patch, Utc::now());
        Ok(UpdateOutcome::Applied(booking.version))
    }
}
