//! SQLite store backend
//!
//! Helpers live in a plain table so the claim can be a single conditional
//! `UPDATE`. Bookings are stored as a JSON document next to indexed `status`
//! and `version` columns; the version column carries the compare-and-swap.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::repository::{
    BookingStore, ClaimOutcome, HelperStore, StoreError, StoreResult, UpdateOutcome,
};
use crate::models::{Booking, BookingPatch, GeoPoint, Helper, HelperStatus, NewBooking};

const HELPER_COLUMNS: &str = "id, name, skills, rating, lat, lng, status, last_updated";

/// SQLite-based store for helpers and bookings
///
/// Uses a `Mutex` around the connection; every method finishes its SQL
/// before returning, so the guard is never held across an await point.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a database file
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::unavailable(format!("cannot create {}: {e}", parent.display()))
                })?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        Ok(store)
    }

    /// Create an in-memory database
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn connection(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    fn create_schema(&self) -> StoreResult<()> {
        let conn = self.connection()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS helpers (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                skills TEXT NOT NULL,
                rating REAL NOT NULL,
                lat REAL NOT NULL,
                lng REAL NOT NULL,
                status TEXT NOT NULL DEFAULT 'available',
                last_updated TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_helpers_status ON helpers(status);

            CREATE TABLE IF NOT EXISTS bookings (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                version INTEGER NOT NULL,
                doc TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_bookings_status ON bookings(status);
            "#,
        )?;
        Ok(())
    }
}

/// Raw helper row before validation
struct HelperRow {
    id: String,
    name: String,
    skills: String,
    rating: f64,
    lat: f64,
    lng: f64,
    status: String,
    last_updated: String,
}

impl HelperRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            skills: row.get(2)?,
            rating: row.get(3)?,
            lat: row.get(4)?,
            lng: row.get(5)?,
            status: row.get(6)?,
            last_updated: row.get(7)?,
        })
    }

    fn into_helper(self) -> StoreResult<Helper> {
        let skills: Vec<String> = serde_json::from_str(&self.skills)?;
        let status: HelperStatus = self
            .status
            .parse()
            .map_err(|reason: String| StoreError::corrupt(&self.id, reason))?;
        let last_updated = DateTime::parse_from_rfc3339(&self.last_updated)
            .map_err(|e| StoreError::corrupt(&self.id, format!("bad timestamp: {e}")))?
            .with_timezone(&Utc);

        Ok(Helper {
            id: self.id,
            name: self.name,
            skills,
            rating: self.rating,
            location: GeoPoint::new(self.lat, self.lng),
            status,
            last_updated,
        })
    }
}

fn collect_helpers(rows: Vec<HelperRow>) -> StoreResult<Vec<Helper>> {
    rows.into_iter().map(HelperRow::into_helper).collect()
}

#[async_trait]
impl HelperStore for SqliteStore {
    async fn query_available_helpers(&self, skill: &str) -> StoreResult<Vec<Helper>> {
        let rows = {
            let conn = self.connection()?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {HELPER_COLUMNS} FROM helpers
                 WHERE status = 'available'
                   AND EXISTS (SELECT 1 FROM json_each(helpers.skills) WHERE json_each.value = ?1)
                 ORDER BY id"
            ))?;
            let rows = stmt
                .query_map(params![skill], HelperRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        collect_helpers(rows)
    }

    async fn get_helper(&self, helper_id: &str) -> StoreResult<Option<Helper>> {
        let row = {
            let conn = self.connection()?;
            conn.query_row(
                &format!("SELECT {HELPER_COLUMNS} FROM helpers WHERE id = ?1"),
                params![helper_id],
                HelperRow::from_row,
            )
            .optional()?
        };
        row.map(HelperRow::into_helper).transpose()
    }

    async fn conditional_claim_helper(&self, helper_id: &str) -> StoreResult<ClaimOutcome> {
        let conn = self.connection()?;
        let changed = conn.execute(
            "UPDATE helpers SET status = 'busy', last_updated = ?2
             WHERE id = ?1 AND status = 'available'",
            params![helper_id, Utc::now().to_rfc3339()],
        )?;

        if changed == 1 {
            return Ok(ClaimOutcome::Claimed);
        }

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM helpers WHERE id = ?1)",
            params![helper_id],
            |row| row.get(0),
        )?;

        Ok(if exists {
            ClaimOutcome::Conflict
        } else {
            ClaimOutcome::NotFound
        })
    }

    async fn release_helper(&self, helper_id: &str) -> StoreResult<()> {
        let conn = self.connection()?;
        conn.execute(
            "UPDATE helpers SET status = 'available', last_updated = ?2 WHERE id = ?1",
            params![helper_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    async fn update_helper_location(&self, helper_id: &str, location: GeoPoint) -> StoreResult<bool> {
        let conn = self.connection()?;
        let changed = conn.execute(
            "UPDATE helpers SET lat = ?2, lng = ?3, last_updated = ?4 WHERE id = ?1",
            params![helper_id, location.lat, location.lng, Utc::now().to_rfc3339()],
        )?;
        Ok(changed == 1)
    }

    async fn upsert_helper(&self, helper: Helper) -> StoreResult<()> {
        let skills = serde_json::to_string(&helper.skills)?;
        let conn = self.connection()?;
        conn.execute(
            r#"
            INSERT INTO helpers (id, name, skills, rating, lat, lng, status, last_updated)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                skills = excluded.skills,
                rating = excluded.rating,
                lat = excluded.lat,
                lng = excluded.lng,
                last_updated = excluded.last_updated
            "#,
            params![
                helper.id,
                helper.name,
                skills,
                helper.rating,
                helper.location.lat,
                helper.location.lng,
                helper.status.as_str(),
                helper.last_updated.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn list_helpers(&self) -> StoreResult<Vec<Helper>> {
        let rows = {
            let conn = self.connection()?;
            let mut stmt =
                conn.prepare(&format!("SELECT {HELPER_COLUMNS} FROM helpers ORDER BY id"))?;
            let rows = stmt
                .query_map([], HelperRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        collect_helpers(rows)
    }
}

#[async_trait]
impl BookingStore for SqliteStore {
    async fn create_booking(&self, booking: NewBooking) -> StoreResult<String> {
        let id = Uuid::new_v4().to_string();
        let record = Booking::from_new(id.clone(), booking, Utc::now());
        let doc = serde_json::to_string(&record)?;

        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO bookings (id, status, version, doc) VALUES (?1, ?2, ?3, ?4)",
            params![id, record.status.as_str(), record.version as i64, doc],
        )?;
        Ok(id)
    }

    async fn read_booking(&self, booking_id: &str) -> StoreResult<Option<Booking>> {
        let doc: Option<String> = {
            let conn = self.connection()?;
            conn.query_row(
                "SELECT doc FROM bookings WHERE id = ?1",
                params![booking_id],
                |row| row.get(0),
            )
            .optional()?
        };

        match doc {
            Some(doc) => Ok(Some(serde_json::from_str(&doc)?)),
            None => Ok(None),
        }
    }

    async fn list_unsettled_bookings(&self) -> StoreResult<Vec<Booking>> {
        let docs = {
            let conn = self.connection()?;
            let mut stmt = conn.prepare(
                "SELECT doc FROM bookings
                 WHERE status = 'assigned'
                    OR json_array_length(doc, '$.pendingReleases') > 0
                 ORDER BY id",
            )?;
            let docs = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            docs
        };

        docs.iter()
            .map(|doc| serde_json::from_str::<Booking>(doc).map_err(StoreError::from))
            .collect()
    }

    async fn update_booking(
        &self,
        booking_id: &str,
        expected_version: u64,
        patch: BookingPatch,
    ) -> StoreResult<UpdateOutcome> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;

        let current: Option<(i64, String)> = tx
            .query_row(
                "SELECT version, doc FROM bookings WHERE id = ?1",
                params![booking_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((version, doc)) = current else {
            return Ok(UpdateOutcome::NotFound);
        };

        if version as u64 != expected_version {
            return Ok(UpdateOutcome::VersionConflict);
        }

        let mut booking: Booking = serde_json::from_str(&doc)?;
        booking.apply(&patch, Utc::now());
        let doc = serde_json::to_string(&booking)?;

        let changed = tx.execute(
            "UPDATE bookings SET doc = ?1, status = ?2, version = ?3
             WHERE id = ?4 AND version = ?5",
            params![
                doc,
                booking.status.as_str(),
                booking.version as i64,
                booking_id,
                expected_version as i64,
            ],
        )?;

        if changed != 1 {
            return Ok(UpdateOutcome::VersionConflict);
        }

        tx.commit()?;
        Ok(UpdateOutcome::Applied(booking.version))
    }
}
