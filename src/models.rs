// Core data structures for helper dispatch

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Requester identity recorded when the caller is not identified
pub const ANONYMOUS_REQUESTER: &str = "anonymous";

// ============================================================================
// Geography
// ============================================================================

/// A point on the globe in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Finite and inside the WGS84 latitude/longitude ranges
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}, {:.4}", self.lat, self.lng)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Availability of a helper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HelperStatus {
    Available,
    Busy,
}

impl HelperStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Busy => "busy",
        }
    }
}

impl fmt::Display for HelperStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HelperStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(Self::Available),
            "busy" => Ok(Self::Busy),
            other => Err(format!("unknown helper status '{other}'")),
        }
    }
}

/// A field worker who can be booked
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Helper {
    pub id: String,
    pub name: String,
    /// Skill tags, matched exactly against the requested service type
    pub skills: Vec<String>,
    /// Average rating, 0.0 to 5.0
    pub rating: f64,
    pub location: GeoPoint,
    pub status: HelperStatus,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
}

impl Helper {
    /// Create an available helper
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        skills: Vec<String>,
        rating: f64,
        location: GeoPoint,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            skills,
            rating,
            location,
            status: HelperStatus::Available,
            last_updated: Utc::now(),
        }
    }

    pub fn has_skill(&self, skill: &str) -> bool {
        self.skills.iter().any(|s| s == skill)
    }

    pub fn is_available(&self) -> bool {
        self.status == HelperStatus::Available
    }
}

/// Helper fields supplied on registration or in a seed file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewHelper {
    /// Generated when absent
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub skills: Vec<String>,
    pub rating: f64,
    pub location: GeoPoint,
}

impl From<NewHelper> for Helper {
    fn from(new: NewHelper) -> Self {
        Helper::new(
            new.id.unwrap_or_default(),
            new.name,
            new.skills,
            new.rating,
            new.location,
        )
    }
}

/// Public view of a helper returned to requesters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelperSummary {
    pub name: String,
    pub rating: f64,
    pub skills: Vec<String>,
}

// ============================================================================
// Candidates
// ============================================================================

/// One entry of the ranked snapshot taken when a booking is requested
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub helper_id: String,
    pub name: String,
    pub skills: Vec<String>,
    pub rating: f64,
    pub location: GeoPoint,
    pub distance_km: f64,
}

impl Candidate {
    pub fn summary(&self) -> HelperSummary {
        HelperSummary {
            name: self.name.clone(),
            rating: self.rating,
            skills: self.skills.clone(),
        }
    }
}

// ============================================================================
// Bookings
// ============================================================================

/// Lifecycle state of a booking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BookingStatus {
    /// A helper is assigned and the escalation chain may still advance
    Assigned,
    /// Finished by the requester
    Completed,
    /// No eligible helper at request time (never persisted)
    NoHelpers,
    /// Every candidate became unavailable during escalation
    NoHelpersAvailable,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assigned => "assigned",
            Self::Completed => "completed",
            Self::NoHelpers => "no-helpers",
            Self::NoHelpersAvailable => "no-helpers-available",
        }
    }

    /// Terminal bookings accept no further mutation
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Assigned)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "assigned" => Ok(Self::Assigned),
            "completed" => Ok(Self::Completed),
            "no-helpers" => Ok(Self::NoHelpers),
            "no-helpers-available" => Ok(Self::NoHelpersAvailable),
            other => Err(format!("unknown booking status '{other}'")),
        }
    }
}

/// Persisted booking document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: String,
    pub requester_id: String,
    pub service_type: String,
    pub description: String,
    pub requester_location: GeoPoint,
    pub assigned_helper_id: String,
    pub assigned_helper_name: String,
    pub status: BookingStatus,
    pub distance_km: f64,
    pub eta_minutes: u32,
    pub reassignment_count: u32,
    pub candidates: Vec<Candidate>,
    pub next_candidate_index: usize,
    pub rating: Option<f64>,
    /// Helpers this booking let go of whose release is not yet confirmed
    #[serde(default)]
    pub pending_releases: Vec<String>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Booking {
    /// Materialize a new booking at version 1
    pub fn from_new(id: impl Into<String>, new: NewBooking, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            requester_id: new.requester_id,
            service_type: new.service_type,
            description: new.description,
            requester_location: new.requester_location,
            assigned_helper_id: new.assigned_helper_id,
            assigned_helper_name: new.assigned_helper_name,
            status: BookingStatus::Assigned,
            distance_km: new.distance_km,
            eta_minutes: new.eta_minutes,
            reassignment_count: 0,
            candidates: new.candidates,
            next_candidate_index: new.next_candidate_index,
            rating: None,
            pending_releases: Vec::new(),
            version: 1,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a patch and bump the version
    pub fn apply(&mut self, patch: &BookingPatch, now: DateTime<Utc>) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(id) = &patch.assigned_helper_id {
            self.assigned_helper_id = id.clone();
        }
        if let Some(name) = &patch.assigned_helper_name {
            self.assigned_helper_name = name.clone();
        }
        if let Some(distance) = patch.distance_km {
            self.distance_km = distance;
        }
        if let Some(eta) = patch.eta_minutes {
            self.eta_minutes = eta;
        }
        if let Some(count) = patch.reassignment_count {
            self.reassignment_count = count;
        }
        if let Some(index) = patch.next_candidate_index {
            self.next_candidate_index = index;
        }
        if let Some(rating) = patch.rating {
            self.rating = Some(rating);
        }
        if let Some(at) = patch.completed_at {
            self.completed_at = Some(at);
        }
        if let Some(owed) = &patch.owe_release {
            if !self.pending_releases.contains(owed) {
                self.pending_releases.push(owed.clone());
            }
        }
        self.pending_releases
            .retain(|id| !patch.settled_releases.contains(id));
        self.updated_at = now;
        self.version += 1;
    }
}

/// Fields supplied when a booking is created
#[derive(Debug, Clone, PartialEq)]
pub struct NewBooking {
    pub requester_id: String,
    pub service_type: String,
    pub description: String,
    pub requester_location: GeoPoint,
    pub assigned_helper_id: String,
    pub assigned_helper_name: String,
    pub distance_km: f64,
    pub eta_minutes: u32,
    pub candidates: Vec<Candidate>,
    pub next_candidate_index: usize,
}

/// Partial update of a booking; `None` leaves the field untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookingPatch {
    pub status: Option<BookingStatus>,
    pub assigned_helper_id: Option<String>,
    pub assigned_helper_name: Option<String>,
    pub distance_km: Option<f64>,
    pub eta_minutes: Option<u32>,
    pub reassignment_count: Option<u32>,
    pub next_candidate_index: Option<usize>,
    pub rating: Option<f64>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Record a helper whose release this booking now owes
    pub owe_release: Option<String>,
    /// Owed releases that have been carried out
    pub settled_releases: Vec<String>,
}

impl BookingPatch {
    pub fn status(status: BookingStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Move the booking to a new candidate
    pub fn reassign(candidate: &Candidate, eta_minutes: u32, count: u32, next_index: usize) -> Self {
        Self {
            assigned_helper_id: Some(candidate.helper_id.clone()),
            assigned_helper_name: Some(candidate.name.clone()),
            distance_km: Some(candidate.distance_km),
            eta_minutes: Some(eta_minutes),
            reassignment_count: Some(count),
            next_candidate_index: Some(next_index),
            ..Default::default()
        }
    }

    pub fn complete(rating: f64, at: DateTime<Utc>) -> Self {
        Self {
            status: Some(BookingStatus::Completed),
            rating: Some(rating),
            completed_at: Some(at),
            ..Default::default()
        }
    }

    /// Clear owed releases that were carried out
    pub fn settle(released: Vec<String>) -> Self {
        Self {
            settled_releases: released,
            ..Default::default()
        }
    }

    /// Also record that `helper_id` must be released
    pub fn owing_release(mut self, helper_id: impl Into<String>) -> Self {
        self.owe_release = Some(helper_id.into());
        self
    }
}

// ============================================================================
// Request / Result Shapes
// ============================================================================

/// Input of an assignment request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRequest {
    #[serde(default)]
    pub service_type: String,
    #[serde(alias = "userLocation")]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "userId")]
    pub requester_id: Option<String>,
}

impl AssignRequest {
    pub fn new(service_type: impl Into<String>, location: GeoPoint, description: impl Into<String>) -> Self {
        Self {
            service_type: service_type.into(),
            location: Some(location),
            description: description.into(),
            requester_id: None,
        }
    }

    pub fn with_requester(mut self, requester_id: impl Into<String>) -> Self {
        self.requester_id = Some(requester_id.into());
        self
    }
}

/// Result of an assignment request
///
/// Both a successful assignment and the `no-helpers` soft failure use this
/// shape; hard failures are reported as errors instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignOutcome {
    pub message: String,
    pub helper: Option<HelperSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub booking_id: Option<String>,
    #[serde(rename = "distance", skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
    #[serde(rename = "eta", skip_serializing_if = "Option::is_none")]
    pub eta_minutes: Option<u32>,
    pub status: BookingStatus,
}

impl AssignOutcome {
    pub fn no_helpers() -> Self {
        Self {
            message: "No helpers available at the moment.".to_string(),
            helper: None,
            error: Some("Try booking again in a few minutes.".to_string()),
            booking_id: None,
            distance_km: None,
            eta_minutes: None,
            status: BookingStatus::NoHelpers,
        }
    }

    pub fn assigned(booking_id: String, helper: &Candidate, eta_minutes: u32) -> Self {
        Self {
            message: format!("{} is on the way!", helper.name),
            helper: Some(helper.summary()),
            error: None,
            booking_id: Some(booking_id),
            distance_km: Some(helper.distance_km),
            eta_minutes: Some(eta_minutes),
            status: BookingStatus::Assigned,
        }
    }
}

/// Acknowledgement returned by lifecycle operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub success: bool,
    pub message: String,
}

impl Receipt {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}
