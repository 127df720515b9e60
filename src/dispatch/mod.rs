//! Helper dispatch core
//!
//! This module assigns the nearest qualified helper to a service request and
//! escalates to the next candidate when the assignee does not finish in time.
//!
//! # Components
//!
//! - [`geo`] - haversine distance and ETA
//! - [`ranking`] - total order over eligible helpers
//! - [`assignment`] - validate, rank, claim, persist, arm
//! - [`escalation`] - per-booking timers walking the candidate snapshot
//! - [`lifecycle`] - completion, lookup, helper maintenance
//! - [`release`] - owed helper releases and their settlement
//! - [`events`] - broadcast of booking state changes
//! - [`dispatcher`] - facade over all of the above
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use helper_dispatch::dispatch::{Dispatcher, EscalationConfig};
//! use helper_dispatch::models::{AssignRequest, GeoPoint};
//! use helper_dispatch::storage::{MemoryStore, Stores};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let stores = Stores::shared(Arc::new(MemoryStore::new()));
//! let dispatcher = Dispatcher::new(stores, EscalationConfig::default(), 256);
//!
//! let outcome = dispatcher
//!     .assign_helper(&AssignRequest::new("plumbing", GeoPoint::new(12.97, 77.59), "Leaking tap"))
//!     .await?;
//! println!("{}", outcome.message);
//! # Ok(())
//! # }
//! ```

pub mod assignment;
pub mod dispatcher;
pub mod error;
pub mod escalation;
pub mod events;
pub mod geo;
pub mod lifecycle;
pub mod ranking;
pub mod release;

pub use assignment::{validate_location, validate_request, AssignmentEngine, ValidRequest};
pub use dispatcher::{Dispatcher, RecoveryReport};
pub use error::{DispatchError, DispatchResult};
pub use escalation::{
    DormantReason, EscalationConfig, EscalationScheduler, StepOutcome,
    DEFAULT_ESCALATION_TIMEOUT, DEFAULT_MAX_STORE_RETRIES,
};
pub use events::{BookingEvent, EventBus, EventEnvelope};
pub use geo::{eta_minutes, haversine_km, EARTH_RADIUS_KM, MINUTES_PER_KM};
pub use lifecycle::BookingLifecycle;
pub use ranking::rank_candidates;
pub use release::{release_with_retry, settle_releases, RELEASE_ATTEMPTS};
