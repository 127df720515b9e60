//! helper-dispatch - nearest-qualified helper assignment with timed escalation
//!
//! Books a service request against the closest available helper with the
//! matching skill, then keeps the booking moving: if the assignee has not
//! finished within the escalation window, the next ranked candidate is
//! claimed automatically.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`models`] - Helpers, bookings, requests and results
//! - [`dispatch`] - Ranking, assignment, escalation and lifecycle
//! - [`storage`] - Store traits with SQLite and in-memory backends
//! - [`server`] - axum HTTP API
//! - [`metrics`] - Prometheus counters
//! - [`seed`] - Helper seed files
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use helper_dispatch::config::Config;
//! use helper_dispatch::dispatch::Dispatcher;
//! use helper_dispatch::storage::Stores;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let stores = Stores::open(&config.storage)?;
//!     let dispatcher = Arc::new(Dispatcher::new(
//!         stores,
//!         config.escalation(),
//!         config.dispatch.event_capacity,
//!     ));
//!     println!("{} helpers", dispatcher.list_helpers(false).await?.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod models;
pub mod seed;
pub mod server;
pub mod storage;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::dispatch::{DispatchError, Dispatcher, EscalationConfig};
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::models::{
        AssignOutcome, AssignRequest, Booking, BookingStatus, GeoPoint, Helper, HelperStatus,
    };
    pub use crate::storage::{BookingStore, HelperStore, MemoryStore, SqliteStore, Stores};
}

// Direct re-exports for convenience
pub use models::{AssignOutcome, AssignRequest, Booking, BookingStatus, GeoPoint, Helper};
