//! Persistence for helpers and bookings
//!
//! - [`repository`] - store traits, outcomes and `StoreError`
//! - [`memory`] - in-process backend
//! - [`sqlite`] - SQLite backend

pub mod memory;
pub mod repository;
pub mod sqlite;

use std::sync::Arc;

pub use memory::MemoryStore;
pub use repository::{
    BookingStore, ClaimOutcome, HelperStore, StoreError, StoreResult, UpdateOutcome,
};
pub use sqlite::SqliteStore;

use crate::config::{StorageBackend, StorageConfig};

/// The pair of store handles the dispatch core runs against
#[derive(Clone)]
pub struct Stores {
    pub helpers: Arc<dyn HelperStore>,
    pub bookings: Arc<dyn BookingStore>,
}

impl Stores {
    /// Use one backend for both contracts
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: HelperStore + BookingStore + 'static,
    {
        Self {
            helpers: store.clone(),
            bookings: store,
        }
    }

    /// Open the backend selected by configuration
    pub fn open(config: &StorageConfig) -> StoreResult<Self> {
        Ok(match config.backend {
            StorageBackend::Memory => Self::shared(Arc::new(MemoryStore::new())),
            StorageBackend::Sqlite => Self::shared(Arc::new(SqliteStore::new(&config.sqlite_path)?)),
        })
    }
}
