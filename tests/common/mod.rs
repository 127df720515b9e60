//! Common test utilities

use std::sync::Arc;
use std::time::Duration;

use helper_dispatch::dispatch::{Dispatcher, EscalationConfig};
use helper_dispatch::models::{GeoPoint, Helper};
use helper_dispatch::storage::{HelperStore, MemoryStore, SqliteStore, Stores};

/// Requester location used across scenarios
#[allow(dead_code)]
pub const ORIGIN: GeoPoint = GeoPoint { lat: 12.9716, lng: 77.5946 };

/// Create an available plumber `lat_offset` degrees north of [`ORIGIN`]
pub fn plumber(id: &str, lat_offset: f64, rating: f64) -> Helper {
    Helper::new(
        id,
        format!("Helper {id}"),
        vec!["plumbing".to_string()],
        rating,
        GeoPoint::new(ORIGIN.lat + lat_offset, ORIGIN.lng),
    )
}

pub fn escalation_config() -> EscalationConfig {
    EscalationConfig {
        timeout: Duration::from_secs(30),
        max_store_retries: 3,
    }
}

/// Dispatcher over an in-memory store holding `helpers`
pub fn memory_dispatcher(helpers: Vec<Helper>) -> (Arc<Dispatcher>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::with_helpers(helpers));
    let dispatcher = Dispatcher::new(Stores::shared(store.clone()), escalation_config(), 64);
    (Arc::new(dispatcher), store)
}

/// Dispatcher over an in-memory SQLite database holding `helpers`
#[allow(dead_code)]
pub async fn sqlite_dispatcher(helpers: Vec<Helper>) -> (Arc<Dispatcher>, Arc<SqliteStore>) {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    for helper in helpers {
        store.upsert_helper(helper).await.unwrap();
    }
    let dispatcher = Dispatcher::new(Stores::shared(store.clone()), escalation_config(), 64);
    (Arc::new(dispatcher), store)
}
