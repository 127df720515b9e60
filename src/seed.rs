//! Helper seed files
//!
//! A seed file is a JSON array of helpers:
//!
//! ```json
//! [
//!   {"id": "h-1", "name": "Asha", "skills": ["plumbing"], "rating": 4.7,
//!    "location": {"lat": 12.97, "lng": 77.59}}
//! ]
//! ```

use std::path::Path;

use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::models::NewHelper;

/// Parse a seed file
pub fn read_seed_file(path: &Path) -> Result<Vec<NewHelper>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::with_source(format!("Failed to read seed file {}", path.display()), e))?;
    Ok(serde_json::from_str(&content)?)
}

/// Register every helper in `helpers`; returns how many were stored
pub async fn seed_helpers(dispatcher: &Dispatcher, helpers: Vec<NewHelper>) -> Result<usize> {
    let mut stored = 0;
    for helper in helpers {
        let name = helper.name.clone();
        match dispatcher.register_helper(helper.into()).await {
            Ok(saved) => {
                tracing::debug!(helper_id = %saved.id, "Seeded helper");
                stored += 1;
            }
            Err(e) if e.is_recoverable() => return Err(e.into()),
            Err(e) => tracing::warn!(name = %name, error = %e, "Skipping invalid helper"),
        }
    }
    Ok(stored)
}
