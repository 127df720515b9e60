//! Candidate ranking
//!
//! Orders eligible helpers by distance to the requester, nearest first.
//! Equal distances go to the better-rated helper, and helper id breaks any
//! remaining tie so the order is total and reproducible.

use std::cmp::Ordering;

use super::error::{DispatchError, DispatchResult};
use super::geo::haversine_km;
use crate::models::{Candidate, GeoPoint, Helper};

/// Rank helpers already filtered to available + matching skill
///
/// Returns `NoEligibleHelpers` for an empty input.
pub fn rank_candidates(helpers: &[Helper], origin: GeoPoint) -> DispatchResult<Vec<Candidate>> {
    if helpers.is_empty() {
        return Err(DispatchError::NoEligibleHelpers);
    }

    let mut candidates: Vec<Candidate> = helpers
        .iter()
        .map(|helper| Candidate {
            helper_id: helper.id.clone(),
            name: helper.name.clone(),
            skills: helper.skills.clone(),
            rating: helper.rating,
            location: helper.location,
            distance_km: haversine_km(origin, helper.location),
        })
        .collect();

    candidates.sort_by(compare_candidates);
    Ok(candidates)
}

fn compare_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    a.distance_km
        .total_cmp(&b.distance_km)
        .then_with(|| b.rating.total_cmp(&a.rating))
        .then_with(|| a.helper_id.cmp(&b.helper_id))
}
