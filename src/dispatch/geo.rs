//! Great-circle distance and travel-time estimate

use crate::models::GeoPoint;

/// Mean Earth radius used by the haversine formula
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Minutes per kilometre at the assumed 15 km/h travel speed
pub const MINUTES_PER_KM: f64 = 4.0;

/// Haversine distance between two points in kilometres
///
/// Inputs are in degrees. Non-finite coordinates yield a non-finite result.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);

    // clamp guards asin against rounding just above 1.0 for antipodes
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Whole minutes to cover `distance_km`, rounded up
pub fn eta_minutes(distance_km: f64) -> u32 {
    (distance_km * MINUTES_PER_KM).ceil() as u32
}
