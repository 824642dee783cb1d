// Geodesy module - great-circle distance between participant positions
//
// Uses a spherical Earth model; altitude is ignored. Accuracy is well within
// what position readouts and trace statistics need.

use std::f64::consts::PI;

/// Degrees to radians conversion factor
const DTOR: f64 = PI / 180.0;

/// Average radius for spherical Earth approximation in meters
const SPHERICAL_R: f64 = 6371e3;

/// Returns great-circle distance in meters between two lat/lon points.
///
/// Haversine form, which stays numerically stable for the short legs a
/// flight trace produces (the law-of-cosines form loses precision when the
/// two points nearly coincide).
///
/// # Arguments
/// * `lat0`, `lon0` - First point (latitude, longitude) in degrees
/// * `lat1`, `lon1` - Second point (latitude, longitude) in degrees
///
/// # Returns
/// Distance in meters
pub fn greatcircle(lat0: f64, lon0: f64, lat1: f64, lon1: f64) -> f64 {
    let lat0_rad = lat0 * DTOR;
    let lat1_rad = lat1 * DTOR;
    let dlat = (lat1 - lat0) * DTOR;
    let dlon = (lon1 - lon0) * DTOR;

    let sin_dlat = (dlat / 2.0).sin();
    let sin_dlon = (dlon / 2.0).sin();

    let a = sin_dlat * sin_dlat
        + lat0_rad.cos() * lat1_rad.cos() * sin_dlon * sin_dlon;

    SPHERICAL_R * 2.0 * a.sqrt().atan2((1.0 - a).sqrt())
}
