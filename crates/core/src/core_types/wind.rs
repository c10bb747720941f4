//! Wind vector conventions
//!
//! Directions are meteorological: the compass bearing the wind blows FROM,
//! 0° = north, clockwise. Components are positive-east (u) and
//! positive-north (v).

use std::f64::consts::PI;

/// Convert speed and "from" direction (degrees) to (u, v) components.
///
/// Directions are wrapped into [0, 360) first, so 360° and -90° are accepted.
#[inline]
pub fn speed_direction_to_uv(speed: f64, direction_deg: f64) -> (f64, f64) {
    let rad = direction_deg.rem_euclid(360.0).to_radians();
    (-speed * rad.sin(), -speed * rad.cos())
}

/// Convert (u, v) components to speed and "from" direction in degrees [0, 360).
///
/// A calm vector reports direction 0.
#[inline]
pub fn uv_to_speed_direction(u: f64, v: f64) -> (f64, f64) {
    let speed = u.hypot(v);
    if u == 0.0 && v == 0.0 {
        return (0.0, 0.0);
    }
    let mut direction = (-u).atan2(-v).to_degrees();
    if direction < 0.0 {
        direction += 360.0;
    }
    if direction >= 360.0 {
        direction -= 360.0;
    }
    (speed, direction)
}

/// Convert a compass bearing (0° = north, clockwise) to a math angle in
/// degrees (0° = east, counter-clockwise), both in [0, 360).
#[inline]
pub fn north_to_math_angle(bearing_deg: f64) -> f64 {
    (450.0 - bearing_deg).rem_euclid(360.0)
}

/// Convert a magnitude, compass heading (direction the vector points TO) and
/// elevation angle above horizontal into (u, v, w).
pub fn heading_to_uvw(magnitude: f64, heading_deg: f64, elevation_deg: f64) -> (f64, f64, f64) {
    let theta = north_to_math_angle(heading_deg) * PI / 180.0;
    let polar = (90.0 - elevation_deg).to_radians();
    (
        magnitude * theta.cos() * polar.sin(),
        magnitude * theta.sin() * polar.sin(),
        magnitude * polar.cos(),
    )
}

/// Smallest absolute difference between two compass directions, in degrees.
pub fn direction_difference(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(360.0);
    d.min(360.0 - d)
}
