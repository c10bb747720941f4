//! Core types and utilities

pub mod station;
pub mod units;
pub mod vec3;
pub mod wind;

pub use station::{smallest_influence_radius, validate_stations, WeatherStation};
pub use units::*;
pub use vec3::Vec3;
pub use wind::{speed_direction_to_uv, uv_to_speed_direction};
