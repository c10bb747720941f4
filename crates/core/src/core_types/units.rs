//! Unit tags and temperature newtypes
//!
//! Inputs arrive with unit tags (stations report knots, rasters are in mph,
//! heights are in feet); everything inside the solver is SI. Conversions
//! happen once at the boundary through the types in this module.
//!
//! # Usage
//! ```
//! use windfield_core::core_types::units::{Celsius, SpeedUnits};
//!
//! let mps = SpeedUnits::KilometersPerHour.to_mps(36.0);
//! assert!((mps - 10.0).abs() < 1e-12);
//!
//! let kelvin = Celsius::new(25.0).to_kelvin();
//! assert!((*kelvin - 298.15).abs() < 1e-9);
//! ```

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::Deref;

// ============================================================================
// SPEED
// ============================================================================

/// Unit tag for wind speeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SpeedUnits {
    /// Meters per second (internal unit)
    #[default]
    MetersPerSecond,
    /// Statute miles per hour
    MilesPerHour,
    /// Kilometers per hour
    KilometersPerHour,
    /// Nautical miles per hour
    Knots,
}

impl SpeedUnits {
    /// Meters per second represented by one unit of `self`
    #[inline]
    #[must_use]
    pub const fn mps_per_unit(self) -> f64 {
        match self {
            SpeedUnits::MetersPerSecond => 1.0,
            SpeedUnits::MilesPerHour => 0.44704,
            SpeedUnits::KilometersPerHour => 1.0 / 3.6,
            SpeedUnits::Knots => 0.514444,
        }
    }

    /// Convert a value in `self` units to m/s
    #[inline]
    #[must_use]
    pub fn to_mps(self, value: f64) -> f64 {
        value * self.mps_per_unit()
    }

    /// Convert a value in m/s to `self` units
    #[inline]
    #[must_use]
    pub fn from_mps(self, value: f64) -> f64 {
        value / self.mps_per_unit()
    }

    /// Short label used in log messages and grid headers
    pub const fn label(self) -> &'static str {
        match self {
            SpeedUnits::MetersPerSecond => "m/s",
            SpeedUnits::MilesPerHour => "mph",
            SpeedUnits::KilometersPerHour => "km/h",
            SpeedUnits::Knots => "kts",
        }
    }
}

// ============================================================================
// LENGTH
// ============================================================================

/// Unit tag for heights, radii and resolutions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LengthUnits {
    /// Meters (internal unit)
    #[default]
    Meters,
    /// International feet
    Feet,
    /// Kilometers
    Kilometers,
    /// Statute miles
    Miles,
}

impl LengthUnits {
    /// Meters represented by one unit of `self`
    #[inline]
    #[must_use]
    pub const fn meters_per_unit(self) -> f64 {
        match self {
            LengthUnits::Meters => 1.0,
            LengthUnits::Feet => 0.3048,
            LengthUnits::Kilometers => 1000.0,
            LengthUnits::Miles => 1609.344,
        }
    }

    /// Convert a value in `self` units to meters
    #[inline]
    #[must_use]
    pub fn to_meters(self, value: f64) -> f64 {
        value * self.meters_per_unit()
    }

    /// Convert a value in meters to `self` units
    #[inline]
    #[must_use]
    pub fn from_meters(self, value: f64) -> f64 {
        value / self.meters_per_unit()
    }
}

// ============================================================================
// TEMPERATURE
// ============================================================================

/// Temperature in degrees Celsius
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Celsius(f64);

/// Absolute temperature in Kelvin
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Kelvin(f64);

impl Celsius {
    /// Celsius to Kelvin conversion offset (0°C = 273.15 K)
    const CELSIUS_KELVIN_OFFSET: f64 = 273.15;

    /// Create a new Celsius temperature
    #[inline]
    #[must_use]
    pub const fn new(value: f64) -> Self {
        Celsius(value)
    }

    /// Convert to Kelvin
    #[inline]
    #[must_use]
    pub fn to_kelvin(self) -> Kelvin {
        Kelvin(self.0 + Self::CELSIUS_KELVIN_OFFSET)
    }
}

impl Kelvin {
    /// Create a new Kelvin temperature
    #[inline]
    #[must_use]
    pub const fn new(value: f64) -> Self {
        Kelvin(value)
    }

    /// Convert to Celsius
    #[inline]
    #[must_use]
    pub fn to_celsius(self) -> Celsius {
        Celsius(self.0 - Celsius::CELSIUS_KELVIN_OFFSET)
    }
}

impl Deref for Celsius {
    type Target = f64;
    #[inline]
    fn deref(&self) -> &f64 {
        &self.0
    }
}

impl Deref for Kelvin {
    type Target = f64;
    #[inline]
    fn deref(&self) -> &f64 {
        &self.0
    }
}

impl From<Celsius> for Kelvin {
    fn from(value: Celsius) -> Self {
        value.to_kelvin()
    }
}

impl PartialOrd for Kelvin {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.0.total_cmp(&other.0))
    }
}

impl fmt::Display for Celsius {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}°C", self.0)
    }
}

impl fmt::Display for Kelvin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1} K", self.0)
    }
}
