//! Weather station observations
//!
//! Stations are deserialized in whatever units the source reports and are
//! normalised to SI with [`WeatherStation::to_si`] before any solver code
//! touches them.

use super::units::{Celsius, Kelvin, LengthUnits, SpeedUnits};
use super::wind::speed_direction_to_uv;
use crate::error::{WindError, WindResult};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

/// A single surface observation used by point initialization and matching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherStation {
    /// Station identifier, unique within a run
    pub name: String,
    /// Projected easting (same coordinate system as the DEM)
    pub x: f64,
    /// Projected northing
    pub y: f64,
    /// Sensor height above ground
    pub height: f64,
    /// Units of `height` and `influence_radius`
    #[serde(default)]
    pub height_units: LengthUnits,
    /// Observed wind speed
    pub speed: f64,
    /// Units of `speed` and `w_speed`
    #[serde(default)]
    pub speed_units: SpeedUnits,
    /// Direction the wind blows from, degrees clockwise from north
    pub direction: f64,
    /// Observed vertical velocity, usually zero
    #[serde(default)]
    pub w_speed: f64,
    /// Air temperature
    #[serde(default = "default_station_temperature")]
    pub temperature: Celsius,
    /// Cloud cover fraction in [0, 1]
    #[serde(default)]
    pub cloud_cover: f64,
    /// Maximum interpolation distance; `None` reaches the whole domain
    #[serde(default)]
    pub influence_radius: Option<f64>,
}

fn default_station_temperature() -> Celsius {
    Celsius::new(20.0)
}

impl WeatherStation {
    /// Create a station with SI units, no vertical speed and an unbounded radius
    pub fn new(name: impl Into<String>, x: f64, y: f64, height: f64, speed: f64, direction: f64) -> Self {
        WeatherStation {
            name: name.into(),
            x,
            y,
            height,
            height_units: LengthUnits::Meters,
            speed,
            speed_units: SpeedUnits::MetersPerSecond,
            direction,
            w_speed: 0.0,
            temperature: default_station_temperature(),
            cloud_cover: 0.0,
            influence_radius: None,
        }
    }

    /// Builder-style influence radius (meters)
    pub fn with_influence_radius(mut self, radius: f64) -> Self {
        self.influence_radius = Some(radius);
        self
    }

    /// Builder-style cloud cover fraction
    pub fn with_cloud_cover(mut self, cloud_cover: f64) -> Self {
        self.cloud_cover = cloud_cover;
        self
    }

    /// Builder-style air temperature
    pub fn with_temperature(mut self, temperature: Celsius) -> Self {
        self.temperature = temperature;
        self
    }

    /// Copy of this station with all quantities converted to meters and m/s
    pub fn to_si(&self) -> WeatherStation {
        WeatherStation {
            height: self.height_units.to_meters(self.height),
            height_units: LengthUnits::Meters,
            speed: self.speed_units.to_mps(self.speed),
            w_speed: self.speed_units.to_mps(self.w_speed),
            speed_units: SpeedUnits::MetersPerSecond,
            influence_radius: self
                .influence_radius
                .map(|r| self.height_units.to_meters(r)),
            ..self.clone()
        }
    }

    /// Horizontal (u, v) of the observation in m/s
    pub fn uv(&self) -> (f64, f64) {
        speed_direction_to_uv(self.speed_units.to_mps(self.speed), self.direction)
    }

    /// Air temperature as absolute temperature
    pub fn temperature_kelvin(&self) -> Kelvin {
        self.temperature.to_kelvin()
    }

    /// Positive, bounded influence radius in meters
    pub fn bounded_radius(&self) -> Option<f64> {
        self.influence_radius
            .filter(|r| *r > 0.0)
            .map(|r| self.height_units.to_meters(r))
    }

    /// Reject physically meaningless observations
    ///
    /// # Errors
    /// Returns [`WindError::InvalidInput`] naming the station and the bad field.
    pub fn validate(&self) -> WindResult<()> {
        let bad = |what: &str| {
            WindError::invalid_input(format!("station '{}': {what}", self.name))
        };
        if !(self.x.is_finite() && self.y.is_finite()) {
            return Err(bad("location is not finite"));
        }
        if !(self.height.is_finite() && self.height > 0.0) {
            return Err(bad("height above ground must be positive"));
        }
        if !(self.speed.is_finite() && self.speed >= 0.0) {
            return Err(bad("speed must be non-negative"));
        }
        if !(0.0..=360.0).contains(&self.direction) {
            return Err(bad("direction must be within 0..=360 degrees"));
        }
        if !(0.0..=1.0).contains(&self.cloud_cover) {
            return Err(bad("cloud cover must be a fraction in 0..=1"));
        }
        if self.influence_radius.is_some_and(|r| r == 0.0 || !r.is_finite()) {
            return Err(bad("influence radius must be non-zero and finite"));
        }
        Ok(())
    }
}

/// Validate a full station list: each station, plus name uniqueness.
///
/// # Errors
/// Returns [`WindError::InvalidInput`] for an empty list, a duplicated name or
/// any invalid station.
pub fn validate_stations(stations: &[WeatherStation]) -> WindResult<()> {
    if stations.is_empty() {
        return Err(WindError::invalid_input(
            "point initialization requires at least one weather station",
        ));
    }
    let mut names = FxHashSet::default();
    for station in stations {
        station.validate()?;
        if !names.insert(station.name.as_str()) {
            return Err(WindError::invalid_input(format!(
                "duplicate station name '{}'",
                station.name
            )));
        }
    }
    Ok(())
}

/// Smallest positive influence radius across the stations, in meters
pub fn smallest_influence_radius(stations: &[WeatherStation]) -> Option<f64> {
    stations
        .iter()
        .filter_map(WeatherStation::bounded_radius)
        .min_by(f64::total_cmp)
}
