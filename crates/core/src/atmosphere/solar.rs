//! Solar position and irradiance
//!
//! Spencer (1971) Fourier series for declination, equation of time and the
//! earth-sun distance factor, combined with the standard hour-angle
//! geometry. Accurate to a fraction of a degree, which is ample for
//! surface heating and terrain shading.

use crate::grid::terrain::compute_shade;
use crate::grid::{Raster, TerrainAnalysis};
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Mean extraterrestrial irradiance (W/m²)
pub const SOLAR_CONSTANT: f64 = 1367.0;

/// Sun position for one instant and place
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolarPosition {
    /// Degrees clockwise from north
    pub azimuth: f64,
    /// Degrees above the horizon
    pub elevation: f64,
    /// Solar declination (degrees)
    pub declination: f64,
    /// Equation of time (minutes)
    pub equation_of_time: f64,
    /// Hour angle (degrees, negative before solar noon)
    pub hour_angle: f64,
    /// Earth radius vector correction (r0/r)²
    pub distance_factor: f64,
}

impl SolarPosition {
    /// Sun position at `time` for a site at `latitude`/`longitude` (degrees, east positive)
    pub fn compute(time: DateTime<Utc>, latitude: f64, longitude: f64) -> Self {
        let hours = f64::from(time.hour())
            + f64::from(time.minute()) / 60.0
            + f64::from(time.second()) / 3600.0;
        let day_of_year = f64::from(time.ordinal());
        let gamma = 2.0 * PI / 365.0 * (day_of_year - 1.0 + (hours - 12.0) / 24.0);

        let distance_factor = 1.000_110 + 0.034_221 * gamma.cos() + 0.001_280 * gamma.sin()
            + 0.000_719 * (2.0 * gamma).cos()
            + 0.000_077 * (2.0 * gamma).sin();

        let decl = 0.006_918 - 0.399_912 * gamma.cos() + 0.070_257 * gamma.sin()
            - 0.006_758 * (2.0 * gamma).cos()
            + 0.000_907 * (2.0 * gamma).sin()
            - 0.002_697 * (3.0 * gamma).cos()
            + 0.001_48 * (3.0 * gamma).sin();

        let equation_of_time = 229.18
            * (0.000_075 + 0.001_868 * gamma.cos()
                - 0.032_077 * gamma.sin()
                - 0.014_615 * (2.0 * gamma).cos()
                - 0.040_849 * (2.0 * gamma).sin());

        let true_solar_minutes = hours * 60.0 + equation_of_time + 4.0 * longitude;
        let hour_angle = true_solar_minutes / 4.0 - 180.0;

        let phi = latitude.to_radians();
        let h = hour_angle.to_radians();
        let cos_zenith = (phi.sin() * decl.sin() + phi.cos() * decl.cos() * h.cos()).clamp(-1.0, 1.0);
        let elevation = 90.0 - cos_zenith.acos().to_degrees();

        let azimuth = (h.sin().atan2(h.cos() * phi.sin() - decl.tan() * phi.cos()).to_degrees()
            + 180.0)
            .rem_euclid(360.0);

        SolarPosition {
            azimuth,
            elevation,
            declination: decl.to_degrees(),
            equation_of_time,
            hour_angle,
            distance_factor,
        }
    }

    /// Whether the sun is above the horizon
    #[inline]
    pub fn is_day(&self) -> bool {
        self.elevation > 0.0
    }

    /// Extraterrestrial irradiance normal to the beam (W/m²)
    #[inline]
    pub fn extraterrestrial_normal(&self) -> f64 {
        SOLAR_CONSTANT * self.distance_factor
    }

    /// Cosine of the incidence angle on a surface with the given aspect and slope (degrees)
    pub fn cos_incidence(&self, aspect: f64, slope: f64) -> f64 {
        let zenith = (90.0 - self.elevation).to_radians();
        let tilt = slope.to_radians();
        zenith.cos() * tilt.cos()
            + zenith.sin() * tilt.sin() * (self.azimuth - aspect).to_radians().cos()
    }

    /// Extraterrestrial irradiance on a tilted surface (W/m²), zero when facing away
    pub fn tilted_intensity(&self, aspect: f64, slope: f64) -> f64 {
        if !self.is_day() {
            return 0.0;
        }
        (self.extraterrestrial_normal() * self.cos_incidence(aspect, slope)).max(0.0)
    }
}

/// Sun position together with the slope, aspect and shading of every DEM cell
#[derive(Debug, Clone)]
pub struct SurfaceExposure {
    pub sun: SolarPosition,
    pub terrain: TerrainAnalysis,
    /// Row-major, true where the cell is in terrain shadow
    pub shade: Vec<bool>,
}

impl SurfaceExposure {
    pub fn compute(dem: &Raster, time: DateTime<Utc>, latitude: f64, longitude: f64) -> Self {
        let sun = SolarPosition::compute(time, latitude, longitude);
        let terrain = TerrainAnalysis::from_dem(dem);
        let shade = compute_shade(dem, sun.azimuth, sun.elevation);
        SurfaceExposure {
            sun,
            terrain,
            shade,
        }
    }

    #[inline]
    pub fn is_shaded(&self, i: usize, j: usize) -> bool {
        self.shade[i * self.terrain.ncols + j]
    }

    /// Extraterrestrial irradiance on cell (i, j)'s slope, ignoring shade
    #[inline]
    pub fn intensity_at(&self, i: usize, j: usize) -> f64 {
        self.sun
            .tilted_intensity(self.terrain.aspect_at(i, j), self.terrain.slope_at(i, j))
    }
}
