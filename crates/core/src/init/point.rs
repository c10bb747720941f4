//! Initialization from weather stations

use super::columns::ColumnSurface;
use super::InitInputs;
use crate::atmosphere::profile::WindProfile;
use crate::core_types::{validate_stations, WeatherStation};
use crate::error::{WindError, WindResult};
use crate::grid::{raster::inverse_distance_at, Mesh, PointSample, Raster};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Inverse-distance interpolation of station observations
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointInitializer {
    /// Inverse-distance power
    pub power: f64,
}

impl Default for PointInitializer {
    fn default() -> Self {
        PointInitializer { power: 1.0 }
    }
}

impl PointInitializer {
    /// Factor bringing a station's speed from its sensor height to `target`
    fn height_factor(&self, inputs: &InitInputs<'_>, station: &WeatherStation, target: f64) -> f64 {
        if (station.height - target).abs() < f64::EPSILON {
            return 1.0;
        }
        let surface = inputs.surface;
        let profile = WindProfile {
            kind: inputs.profile,
            input_speed: 1.0,
            input_height: station.height,
            roughness_length: surface.roughness_length,
            roughness_height: surface.roughness_height,
            displacement_height: surface.displacement_height,
            obukhov_length: 0.0,
            abl_height: f64::INFINITY,
        };
        let factor = profile.speed_at(target + surface.roughness_height);
        if factor.is_finite() {
            factor
        } else {
            1.0
        }
    }

    fn interpolate(
        &self,
        mesh: &Mesh,
        samples: &[PointSample],
        fallback: f64,
        what: &str,
    ) -> WindResult<Raster> {
        let header = mesh.dem().header();
        let grid = mesh.column_raster_from_fn(|i, j| {
            let (x, y) = header.cell_center(i, j);
            inverse_distance_at(x, y, samples, self.power).unwrap_or(f64::NAN)
        })?;
        let unreached = grid.data().iter().filter(|v| v.is_nan()).count();
        if unreached > 0 {
            warn!(unreached, what, "columns beyond every station's influence radius");
        }
        Ok(grid.map(|v| if v.is_nan() { fallback } else { v }))
    }

    /// Interpolate the stations onto mesh columns
    ///
    /// # Errors
    /// Returns [`WindError::InvalidInput`] for an invalid station list or when
    /// every station lies outside the mesh footprint.
    pub fn column_surface(&self, mesh: &Mesh, inputs: &InitInputs<'_>) -> WindResult<ColumnSurface> {
        let stations = inputs.stations;
        validate_stations(stations)?;
        let header = mesh.dem().header();
        let inside = stations.iter().filter(|s| header.contains(s.x, s.y)).count();
        if inside == 0 {
            return Err(WindError::invalid_input(format!(
                "all {} weather stations lie outside the mesh footprint",
                stations.len()
            )));
        }

        let target = stations.iter().map(|s| s.height).fold(0.0, f64::max);
        let sample = |s: &WeatherStation, value: f64| PointSample {
            x: s.x,
            y: s.y,
            value,
            radius: s.bounded_radius(),
        };
        let mut u = Vec::with_capacity(stations.len());
        let mut v = Vec::with_capacity(stations.len());
        let mut cloud = Vec::with_capacity(stations.len());
        let mut temperature = Vec::with_capacity(stations.len());
        for station in stations {
            let factor = self.height_factor(inputs, station, target);
            let (su, sv) = station.uv();
            u.push(sample(station, su * factor));
            v.push(sample(station, sv * factor));
            cloud.push(sample(station, station.cloud_cover));
            temperature.push(sample(station, *station.temperature_kelvin()));
        }
        debug!(
            stations = stations.len(),
            inside,
            input_height = target,
            "interpolating stations onto mesh columns"
        );

        Ok(ColumnSurface {
            u: self.interpolate(mesh, &u, 0.0, "u wind")?,
            v: self.interpolate(mesh, &v, 0.0, "v wind")?,
            cloud_cover: self.interpolate(mesh, &cloud, inputs.cloud_cover, "cloud cover")?,
            air_temperature: self.interpolate(mesh, &temperature, inputs.air_temperature, "air temperature")?,
            input_height: target,
        })
    }
}
