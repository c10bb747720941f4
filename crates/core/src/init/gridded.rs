//! Initialization from surface rasters
//!
//! Covers gridded speed/direction input, weather-model surfaces and
//! NinjaFOAM surfaces. All of them read through a [`WeatherModelSource`]
//! under the metadata lock, convert speed and direction to u/v on the source
//! cells and interpolate the components onto mesh columns.

use super::columns::{columns_from_raster, speed_direction_grids, ColumnSurface};
use super::source::{WeatherModelSource, WeatherSurface};
use super::InitInputs;
use crate::error::{WindError, WindResult};
use crate::grid::{Interpolation, Mesh, Raster};
use tracing::info;

/// Which configured source a field is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRole {
    /// Gridded or NinjaFOAM surface wind
    Surface,
    /// Weather-model output
    Weather,
}

/// Raster-driven initializer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GriddedInitializer {
    /// Source of speed and direction
    pub wind_source: SourceRole,
    /// Source of cloud cover and air temperature; uniform inputs when `None`
    pub atmosphere_source: Option<SourceRole>,
    /// Interpolation of the wind components onto mesh columns
    pub interpolation: Interpolation,
}

impl GriddedInitializer {
    /// Wind from the surface source, uniform cloud and temperature
    pub fn surface(interpolation: Interpolation) -> Self {
        GriddedInitializer {
            wind_source: SourceRole::Surface,
            atmosphere_source: None,
            interpolation,
        }
    }

    /// Everything from the weather model
    pub fn weather_model(interpolation: Interpolation) -> Self {
        GriddedInitializer {
            wind_source: SourceRole::Weather,
            atmosphere_source: Some(SourceRole::Weather),
            interpolation,
        }
    }

    /// NinjaFOAM wind with weather-model cloud cover and temperature
    pub fn foam_weather_model() -> Self {
        GriddedInitializer {
            wind_source: SourceRole::Surface,
            atmosphere_source: Some(SourceRole::Weather),
            interpolation: Interpolation::Nearest,
        }
    }

    fn source<'a>(role: SourceRole, inputs: &InitInputs<'a>) -> WindResult<&'a dyn WeatherModelSource> {
        let (source, what) = match role {
            SourceRole::Surface => (inputs.surface_source, "surface wind"),
            SourceRole::Weather => (inputs.weather_source, "weather model"),
        };
        source.ok_or_else(|| WindError::invalid_input(format!("no {what} source configured")))
    }

    fn read(role: SourceRole, inputs: &InitInputs<'_>) -> WindResult<WeatherSurface> {
        let source = Self::source(role, inputs)?;
        let surface = inputs.lock.with(|guard| source.read_surface(guard, inputs.time))?;
        info!(
            source = source.identifier(),
            rows = surface.speed.nrows(),
            cols = surface.speed.ncols(),
            "surface grids read"
        );
        Ok(surface)
    }

    /// Resolve the source rasters onto mesh columns
    ///
    /// # Errors
    /// Returns [`WindError::InvalidInput`] when a required source is missing or
    /// does not overlap the mesh, and propagates read errors.
    pub fn column_surface(&self, mesh: &Mesh, inputs: &InitInputs<'_>) -> WindResult<ColumnSurface> {
        let wind = Self::read(self.wind_source, inputs)?;
        let (u, v) = speed_direction_grids(&wind.speed, &wind.direction)?;
        let u = columns_from_raster(mesh, &u, self.interpolation, 0.0, "u wind")?;
        let v = columns_from_raster(mesh, &v, self.interpolation, 0.0, "v wind")?;

        let atmosphere = match self.atmosphere_source {
            None => None,
            Some(role) if role == self.wind_source => Some(wind.clone()),
            Some(role) => Some(Self::read(role, inputs)?),
        };
        let atmosphere_grid = |grid: Option<&Raster>, fallback: f64, what: &str| match grid {
            Some(g) => columns_from_raster(mesh, g, Interpolation::Bilinear, fallback, what),
            None => mesh.column_raster(fallback),
        };
        let cloud_cover = atmosphere_grid(
            atmosphere.as_ref().and_then(|a| a.cloud_cover.as_ref()),
            inputs.cloud_cover,
            "cloud cover",
        )?
        .map(|c| c.clamp(0.0, 1.0));
        let air_temperature = atmosphere_grid(
            atmosphere.as_ref().and_then(|a| a.air_temperature.as_ref()),
            inputs.air_temperature,
            "air temperature",
        )?;

        Ok(ColumnSurface {
            u,
            v,
            cloud_cover,
            air_temperature,
            input_height: wind.wind_height.unwrap_or(inputs.input_height),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{flat_mesh, inputs};
    use super::super::{make_initializer, InitializationMethod, InMemorySource};
    use super::*;
    use crate::grid::RasterHeader;
    use crate::simulation::MetadataLock;
    use approx::assert_relative_eq;

    fn grid(xll: f64, value: f64) -> Raster {
        Raster::filled(RasterHeader::new(5, 5, xll, 0.0, 250.0), value).unwrap()
    }

    fn surface(xll: f64, speed: f64, direction: f64) -> WeatherSurface {
        WeatherSurface {
            speed: grid(xll, speed),
            direction: grid(xll, direction),
            cloud_cover: Some(grid(xll, 0.8)),
            air_temperature: Some(grid(xll, 280.0)),
            wind_height: Some(20.0),
        }
    }

    #[test]
    fn test_gridded_interpolates_uniform_surface() {
        let mesh = flat_mesh(10, 100.0);
        let lock = MetadataLock::new();
        let source = InMemorySource::new("grid", surface(0.0, 6.0, 180.0));
        let mut inputs = inputs(&lock, &[]);
        inputs.surface_source = Some(&source);

        let columns = GriddedInitializer::surface(Interpolation::Bilinear)
            .column_surface(&mesh, &inputs)
            .unwrap();
        // Southerly wind blows north
        assert_relative_eq!(columns.v.get(4, 4), 6.0, epsilon = 1e-9);
        assert_relative_eq!(columns.u.get(9, 9), 0.0, epsilon = 1e-9);
        // Cloud stays uniform for plain gridded input
        assert_eq!(columns.cloud_cover.get(0, 0), inputs.cloud_cover);
        assert_eq!(columns.input_height, 20.0);
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_weather_model_takes_cloud_and_temperature() {
        let mesh = flat_mesh(10, 100.0);
        let lock = MetadataLock::new();
        let wx = InMemorySource::new("wx", surface(0.0, 4.0, 90.0));
        let mut inputs = inputs(&lock, &[]);
        inputs.weather_source = Some(&wx);

        let fields = make_initializer(InitializationMethod::WxModel)
            .initialize_fields(&mesh, &inputs)
            .unwrap();
        assert_relative_eq!(fields.cloud_cover.get(3, 3), 0.8, epsilon = 1e-12);
        assert_relative_eq!(fields.air_temperature.get(3, 3), 280.0, epsilon = 1e-12);
        // Easterly wind blows west
        assert!(fields.wind.at(5, 5, 4)[0] < 0.0);
    }

    #[test]
    fn test_foam_weather_model_mixes_sources() {
        let mesh = flat_mesh(10, 100.0);
        let lock = MetadataLock::new();
        let foam = InMemorySource::new(
            "foam",
            WeatherSurface {
                cloud_cover: None,
                air_temperature: None,
                wind_height: None,
                ..surface(0.0, 3.0, 270.0)
            },
        );
        let wx = InMemorySource::new("wx", surface(0.0, 9.0, 0.0));
        let mut inputs = inputs(&lock, &[]);
        inputs.surface_source = Some(&foam);
        inputs.weather_source = Some(&wx);

        let columns = GriddedInitializer::foam_weather_model()
            .column_surface(&mesh, &inputs)
            .unwrap();
        assert_relative_eq!(columns.u.get(2, 2), 3.0, epsilon = 1e-9);
        assert_relative_eq!(columns.cloud_cover.get(2, 2), 0.8, epsilon = 1e-12);
        assert_eq!(columns.input_height, inputs.input_height);
    }

    #[test]
    fn test_missing_or_disjoint_source_is_invalid() {
        let mesh = flat_mesh(10, 100.0);
        let lock = MetadataLock::new();
        let inputs_none = inputs(&lock, &[]);
        let err = GriddedInitializer::surface(Interpolation::Bilinear)
            .column_surface(&mesh, &inputs_none)
            .unwrap_err();
        assert!(matches!(err, WindError::InvalidInput { .. }));

        let far = InMemorySource::new("far", surface(50_000.0, 6.0, 180.0));
        let mut inputs = inputs(&lock, &[]);
        inputs.surface_source = Some(&far);
        let err = GriddedInitializer::surface(Interpolation::Nearest)
            .column_surface(&mesh, &inputs)
            .unwrap_err();
        assert!(matches!(err, WindError::InvalidInput { .. }));
    }
}
