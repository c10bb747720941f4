//! Weather-model and NinjaFOAM surface sources
//!
//! Decoding GRIB/NetCDF is out of scope; a source hands over already
//! decoded surface rasters. Reads require a [`MetadataGuard`], so every file
//! open is serialized through the process-wide [`MetadataLock`].
//!
//! [`MetadataLock`]: crate::simulation::MetadataLock

use crate::core_types::units::{Celsius, SpeedUnits};
use crate::error::{WindError, WindResult};
use crate::grid::Raster;
use crate::simulation::MetadataGuard;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tracing::debug;

/// Decoded surface fields of one forecast time, all SI
#[derive(Debug, Clone)]
pub struct WeatherSurface {
    /// Wind speed (m/s)
    pub speed: Raster,
    /// Meteorological direction the wind blows from (degrees)
    pub direction: Raster,
    /// Cloud fraction 0..1
    pub cloud_cover: Option<Raster>,
    /// Air temperature (K)
    pub air_temperature: Option<Raster>,
    /// Height of the wind above the roughness elements (m), if the model defines one
    pub wind_height: Option<f64>,
}

impl WeatherSurface {
    /// Check that the speed and direction grids describe the same cells
    ///
    /// # Errors
    /// Returns [`WindError::InvalidInput`] on mismatched shapes or negative speeds.
    pub fn validate(&self) -> WindResult<()> {
        let same = |a: &Raster, b: &Raster| a.header() == b.header();
        if !same(&self.speed, &self.direction) {
            return Err(WindError::invalid_input(
                "speed and direction grids have different georeferencing",
            ));
        }
        for (name, grid) in [
            ("cloud cover", self.cloud_cover.as_ref()),
            ("air temperature", self.air_temperature.as_ref()),
        ] {
            if grid.is_some_and(|g| !same(g, &self.speed)) {
                return Err(WindError::invalid_input(format!(
                    "{name} grid does not match the wind grids"
                )));
            }
        }
        if self
            .speed
            .data()
            .iter()
            .any(|s| !self.speed.is_nodata(*s) && *s < 0.0)
        {
            return Err(WindError::invalid_input("negative wind speed in surface grid"));
        }
        Ok(())
    }
}

/// Supplier of decoded weather-model surfaces
pub trait WeatherModelSource: Send + Sync {
    /// Name used in log messages
    fn identifier(&self) -> &str;

    /// Surface fields valid at `time`, read under the metadata lock
    ///
    /// # Errors
    /// Returns [`WindError::Io`] or [`WindError::Parse`] on unreadable data,
    /// or [`WindError::InvalidInput`] when no data exists for `time`.
    fn read_surface(&self, guard: &MetadataGuard<'_>, time: DateTime<Utc>) -> WindResult<WeatherSurface>;
}

impl fmt::Debug for dyn WeatherModelSource + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeatherModelSource({})", self.identifier())
    }
}

/// Surface already held in memory (tests, embedding applications)
#[derive(Debug, Clone)]
pub struct InMemorySource {
    name: String,
    surface: WeatherSurface,
}

impl InMemorySource {
    pub fn new(name: impl Into<String>, surface: WeatherSurface) -> Self {
        InMemorySource {
            name: name.into(),
            surface,
        }
    }
}

impl WeatherModelSource for InMemorySource {
    fn identifier(&self) -> &str {
        &self.name
    }

    fn read_surface(&self, _guard: &MetadataGuard<'_>, _time: DateTime<Utc>) -> WindResult<WeatherSurface> {
        self.surface.validate()?;
        Ok(self.surface.clone())
    }
}

/// Surface stored as ESRI ASCII grids on disk
///
/// Holds a single time step; the requested time is only logged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EsriGridSource {
    pub speed_path: PathBuf,
    pub direction_path: PathBuf,
    #[serde(default)]
    pub cloud_cover_path: Option<PathBuf>,
    /// Air temperature grid in °C
    #[serde(default)]
    pub temperature_path: Option<PathBuf>,
    #[serde(default)]
    pub speed_units: SpeedUnits,
    #[serde(default)]
    pub wind_height: Option<f64>,
}

impl EsriGridSource {
    pub fn new(speed_path: impl Into<PathBuf>, direction_path: impl Into<PathBuf>) -> Self {
        EsriGridSource {
            speed_path: speed_path.into(),
            direction_path: direction_path.into(),
            cloud_cover_path: None,
            temperature_path: None,
            speed_units: SpeedUnits::MetersPerSecond,
            wind_height: None,
        }
    }
}

impl WeatherModelSource for EsriGridSource {
    fn identifier(&self) -> &str {
        self.speed_path.to_str().unwrap_or("esri-grid")
    }

    fn read_surface(&self, _guard: &MetadataGuard<'_>, time: DateTime<Utc>) -> WindResult<WeatherSurface> {
        debug!(path = %self.speed_path.display(), %time, "reading surface grids");
        let units = self.speed_units;
        let speed = Raster::read_esri_ascii(&self.speed_path)?.map(|s| units.to_mps(s));
        let direction = Raster::read_esri_ascii(&self.direction_path)?;
        let cloud_cover = self
            .cloud_cover_path
            .as_deref()
            .map(Raster::read_esri_ascii)
            .transpose()?;
        let air_temperature = self
            .temperature_path
            .as_deref()
            .map(Raster::read_esri_ascii)
            .transpose()?
            .map(|t| t.map(|c| *Celsius::new(c).to_kelvin()));
        let surface = WeatherSurface {
            speed,
            direction,
            cloud_cover,
            air_temperature,
            wind_height: self.wind_height,
        };
        surface.validate()?;
        Ok(surface)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::RasterHeader;
    use crate::simulation::MetadataLock;
    use chrono::TimeZone;

    fn grid(value: f64) -> Raster {
        Raster::filled(RasterHeader::new(4, 3, 1000.0, 2000.0, 500.0), value).unwrap()
    }

    #[test]
    fn test_in_memory_source_validates() {
        let lock = MetadataLock::new();
        let time = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let good = InMemorySource::new(
            "mem",
            WeatherSurface {
                speed: grid(4.0),
                direction: grid(180.0),
                cloud_cover: None,
                air_temperature: None,
                wind_height: Some(10.0),
            },
        );
        let surface = lock.with(|g| good.read_surface(g, time)).unwrap();
        assert_eq!(surface.wind_height, Some(10.0));

        let bad_dir = Raster::filled(RasterHeader::new(5, 3, 1000.0, 2000.0, 500.0), 0.0).unwrap();
        let bad = InMemorySource::new(
            "bad",
            WeatherSurface {
                speed: grid(4.0),
                direction: bad_dir,
                cloud_cover: None,
                air_temperature: None,
                wind_height: None,
            },
        );
        assert!(lock.with(|g| bad.read_surface(g, time)).is_err());
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_esri_source_converts_units() {
        let dir = std::env::temp_dir().join(format!("windfield-src-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let speed_path = dir.join("speed.asc");
        let dir_path = dir.join("dir.asc");
        let temp_path = dir.join("temp.asc");
        grid(10.0).write_esri_ascii(&speed_path, 3).unwrap();
        grid(90.0).write_esri_ascii(&dir_path, 3).unwrap();
        grid(25.0).write_esri_ascii(&temp_path, 3).unwrap();

        let mut source = EsriGridSource::new(&speed_path, &dir_path);
        source.speed_units = SpeedUnits::KilometersPerHour;
        source.temperature_path = Some(temp_path);
        let lock = MetadataLock::new();
        let time = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let surface = lock.with(|g| source.read_surface(g, time)).unwrap();
        assert!((surface.speed.get(1, 1) - 10.0 / 3.6).abs() < 1e-9);
        let t = surface.air_temperature.unwrap();
        assert!((t.get(0, 0) - 298.15).abs() < 1e-9);
        std::fs::remove_dir_all(&dir).ok();
    }
}
