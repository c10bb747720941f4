//! Run configuration
//!
//! One [`SimulationConfig`] describes one run of an army. Everything is
//! serde-deserializable from JSON with camelCase keys; missing keys take the
//! [`Default`] values.

use crate::atmosphere::{ProfileKind, SlopeFlowCoefficients, Vegetation};
use crate::core_types::{validate_stations, Celsius, SpeedUnits, WeatherStation};
use crate::error::{WindError, WindResult};
use crate::grid::{MeshConfig, MeshResolution};
use crate::init::{EsriGridSource, InitializationMethod};
use crate::solver::SolverConfig;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration of a single wind simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SimulationConfig {
    pub initialization_method: InitializationMethod,
    /// Add thermally driven slope flows
    pub diurnal_winds: bool,
    /// Iterate until the field reproduces the station observations
    pub match_wx_stations: bool,
    /// Worker threads for this run
    pub number_cpus: usize,
    pub mesh_resolution: MeshResolution,
    /// Node layers including the ground
    pub vertical_layers: usize,
    pub max_matching_iterations: usize,
    /// Use stability-dependent weighting
    pub stability_flag: bool,
    /// Fixed stability alpha in place of the class table
    pub user_alpha: Option<f64>,

    /// Domain-average speed in `input_speed_units`
    pub input_speed: f64,
    pub input_speed_units: SpeedUnits,
    /// Direction the wind blows from (degrees)
    pub input_direction: f64,
    /// Height of the input wind above the vegetation (m)
    pub input_wind_height: f64,
    /// Height of the output grids above the vegetation (m)
    pub output_wind_height: f64,
    pub vegetation: Vegetation,
    pub profile: ProfileKind,
    /// Cloud fraction 0..1
    pub cloud_cover: f64,
    pub air_temperature: Celsius,
    pub latitude: f64,
    pub longitude: f64,
    pub time: DateTime<Utc>,

    /// Half-width of the acceptance band for station matching (m/s)
    pub match_tolerance: f64,
    /// Step relaxation of the matching update
    pub outer_relaxation: f64,
    pub solver: SolverConfig,
    pub slope_flow: SlopeFlowCoefficients,

    pub stations: Vec<WeatherStation>,
    /// Elevation grid (ESRI ASCII)
    pub dem_path: Option<PathBuf>,
    /// Gridded or NinjaFOAM surface wind
    pub surface_source: Option<EsriGridSource>,
    /// Weather-model surface
    pub weather_source: Option<EsriGridSource>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            initialization_method: InitializationMethod::DomainAverage,
            diurnal_winds: false,
            match_wx_stations: false,
            number_cpus: 1,
            mesh_resolution: MeshResolution::Coarse,
            vertical_layers: 20,
            max_matching_iterations: 150,
            stability_flag: false,
            user_alpha: None,
            input_speed: 5.0,
            input_speed_units: SpeedUnits::MetersPerSecond,
            input_direction: 270.0,
            input_wind_height: 10.0,
            output_wind_height: 10.0,
            vegetation: Vegetation::Grass,
            profile: ProfileKind::MoninObukhov,
            cloud_cover: 0.0,
            air_temperature: Celsius::new(20.0),
            latitude: 45.0,
            longitude: -113.0,
            time: Utc.with_ymd_and_hms(2024, 7, 1, 18, 0, 0).single().unwrap_or_default(),
            match_tolerance: 0.22,
            outer_relaxation: 1.0,
            solver: SolverConfig::default(),
            slope_flow: SlopeFlowCoefficients::default(),
            stations: Vec::new(),
            dem_path: None,
            surface_source: None,
            weather_source: None,
        }
    }
}

impl SimulationConfig {
    /// Parse a configuration from JSON text
    ///
    /// # Errors
    /// Returns [`WindError::Config`] on malformed JSON.
    pub fn from_json_str(text: &str) -> WindResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load a configuration file; relative paths inside it resolve against
    /// the file's directory
    ///
    /// # Errors
    /// Returns [`WindError::Io`] when the file cannot be read and
    /// [`WindError::Config`] on malformed JSON.
    pub fn from_json_file(path: &Path) -> WindResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| WindError::io(path, e))?;
        let mut config = Self::from_json_str(&text)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        if let Some(dem) = self.dem_path.as_mut() {
            resolve(dem);
        }
        for source in [self.surface_source.as_mut(), self.weather_source.as_mut()]
            .into_iter()
            .flatten()
        {
            resolve(&mut source.speed_path);
            resolve(&mut source.direction_path);
            if let Some(p) = source.cloud_cover_path.as_mut() {
                resolve(p);
            }
            if let Some(p) = source.temperature_path.as_mut() {
                resolve(p);
            }
        }
    }

    /// Serialize to pretty JSON
    ///
    /// # Errors
    /// Returns [`WindError::Config`] if serialization fails.
    pub fn to_json(&self) -> WindResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Domain-average speed in m/s
    pub fn input_speed_mps(&self) -> f64 {
        self.input_speed_units.to_mps(self.input_speed)
    }

    /// Stations converted to SI units
    pub fn stations_si(&self) -> Vec<WeatherStation> {
        self.stations.iter().map(WeatherStation::to_si).collect()
    }

    /// Mesh parameters for this run
    pub fn mesh_config(&self) -> MeshConfig {
        let surface = self.vegetation.surface();
        MeshConfig {
            resolution: self.mesh_resolution,
            vertical_layers: self.vertical_layers,
            min_clearance: self.output_wind_height + surface.roughness_height,
            ..MeshConfig::default()
        }
    }

    /// Reject out-of-range values before any work is done
    ///
    /// # Errors
    /// Returns [`WindError::InvalidInput`] naming the first bad field.
    pub fn validate(&self) -> WindResult<()> {
        self.validate_with_sources(self.surface_source.is_some(), self.weather_source.is_some())
    }

    /// [`SimulationConfig::validate`] with surface sources supplied outside
    /// the configuration
    ///
    /// # Errors
    /// Returns [`WindError::InvalidInput`] naming the first bad field.
    pub fn validate_with_sources(&self, has_surface: bool, has_weather: bool) -> WindResult<()> {
        let bad = |message: String| Err(WindError::invalid_input(message));
        if self.number_cpus == 0 {
            return bad("numberCpus must be at least 1".into());
        }
        if self.max_matching_iterations == 0 {
            return bad("maxMatchingIterations must be at least 1".into());
        }
        if let MeshResolution::Custom(res) = self.mesh_resolution {
            if !(res.is_finite() && res > 0.0) {
                return bad(format!("mesh resolution {res} must be positive"));
            }
        }
        if self.vertical_layers < 2 {
            return bad("verticalLayers must be at least 2".into());
        }
        if !(self.input_speed.is_finite() && self.input_speed >= 0.0) {
            return bad(format!("input speed {} must be non-negative", self.input_speed));
        }
        if !(0.0..=360.0).contains(&self.input_direction) {
            return bad(format!("input direction {} outside 0..=360", self.input_direction));
        }
        for (name, height) in [
            ("input wind height", self.input_wind_height),
            ("output wind height", self.output_wind_height),
        ] {
            if !(height.is_finite() && height > 0.0) {
                return bad(format!("{name} {height} must be positive"));
            }
        }
        if !(0.0..=1.0).contains(&self.cloud_cover) {
            return bad(format!("cloud cover {} outside 0..=1", self.cloud_cover));
        }
        if !(-90.0..=90.0).contains(&self.latitude) || !(-180.0..=180.0).contains(&self.longitude) {
            return bad(format!(
                "location ({}, {}) is not a valid latitude/longitude",
                self.latitude, self.longitude
            ));
        }
        if !(self.match_tolerance.is_finite() && self.match_tolerance > 0.0) {
            return bad(format!("match tolerance {} must be positive", self.match_tolerance));
        }
        if !(self.outer_relaxation.is_finite() && self.outer_relaxation > 0.0) {
            return bad(format!("outer relaxation {} must be positive", self.outer_relaxation));
        }
        if !(self.solver.tolerance.is_finite() && self.solver.tolerance > 0.0) || self.solver.max_iterations == 0 {
            return bad("solver tolerance and iteration limit must be positive".into());
        }
        if self.user_alpha.is_some_and(|a| !(a.is_finite() && a > 0.0)) {
            return bad("user stability alpha must be positive".into());
        }
        match self.initialization_method {
            InitializationMethod::Point => validate_stations(&self.stations)?,
            InitializationMethod::Gridded | InitializationMethod::FoamDomainAverage if !has_surface => {
                return bad("gridded initialization requires a surfaceSource".into());
            }
            InitializationMethod::WxModel if !has_weather => {
                return bad("weather-model initialization requires a weatherSource".into());
            }
            InitializationMethod::FoamWxModel if !(has_surface && has_weather) => {
                return bad("foamWxModel initialization requires surfaceSource and weatherSource".into());
            }
            _ => {}
        }
        if self.match_wx_stations && self.initialization_method != InitializationMethod::Point {
            return bad("matchWxStations requires point initialization".into());
        }
        Ok(())
    }
}
