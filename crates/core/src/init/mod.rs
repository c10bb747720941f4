//! Initial wind field construction
//!
//! Each strategy reduces its inputs to a surface wind on mesh columns and
//! then shares one vertical extension step (see [`columns::extend_to_mesh`]).
//! Strategies are a closed set selected by [`make_initializer`].

pub mod columns;
pub mod gridded;
pub mod point;
pub mod source;

pub use columns::{extend_to_mesh, ColumnSurface};
pub use gridded::GriddedInitializer;
pub use point::PointInitializer;
pub use source::{EsriGridSource, InMemorySource, WeatherModelSource, WeatherSurface};

use crate::atmosphere::diurnal::SlopeFlowCoefficients;
use crate::atmosphere::profile::ProfileKind;
use crate::atmosphere::solar::SurfaceExposure;
use crate::atmosphere::stability::BoundaryLayer;
use crate::atmosphere::surface::SurfaceProperties;
use crate::core_types::WeatherStation;
use crate::error::WindResult;
use crate::grid::{Interpolation, Mesh, Raster, VectorField};
use crate::simulation::MetadataLock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Where the initial surface wind comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InitializationMethod {
    /// One speed and direction for the whole domain
    #[default]
    DomainAverage,
    /// Weather station observations
    Point,
    /// Surface speed and direction rasters
    Gridded,
    /// Weather-model surface fields
    WxModel,
    /// NinjaFOAM surface with domain-average cloud cover
    FoamDomainAverage,
    /// NinjaFOAM surface with weather-model cloud cover and temperature
    FoamWxModel,
}

/// Everything an initializer may draw on for one run
#[derive(Debug, Clone, Copy)]
pub struct InitInputs<'a> {
    /// Domain-average speed (m/s)
    pub input_speed: f64,
    /// Domain-average direction (degrees from north, blowing from)
    pub input_direction: f64,
    /// Height of the input wind above the roughness elements (m)
    pub input_height: f64,
    /// Uniform cloud fraction 0..1
    pub cloud_cover: f64,
    /// Uniform air temperature (K)
    pub air_temperature: f64,
    pub surface: SurfaceProperties,
    pub profile: ProfileKind,
    /// Add slope flows and solve the diurnal surface layer
    pub diurnal: bool,
    pub slope_flow: SlopeFlowCoefficients,
    pub time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    /// Stations in SI units
    pub stations: &'a [WeatherStation],
    /// Gridded or NinjaFOAM surface wind
    pub surface_source: Option<&'a dyn WeatherModelSource>,
    /// Weather-model surface
    pub weather_source: Option<&'a dyn WeatherModelSource>,
    pub lock: &'a MetadataLock,
}

/// Fields produced by initialization
#[derive(Debug, Clone)]
pub struct InitializedFields {
    /// U0 on mesh nodes
    pub wind: VectorField,
    /// Surface speed per column at `input_height` (m/s)
    pub surface_speed: Raster,
    pub cloud_cover: Raster,
    /// Air temperature per column (K)
    pub air_temperature: Raster,
    pub boundary_layer: BoundaryLayer,
    /// Sun and terrain exposure, present for diurnal runs
    pub exposure: Option<SurfaceExposure>,
    pub input_height: f64,
}

/// Initial-field strategy
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldInitializer {
    DomainAverage,
    Point(PointInitializer),
    Gridded(GriddedInitializer),
}

/// Strategy for a configured initialization method
pub fn make_initializer(method: InitializationMethod) -> FieldInitializer {
    match method {
        InitializationMethod::DomainAverage => FieldInitializer::DomainAverage,
        InitializationMethod::Point => FieldInitializer::Point(PointInitializer::default()),
        InitializationMethod::Gridded => FieldInitializer::Gridded(GriddedInitializer::surface(Interpolation::Bilinear)),
        InitializationMethod::WxModel => FieldInitializer::Gridded(GriddedInitializer::weather_model(Interpolation::Bilinear)),
        InitializationMethod::FoamDomainAverage => {
            FieldInitializer::Gridded(GriddedInitializer::surface(Interpolation::Nearest))
        }
        InitializationMethod::FoamWxModel => FieldInitializer::Gridded(GriddedInitializer::foam_weather_model()),
    }
}

impl FieldInitializer {
    /// Build U0 and the surface grids for `mesh`
    ///
    /// # Errors
    /// Returns [`crate::WindError::InvalidInput`] when the required source is
    /// missing or lies outside the mesh footprint, and propagates source read
    /// errors.
    pub fn initialize_fields(&self, mesh: &Mesh, inputs: &InitInputs<'_>) -> WindResult<InitializedFields> {
        let surface = match self {
            FieldInitializer::DomainAverage => {
                info!(
                    speed = inputs.input_speed,
                    direction = inputs.input_direction,
                    "domain-average initialization"
                );
                ColumnSurface::uniform(mesh, inputs)?
            }
            FieldInitializer::Point(point) => point.column_surface(mesh, inputs)?,
            FieldInitializer::Gridded(gridded) => gridded.column_surface(mesh, inputs)?,
        };
        extend_to_mesh(mesh, inputs, surface)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::grid::{terrain, MeshConfig, MeshResolution};
    use chrono::TimeZone;

    pub fn flat_mesh(n: usize, cell: f64) -> Mesh {
        let dem = terrain::flat(n, n, cell, 500.0).unwrap();
        let config = MeshConfig {
            resolution: MeshResolution::Custom(cell),
            vertical_layers: 8,
            ..MeshConfig::default()
        };
        Mesh::build_standard(&dem, &config).unwrap()
    }

    pub fn inputs<'a>(lock: &'a MetadataLock, stations: &'a [WeatherStation]) -> InitInputs<'a> {
        InitInputs {
            input_speed: 5.0,
            input_direction: 270.0,
            input_height: 10.0,
            cloud_cover: 0.0,
            air_temperature: 293.15,
            surface: SurfaceProperties::default(),
            profile: ProfileKind::MoninObukhov,
            diurnal: false,
            slope_flow: SlopeFlowCoefficients::default(),
            time: Utc.with_ymd_and_hms(2024, 7, 1, 18, 0, 0).unwrap(),
            latitude: 45.0,
            longitude: -113.0,
            stations,
            surface_source: None,
            weather_source: None,
            lock,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{flat_mesh, inputs};
    use super::*;
    use crate::atmosphere::profile::WindProfile;
    use approx::assert_relative_eq;

    #[test]
    fn test_domain_average_ground_is_zero_and_log_profile_holds() {
        let mesh = flat_mesh(10, 100.0);
        let lock = MetadataLock::new();
        let inputs = inputs(&lock, &[]);
        let fields = make_initializer(InitializationMethod::DomainAverage)
            .initialize_fields(&mesh, &inputs)
            .unwrap();
        let dims = mesh.dims();
        for i in 0..dims.nrows {
            for j in 0..dims.ncols {
                assert_eq!(fields.wind.at(i, j, 0), [0.0, 0.0, 0.0]);
            }
        }
        // Westerly: positive u, no v
        let [u, v, w] = fields.wind.at(5, 5, 3);
        assert!(u > 0.0);
        assert_relative_eq!(v, 0.0, epsilon = 1e-12);
        assert_eq!(w, 0.0);

        // Each node follows the surface profile
        let profile = WindProfile {
            kind: ProfileKind::MoninObukhov,
            input_speed: 5.0,
            input_height: 10.0,
            roughness_length: inputs.surface.roughness_length,
            roughness_height: inputs.surface.roughness_height,
            displacement_height: inputs.surface.displacement_height,
            obukhov_length: fields.boundary_layer.obukhov_length.get(5, 5),
            abl_height: fields.boundary_layer.abl_height.get(5, 5),
        };
        assert_relative_eq!(u, profile.speed_at(mesh.agl(5, 5, 3)), epsilon = 1e-9);
        assert_relative_eq!(
            profile.speed_at(inputs.input_height + inputs.surface.roughness_height),
            5.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_domain_average_calm_is_all_zero() {
        let mesh = flat_mesh(6, 100.0);
        let lock = MetadataLock::new();
        let mut inputs = inputs(&lock, &[]);
        inputs.input_speed = 0.0;
        let fields = FieldInitializer::DomainAverage.initialize_fields(&mesh, &inputs).unwrap();
        assert!(fields.wind.is_all_zero());
        assert!(fields.boundary_layer.abl_height.data().iter().all(|h| *h == 1000.0));
    }

    #[test]
    fn test_diurnal_adds_flow_on_slopes() {
        let dem = crate::grid::terrain::inclined_plane(20, 20, 50.0, 100.0, 12.0, 0.0).unwrap();
        let config = crate::grid::MeshConfig {
            resolution: crate::grid::MeshResolution::Custom(50.0),
            vertical_layers: 8,
            ..crate::grid::MeshConfig::default()
        };
        let mesh = Mesh::build_standard(&dem, &config).unwrap();
        let lock = MetadataLock::new();
        let mut inputs = inputs(&lock, &[]);
        inputs.input_speed = 0.0;
        inputs.diurnal = true;
        let fields = FieldInitializer::DomainAverage.initialize_fields(&mesh, &inputs).unwrap();
        assert!(fields.exposure.is_some());
        assert!(fields.wind.is_all_finite());
        assert!(!fields.wind.is_all_zero());
        let dims = mesh.dims();
        for i in 0..dims.nrows {
            for j in 0..dims.ncols {
                assert_eq!(fields.wind.at(i, j, 0), [0.0, 0.0, 0.0]);
            }
        }
    }
}
