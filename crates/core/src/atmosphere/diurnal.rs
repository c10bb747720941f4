//! Diurnal slope flow and surface-layer similarity
//!
//! Per-column radiation balance, Monin-Obukhov length / friction velocity
//! iteration and thermally driven slope winds:
//!
//! 1. Shortwave balance `Qsw` from the sun on the local slope, terrain
//!    shading and cloud cover (Holtslag and van Ulden 1983).
//! 2. Net radiation `Q*` and sensible heat flux `Qh` from the surface
//!    albedo, Bowen ratio and ground heat fraction.
//! 3. Iterative `u*`/`L` for unstable (`Qh > 0`) and stable (`Qh < 0`)
//!    surface layers, then the boundary-layer depth.
//! 4. A trace along the fall line to the nearest ridge or valley gives the
//!    elevation difference that drives an upslope (day) or downslope
//!    (night) flow, rotated onto the local slope.
//!
//! # Scientific References
//! - Holtslag, A.A.M., van Ulden, A.P. (1983). "A simple scheme for daytime
//!   estimates of the surface fluxes from routine weather data." J. Climate
//!   Appl. Meteor., 22, 517-529.
//! - Mahrt, L. (1982). "Momentum balance of gravity flows." J. Atmos. Sci.,
//!   39, 2701-2711.

use super::profile::stability_psi;
use super::solar::SolarPosition;
use super::surface::SurfaceProperties;
use crate::core_types::wind::{heading_to_uvw, north_to_math_angle};
use crate::error::{WindError, WindResult};
use crate::grid::{Raster, TerrainAnalysis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Von Kármán constant
pub const VON_KARMAN: f64 = 0.4;

/// Gravitational acceleration (m/s²)
pub const GRAVITY: f64 = 9.81;

/// Fraction of the hill/valley elevation difference occupied by slope flow
pub const FLOW_THICKNESS_RATIO: f64 = 0.05;

/// Floor on the surface wind used for the flux iteration (m/s)
const MIN_DIURNAL_WIND: f64 = 1.788;

/// Obukhov length standing in for "neutral" (m)
const NEUTRAL_OBUKHOV_LENGTH: f64 = 1.0e6;

/// Relative change in u* that ends the flux iteration
const FLUX_TOLERANCE: f64 = 0.01;
const MAX_FLUX_ITERATIONS: usize = 200;

/// Trace step along the fall line, in cells
const TRACE_STEP_CELLS: f64 = 1.5;

// Radiation balance coefficients (Holtslag and van Ulden)
const A1: f64 = 990.0;
const A2: f64 = -30.0;
const B1: f64 = -0.75;
const B2: f64 = 3.4;
const C1: f64 = 5.31e-13;
const C2: f64 = 60.0;
const C3: f64 = 0.12;
const STEFAN_BOLTZMANN: f64 = 5.67e-8;
const SOLAR_REFERENCE: f64 = 1353.0;

// ============================================================================
// AIR PROPERTIES
// ============================================================================

/// Dry air at 1 atm, 100 K to 550 K in 50 K steps (Incropera and DeWitt)
const AIR_TEMPERATURE: [f64; 10] = [
    100.0, 150.0, 200.0, 250.0, 300.0, 350.0, 400.0, 450.0, 500.0, 550.0,
];
const AIR_DENSITY: [f64; 10] = [
    3.5562, 2.3364, 1.7458, 1.3947, 1.1614, 0.995, 0.8711, 0.774, 0.6964, 0.6329,
];
const AIR_SPECIFIC_HEAT: [f64; 10] = [
    1032.0, 1012.0, 1007.0, 1006.0, 1007.0, 1009.0, 1014.0, 1021.0, 1030.0, 1040.0,
];

fn interpolate_air_table(table: &[f64; 10], temperature_k: f64) -> f64 {
    let last = AIR_TEMPERATURE.len() - 1;
    if temperature_k <= AIR_TEMPERATURE[0] {
        return table[0];
    }
    if temperature_k >= AIR_TEMPERATURE[last] {
        return table[last];
    }
    let upper = AIR_TEMPERATURE
        .iter()
        .position(|&t| t >= temperature_k)
        .unwrap_or(last);
    let lower = upper - 1;
    let frac = (temperature_k - AIR_TEMPERATURE[lower])
        / (AIR_TEMPERATURE[upper] - AIR_TEMPERATURE[lower]);
    table[lower] + frac * (table[upper] - table[lower])
}

/// Air density (kg/m³) at `temperature_k`
pub fn air_density(temperature_k: f64) -> f64 {
    interpolate_air_table(&AIR_DENSITY, temperature_k)
}

/// Specific heat of air at constant pressure (J/kg·K) at `temperature_k`
pub fn air_specific_heat(temperature_k: f64) -> f64 {
    interpolate_air_table(&AIR_SPECIFIC_HEAT, temperature_k)
}

/// Coriolis parameter `f = 2Ω|sin φ|`
///
/// Latitudes outside ±90° fall back to a mid-latitude `1e-4`, and the
/// equator is floored at `1e-8` so boundary-layer depths stay finite.
pub fn coriolis_parameter(latitude: f64) -> f64 {
    let f = if (-90.0..=90.0).contains(&latitude) {
        (1.4544e-4 * latitude.to_radians().sin()).abs()
    } else {
        1.0e-4
    };
    if f == 0.0 {
        1.0e-8
    } else {
        f
    }
}

// ============================================================================
// SURFACE ENERGY BALANCE
// ============================================================================

/// Drag and entrainment coefficients of the slope-flow momentum balance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SlopeFlowCoefficients {
    pub downslope_drag: f64,
    pub downslope_entrainment: f64,
    pub upslope_drag: f64,
    pub upslope_entrainment: f64,
}

impl Default for SlopeFlowCoefficients {
    fn default() -> Self {
        SlopeFlowCoefficients {
            downslope_drag: 0.0001,
            downslope_entrainment: 0.01,
            upslope_drag: 0.2,
            upslope_entrainment: 0.2,
        }
    }
}

/// Direction of the thermally driven flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlopeFlowRegime {
    /// No sensible heat flux, no slope wind
    Neutral,
    /// Heated slope, flow up the fall line
    Upslope,
    /// Cooled slope, drainage flow down the fall line
    Downslope,
}

/// Shortwave balance term `Qsw` (W/m²)
///
/// `solar_intensity` is the extraterrestrial irradiance on the cell's slope;
/// shaded cells receive none.
pub fn surface_shortwave(solar_intensity: f64, shaded: bool, cloud_cover: f64) -> f64 {
    let sin_psi = if shaded {
        0.0
    } else {
        solar_intensity / SOLAR_REFERENCE
    };
    (A1 * sin_psi + A2) * (1.0 + B1 * cloud_cover.powf(B2))
}

/// Surface-layer state of one column
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurfaceLayer {
    /// Shortwave balance `Qsw` (W/m²)
    pub shortwave: f64,
    /// Sensible heat flux `Qh` (W/m², positive upward)
    pub heat_flux: f64,
    /// Obukhov length (m)
    pub obukhov_length: f64,
    /// Friction velocity (m/s)
    pub friction_velocity: f64,
    /// Boundary-layer depth (m)
    pub abl_height: f64,
    pub regime: SlopeFlowRegime,
}

/// Inputs for the surface-layer balance of one column
#[derive(Debug, Clone, Copy)]
pub struct ColumnForcing {
    pub aspect: f64,
    pub slope: f64,
    pub shaded: bool,
    /// Extraterrestrial irradiance on the slope (W/m²)
    pub solar_intensity: f64,
    pub cloud_cover: f64,
    /// Air temperature (K)
    pub air_temperature: f64,
    /// Surface wind speed at `input_height` (m/s)
    pub wind_speed: f64,
    /// Height of the surface wind above the roughness elements (m)
    pub input_height: f64,
    pub surface: SurfaceProperties,
}

impl ColumnForcing {
    fn log_friction_velocity(&self, zm: f64, obukhov_length: f64, speed: f64) -> f64 {
        let z0 = self.surface.roughness_length;
        let l = obukhov_length;
        VON_KARMAN * speed / ((zm / z0).ln() - stability_psi(zm / l, l) + stability_psi(z0 / l, l))
    }

    /// Radiation balance and flux iteration for this column
    pub fn surface_layer(&self, coriolis: f64) -> SurfaceLayer {
        let s = &self.surface;
        let t = self.air_temperature;
        let cloud = self.cloud_cover;
        let shortwave = surface_shortwave(self.solar_intensity, self.shaded, cloud);
        let net_radiation = ((1.0 - s.albedo) * shortwave + C1 * t.powi(6)
            - STEFAN_BOLTZMANN * t.powi(4)
            + C2 * cloud)
            / (1.0 + C3);
        let mut heat_flux =
            (s.bowen / (1.0 + s.bowen)) * (net_radiation * (1.0 - s.cg) + s.anthropogenic);

        let speed = self.wind_speed.max(MIN_DIURNAL_WIND);
        let zm = self.input_height + s.roughness_height - s.displacement_height;
        let rho_cp = air_density(t) * air_specific_heat(t);
        let neutral_u_star = VON_KARMAN * speed / (zm / s.roughness_length).ln();

        let (regime, mut obukhov_length, mut u_star) = if heat_flux == 0.0 {
            (SlopeFlowRegime::Neutral, NEUTRAL_OBUKHOV_LENGTH, neutral_u_star)
        } else if heat_flux > 0.0 {
            let mut u_star = neutral_u_star;
            let mut l = NEUTRAL_OBUKHOV_LENGTH;
            for _ in 0..MAX_FLUX_ITERATIONS {
                let previous = u_star;
                l = -rho_cp * t * previous.powi(3) / (VON_KARMAN * GRAVITY * heat_flux);
                u_star = self.log_friction_velocity(zm, l, speed);
                if (1.0 - u_star / previous).abs() <= FLUX_TOLERANCE {
                    break;
                }
            }
            (SlopeFlowRegime::Upslope, l, u_star)
        } else {
            let mut u_star = neutral_u_star;
            let mut l = NEUTRAL_OBUKHOV_LENGTH;
            let mut theta_star = 0.0;
            let d3 = (-shortwave * (1.0 - s.albedo) + 96.0 - 60.0 * cloud) / 2870.0;
            for _ in 0..MAX_FLUX_ITERATIONS {
                let previous = u_star;
                let v = previous / 50.0;
                let a = 15.0 * v * v + 6600.0 * v.powi(3);
                theta_star = t * ((a * a + d3 * v * v + 1.55 * v.powi(3)).sqrt() - a);
                l = previous * previous / (VON_KARMAN * GRAVITY * theta_star / t);
                u_star = self.log_friction_velocity(zm, l, speed);
                if (1.0 - u_star / previous).abs() <= FLUX_TOLERANCE {
                    break;
                }
            }
            heat_flux = -rho_cp * u_star * theta_star;
            (SlopeFlowRegime::Downslope, l, u_star)
        };

        if !(obukhov_length.is_finite() && u_star.is_finite()) {
            debug!(
                heat_flux,
                obukhov_length, u_star, "flux iteration did not settle, using neutral layer"
            );
            obukhov_length = NEUTRAL_OBUKHOV_LENGTH;
            u_star = neutral_u_star;
        }

        let neutral_abl = 0.2 * u_star / coriolis;
        let abl_height = if heat_flux >= 0.0 {
            neutral_abl
        } else {
            (0.4 * (u_star * obukhov_length.abs() / coriolis).sqrt()).min(neutral_abl)
        };

        SurfaceLayer {
            shortwave,
            heat_flux,
            obukhov_length,
            friction_velocity: u_star,
            abl_height,
            regime,
        }
    }
}

// ============================================================================
// SLOPE FLOW
// ============================================================================

/// Slope wind of one column
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SlopeFlow {
    pub u: f64,
    pub v: f64,
    pub w: f64,
    /// Depth of the slope flow above the displacement height (m)
    pub flow_height: f64,
}

/// Fall-line trace result
#[derive(Debug, Clone, Copy)]
struct HillTrace {
    elevation_change: f64,
    distance: f64,
    local_sin_alpha: f64,
}

/// Slope-flow solver over one DEM
pub struct SlopeFlowModel<'a> {
    dem: &'a Raster,
    shade: &'a [bool],
    coefficients: SlopeFlowCoefficients,
}

impl<'a> SlopeFlowModel<'a> {
    pub fn new(dem: &'a Raster, shade: &'a [bool], coefficients: SlopeFlowCoefficients) -> Self {
        SlopeFlowModel {
            dem,
            shade,
            coefficients,
        }
    }

    fn shaded_at(&self, x: f64, y: f64) -> bool {
        self.dem
            .header()
            .cell_of(x, y)
            .is_some_and(|(i, j)| self.shade[i * self.dem.ncols() + j])
    }

    /// Walk the fall line away from cell (i, j) until the terrain turns
    ///
    /// Upslope flow is fed from downhill, so the walk heads downhill until it
    /// climbs again or enters shade; drainage flow walks uphill until it
    /// descends or leaves the shade.
    fn trace(&self, i: usize, j: usize, aspect: f64, regime: SlopeFlowRegime) -> HillTrace {
        let cs = self.dem.cell_size();
        let step = TRACE_STEP_CELLS * cs;
        let theta = north_to_math_angle(aspect).to_radians();
        let sign = if regime == SlopeFlowRegime::Downslope {
            -1.0
        } else {
            1.0
        };
        let (dx, dy) = (sign * theta.cos() * step, sign * theta.sin() * step);

        let header = self.dem.header();
        let (x0, y0) = header.cell_center(i, j);
        let z0 = self.dem.get(i, j);
        let (mut x, mut y) = (x0, y0);
        let mut elev_old;
        let mut elev_new = z0;
        loop {
            x += dx;
            y += dy;
            elev_old = elev_new;
            if !header.contains(x, y) {
                break;
            }
            match self.dem.interpolate_bilinear(x, y) {
                Some(z) => elev_new = z,
                None => break,
            }
            let shaded = self.shaded_at(x, y);
            match regime {
                SlopeFlowRegime::Downslope => {
                    if !shaded || elev_old >= elev_new {
                        break;
                    }
                }
                _ => {
                    if shaded || elev_old <= elev_new {
                        break;
                    }
                }
            }
        }
        x -= dx;
        y -= dy;

        let elevation_change = (elev_old - z0).abs();
        let distance = ((x - x0).powi(2) + (y - y0).powi(2) + (elev_old - z0).powi(2)).sqrt();

        let local_sin_alpha = if regime == SlopeFlowRegime::Downslope {
            let (xs, ys) = (x0 + dx, y0 + dy);
            match self.dem.interpolate_bilinear(xs, ys) {
                Some(z) if header.contains(xs, ys) => {
                    let run = dx.hypot(dy);
                    ((z - z0).abs() / run).atan().sin()
                }
                _ => 0.0,
            }
        } else {
            0.0
        };

        HillTrace {
            elevation_change,
            distance,
            local_sin_alpha,
        }
    }

    /// Slope wind at cell (i, j) for the given surface layer
    pub fn column_flow(
        &self,
        i: usize,
        j: usize,
        aspect: f64,
        slope: f64,
        air_temperature: f64,
        layer: &SurfaceLayer,
    ) -> SlopeFlow {
        if layer.regime == SlopeFlowRegime::Neutral || slope == 0.0 {
            return SlopeFlow::default();
        }
        let trace = self.trace(i, j, aspect, layer.regime);
        let flow_height = FLOW_THICKNESS_RATIO * trace.elevation_change;
        let epsilon = self.dem.cell_size() / 1000.0;
        if trace.distance < epsilon {
            return SlopeFlow {
                flow_height,
                ..SlopeFlow::default()
            };
        }

        let t = air_temperature;
        let rho_cp_t = air_density(t) * air_specific_heat(t) * t;
        let c = &self.coefficients;
        let (speed, heading, elevation) = match layer.regime {
            SlopeFlowRegime::Upslope => {
                let s = (layer.heat_flux * GRAVITY * trace.elevation_change
                    / ((c.upslope_drag + c.upslope_entrainment) * rho_cp_t))
                    .cbrt();
                (s, (aspect - 180.0).rem_euclid(360.0), slope)
            }
            _ => {
                let resistance = c.downslope_drag + c.downslope_entrainment;
                let sin_alpha = (trace.elevation_change / trace.distance).min(trace.local_sin_alpha);
                let entrainment_length = FLOW_THICKNESS_RATIO * trace.elevation_change / resistance;
                let s = (-layer.heat_flux * GRAVITY * trace.distance * sin_alpha
                    / (rho_cp_t * resistance))
                    .cbrt()
                    * (1.0 - (-trace.distance / entrainment_length).exp()).cbrt();
                (s, aspect, -slope)
            }
        };
        if !speed.is_finite() || speed <= 0.0 {
            return SlopeFlow {
                flow_height,
                ..SlopeFlow::default()
            };
        }
        let (u, v, w) = heading_to_uvw(speed, heading, elevation);
        SlopeFlow {
            u,
            v,
            w,
            flow_height,
        }
    }
}

// ============================================================================
// GRIDS
// ============================================================================

/// Per-column inputs of the diurnal computation, all on the DEM grid
pub struct DiurnalInputs<'a> {
    pub dem: &'a Raster,
    pub terrain: &'a TerrainAnalysis,
    pub shade: &'a [bool],
    pub sun: &'a SolarPosition,
    pub surface: SurfaceProperties,
    /// Surface wind speed (m/s)
    pub wind_speed: &'a Raster,
    /// Cloud fraction 0..1
    pub cloud_cover: &'a Raster,
    /// Air temperature (K)
    pub air_temperature: &'a Raster,
    pub input_height: f64,
    pub latitude: f64,
    pub coefficients: SlopeFlowCoefficients,
}

/// Diurnal slope flow and boundary-layer grids
#[derive(Debug, Clone)]
pub struct DiurnalSolution {
    pub u: Raster,
    pub v: Raster,
    pub w: Raster,
    pub flow_height: Raster,
    pub obukhov_length: Raster,
    pub friction_velocity: Raster,
    pub abl_height: Raster,
}

/// Run the surface-layer balance and slope-flow model for every column
///
/// # Errors
/// Returns [`WindError::InvalidInput`] if the input grids do not share
/// the DEM's shape.
pub fn compute_diurnal(inputs: &DiurnalInputs<'_>) -> WindResult<DiurnalSolution> {
    let dem = inputs.dem;
    let header = dem.header().clone();
    for (name, grid) in [
        ("wind speed", inputs.wind_speed),
        ("cloud cover", inputs.cloud_cover),
        ("air temperature", inputs.air_temperature),
    ] {
        if grid.nrows() != dem.nrows() || grid.ncols() != dem.ncols() {
            return Err(WindError::invalid_input(format!(
                "{name} grid is {}x{}, DEM is {}x{}",
                grid.nrows(),
                grid.ncols(),
                dem.nrows(),
                dem.ncols()
            )));
        }
    }

    let coriolis = coriolis_parameter(inputs.latitude);
    let model = SlopeFlowModel::new(dem, inputs.shade, inputs.coefficients);
    let ncols = dem.ncols();

    let cells: Vec<(SlopeFlow, SurfaceLayer)> = (0..dem.nrows() * ncols)
        .into_par_iter()
        .map(|idx| {
            let (i, j) = (idx / ncols, idx % ncols);
            let aspect = inputs.terrain.aspect_at(i, j);
            let slope = inputs.terrain.slope_at(i, j);
            let forcing = ColumnForcing {
                aspect,
                slope,
                shaded: inputs.shade[idx],
                solar_intensity: inputs.sun.tilted_intensity(aspect, slope),
                cloud_cover: inputs.cloud_cover.get(i, j),
                air_temperature: inputs.air_temperature.get(i, j),
                wind_speed: inputs.wind_speed.get(i, j),
                input_height: inputs.input_height,
                surface: inputs.surface,
            };
            let layer = forcing.surface_layer(coriolis);
            let flow = model.column_flow(i, j, aspect, slope, forcing.air_temperature, &layer);
            (flow, layer)
        })
        .collect();

    let grid = |f: &dyn Fn(&(SlopeFlow, SurfaceLayer)) -> f64| {
        Raster::with_data(header.clone(), cells.iter().map(f).collect())
    };
    let solution = DiurnalSolution {
        u: grid(&|c| c.0.u)?,
        v: grid(&|c| c.0.v)?,
        w: grid(&|c| c.0.w)?,
        flow_height: grid(&|c| c.0.flow_height)?,
        obukhov_length: grid(&|c| c.1.obukhov_length)?,
        friction_velocity: grid(&|c| c.1.friction_velocity)?,
        abl_height: grid(&|c| c.1.abl_height)?,
    };
    debug!(
        max_flow_height = solution.flow_height.max_value().unwrap_or(0.0),
        "diurnal slope flow computed"
    );
    Ok(solution)
}
