//! Surface wind on mesh columns and its vertical extension
//!
//! Every initializer reduces its input to a [`ColumnSurface`]: u, v, cloud
//! cover and air temperature per mesh column at one reference height. The
//! shared [`extend_to_mesh`] then solves the surface layer (neutral or
//! diurnal), fills each column with the vertical profile and adds slope
//! flow near the ground.

use super::{InitInputs, InitializedFields};
use crate::atmosphere::diurnal::{compute_diurnal, DiurnalInputs};
use crate::atmosphere::profile::WindProfile;
use crate::atmosphere::solar::SurfaceExposure;
use crate::atmosphere::stability::BoundaryLayer;
use crate::core_types::wind::speed_direction_to_uv;
use crate::error::{WindError, WindResult};
use crate::grid::{Interpolation, Mesh, Raster, VectorField};
use rayon::prelude::*;
use tracing::{debug, warn};

/// Surface inputs resolved to one value per mesh column
#[derive(Debug, Clone)]
pub struct ColumnSurface {
    /// East component at `input_height` (m/s)
    pub u: Raster,
    /// North component at `input_height` (m/s)
    pub v: Raster,
    pub cloud_cover: Raster,
    /// Air temperature (K)
    pub air_temperature: Raster,
    /// Height of the surface wind above the roughness elements (m)
    pub input_height: f64,
}

impl ColumnSurface {
    /// Uniform surface from a single speed and direction
    ///
    /// # Errors
    /// Propagates raster construction errors.
    pub fn uniform(mesh: &Mesh, inputs: &InitInputs<'_>) -> WindResult<Self> {
        let (u, v) = speed_direction_to_uv(inputs.input_speed, inputs.input_direction);
        Ok(ColumnSurface {
            u: mesh.column_raster(u)?,
            v: mesh.column_raster(v)?,
            cloud_cover: mesh.column_raster(inputs.cloud_cover)?,
            air_temperature: mesh.column_raster(inputs.air_temperature)?,
            input_height: inputs.input_height,
        })
    }

    /// Surface speed per column
    ///
    /// # Errors
    /// Returns [`WindError::InvalidInput`] when u and v are on different grids.
    pub fn speed(&self) -> WindResult<Raster> {
        self.u.zip_with(&self.v, f64::hypot)
    }

    /// Whether every column is calm
    pub fn is_calm(&self) -> bool {
        self.u.data().iter().chain(self.v.data()).all(|c| *c == 0.0)
    }
}

/// Sample a source raster at every mesh column centre
///
/// Columns beyond the source extent take the value at the nearest edge;
/// columns without data are set to `fallback` and counted.
///
/// # Errors
/// Returns [`WindError::InvalidInput`] when the source does not overlap the
/// mesh footprint at all.
pub fn columns_from_raster(
    mesh: &Mesh,
    source: &Raster,
    method: Interpolation,
    fallback: f64,
    what: &str,
) -> WindResult<Raster> {
    let sh = source.header();
    let mh = mesh.dem().header();
    let (sx0, sy0) = (sh.xll_corner, sh.yll_corner);
    let (sx1, sy1) = (sx0 + sh.x_length(), sy0 + sh.y_length());
    let (mx0, my0) = (mh.xll_corner, mh.yll_corner);
    let (mx1, my1) = (mx0 + mh.x_length(), my0 + mh.y_length());
    if sx1 <= mx0 || mx1 <= sx0 || sy1 <= my0 || my1 <= sy0 {
        return Err(WindError::invalid_input(format!(
            "{what} grid [{sx0:.1}, {sx1:.1}] x [{sy0:.1}, {sy1:.1}] lies outside the mesh footprint"
        )));
    }

    // Keep queries a hair inside the source so edge cells resolve
    let eps = 1e-6 * sh.cell_size;
    let columns = mesh.column_raster_from_fn(|i, j| {
        let (x, y) = mh.cell_center(i, j);
        let x = x.clamp(sx0 + eps, sx1 - eps);
        let y = y.clamp(sy0 + eps, sy1 - eps);
        source.interpolate(x, y, method).unwrap_or(f64::NAN)
    })?;
    let missing = columns.data().iter().filter(|v| v.is_nan()).count();
    if missing > 0 {
        warn!(missing, what, fallback, "columns without source data");
    }
    Ok(columns.map(|v| if v.is_nan() { fallback } else { v }))
}

/// Speed and direction grids converted to u and v grids on the source cells
///
/// No-data in either input stays no-data in both outputs.
///
/// # Errors
/// Returns [`WindError::InvalidInput`] when the two grids differ.
pub fn speed_direction_grids(speed: &Raster, direction: &Raster) -> WindResult<(Raster, Raster)> {
    let nodata = speed.header().nodata;
    let component = |pick: fn((f64, f64)) -> f64| {
        speed.zip_with(direction, move |s, d| {
            if speed.is_nodata(s) || direction.is_nodata(d) {
                nodata
            } else {
                pick(speed_direction_to_uv(s, d.rem_euclid(360.0)))
            }
        })
    };
    Ok((component(|uv| uv.0)?, component(|uv| uv.1)?))
}

/// Extend a column surface through the mesh and assemble the initial fields
///
/// # Errors
/// Returns [`WindError::InvalidInput`] when a grid does not match the mesh or
/// the resulting field is not finite.
pub fn extend_to_mesh(
    mesh: &Mesh,
    inputs: &InitInputs<'_>,
    surface: ColumnSurface,
) -> WindResult<InitializedFields> {
    for grid in [&surface.u, &surface.v, &surface.cloud_cover, &surface.air_temperature] {
        mesh.check_column_raster(grid)?;
    }
    let speed = surface.speed()?;
    let props = inputs.surface;

    let (exposure, boundary_layer, diurnal) = if inputs.diurnal {
        let exposure = SurfaceExposure::compute(mesh.dem(), inputs.time, inputs.latitude, inputs.longitude);
        let solution = compute_diurnal(&DiurnalInputs {
            dem: mesh.dem(),
            terrain: &exposure.terrain,
            shade: &exposure.shade,
            sun: &exposure.sun,
            surface: props,
            wind_speed: &speed,
            cloud_cover: &surface.cloud_cover,
            air_temperature: &surface.air_temperature,
            input_height: surface.input_height,
            latitude: inputs.latitude,
            coefficients: inputs.slope_flow,
        })?;
        let layer = BoundaryLayer::from_diurnal(&solution);
        (Some(exposure), layer, Some(solution))
    } else {
        let layer = BoundaryLayer::neutral(&speed, &props, surface.input_height, inputs.latitude)?;
        (None, layer, None)
    };

    let dims = mesh.dims();
    let mut wind = VectorField::zeros(dims);
    let z = mesh.z();
    let ground = z.layer(0);
    let su = surface.u.data();
    let sv = surface.v.data();
    let obukhov = boundary_layer.obukhov_length.data();
    let abl = boundary_layer.abl_height.data();
    let VectorField { u, v, w } = &mut wind;

    u.par_layers_mut()
        .zip(v.par_layers_mut())
        .zip(w.par_layers_mut())
        .enumerate()
        .for_each(|(k, ((u, v), w))| {
            // Ground nodes stay exactly zero
            if k == 0 {
                return;
            }
            let zk = z.layer(k);
            for c in 0..u.len() {
                let agl = zk[c] - ground[c];
                let profile = WindProfile {
                    kind: inputs.profile,
                    input_speed: 1.0,
                    input_height: surface.input_height,
                    roughness_length: props.roughness_length,
                    roughness_height: props.roughness_height,
                    displacement_height: props.displacement_height,
                    obukhov_length: obukhov[c],
                    abl_height: abl[c],
                };
                let factor = profile.speed_at(agl);
                u[c] = su[c] * factor;
                v[c] = sv[c] * factor;
                if let Some(d) = &diurnal {
                    if agl - props.displacement_height < d.flow_height.data()[c] {
                        u[c] += d.u.data()[c];
                        v[c] += d.v.data()[c];
                        w[c] += d.w.data()[c];
                    }
                }
            }
        });

    if !wind.is_all_finite() {
        return Err(WindError::invalid_input(
            "initial wind field contains non-finite values",
        ));
    }
    debug!(
        max_speed = wind.max_speed(),
        diurnal = inputs.diurnal,
        "initial wind extended through {} layers",
        dims.nlayers
    );

    Ok(InitializedFields {
        wind,
        surface_speed: speed,
        cloud_cover: surface.cloud_cover,
        air_temperature: surface.air_temperature,
        boundary_layer,
        exposure,
        input_height: surface.input_height,
    })
}
