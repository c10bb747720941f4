//! Output surfaces at a fixed height above the vegetation

use crate::atmosphere::{BoundaryLayer, ProfileKind, SurfaceProperties, WindProfile};
use crate::core_types::uv_to_speed_direction;
use crate::error::{WindError, WindResult};
use crate::grid::{Mesh, Raster, VectorField};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Decimal places written to output grids
const OUTPUT_PRECISION: usize = 2;

/// Horizontal speed and meteorological direction on the mesh footprint
#[derive(Debug, Clone)]
pub struct WindOutput {
    /// Horizontal speed (m/s)
    pub speed: Raster,
    /// Direction the wind blows from (degrees)
    pub direction: Raster,
    /// Height above the roughness elements (m)
    pub height: f64,
}

impl WindOutput {
    /// Calm grids for a run that never solved
    ///
    /// # Errors
    /// Propagates raster construction errors.
    pub fn calm(mesh: &Mesh, height: f64) -> WindResult<Self> {
        Ok(WindOutput {
            speed: mesh.column_raster(0.0)?,
            direction: mesh.column_raster(0.0)?,
            height,
        })
    }

    /// Slice `wind` at `height` above the roughness elements
    ///
    /// Inside the first cell the components follow the surface-layer profile
    /// anchored at the first node; above it they are interpolated linearly
    /// between the bracketing nodes.
    ///
    /// # Errors
    /// Returns [`WindError::InvalidInput`] when the field does not match the
    /// mesh or the height lies above the domain top.
    pub fn from_field(
        mesh: &Mesh,
        wind: &VectorField,
        boundary_layer: &BoundaryLayer,
        surface: &SurfaceProperties,
        height: f64,
    ) -> WindResult<Self> {
        let dims = mesh.dims();
        if wind.dims() != dims {
            return Err(WindError::invalid_input("wind field does not match the mesh"));
        }
        mesh.check_column_raster(&boundary_layer.obukhov_length)?;
        let target = height + surface.roughness_height;
        let z = mesh.z();
        let ground = z.layer(0);

        let columns: Vec<(f64, f64)> = (0..dims.layer_len())
            .into_par_iter()
            .map(|c| {
                let agl = |k: usize| z.layer(k)[c] - ground[c];
                let at = |k: usize| (wind.u.layer(k)[c], wind.v.layer(k)[c]);
                let k = (1..dims.nlayers).find(|&k| agl(k) >= target).ok_or_else(|| {
                    WindError::invalid_input(format!(
                        "output height {height} m lies above the domain top"
                    ))
                })?;
                let (h1, h2) = (agl(k - 1), agl(k));
                if k == 1 {
                    let (u1, v1) = at(1);
                    let profile = WindProfile {
                        kind: ProfileKind::MoninObukhov,
                        input_speed: 1.0,
                        input_height: h2 - surface.roughness_height,
                        roughness_length: surface.roughness_length,
                        roughness_height: surface.roughness_height,
                        displacement_height: surface.displacement_height,
                        obukhov_length: boundary_layer.obukhov_length.data()[c],
                        abl_height: boundary_layer.abl_height.data()[c],
                    };
                    let factor = profile.speed_at(target);
                    Ok(uv_to_speed_direction(u1 * factor, v1 * factor))
                } else {
                    let t = (target - h1) / (h2 - h1);
                    let ((ua, va), (ub, vb)) = (at(k - 1), at(k));
                    Ok(uv_to_speed_direction(ua + t * (ub - ua), va + t * (vb - va)))
                }
            })
            .collect::<WindResult<_>>()?;

        let (speed, direction): (Vec<f64>, Vec<f64>) = columns.into_iter().unzip();
        let header = mesh.dem().header().clone();
        Ok(WindOutput {
            speed: Raster::with_data(header.clone(), speed)?,
            direction: Raster::with_data(header, direction)?,
            height,
        })
    }

    /// Write `<stem>_vel.asc` and `<stem>_ang.asc` into `dir`
    ///
    /// The pair is written together or not at all: when the direction grid
    /// fails, the speed grid (and its `.prj`) is removed again.
    ///
    /// # Errors
    /// Returns [`WindError::Io`] when the directory or a grid cannot be written.
    pub fn write_esri_ascii(&self, dir: &Path, stem: &str) -> WindResult<(PathBuf, PathBuf)> {
        fs::create_dir_all(dir).map_err(|e| WindError::io(dir, e))?;
        let speed_path = dir.join(format!("{stem}_vel.asc"));
        let direction_path = dir.join(format!("{stem}_ang.asc"));

        self.speed.write_esri_ascii(&speed_path, OUTPUT_PRECISION)?;
        if let Err(e) = self.direction.write_esri_ascii(&direction_path, OUTPUT_PRECISION) {
            for partial in [&speed_path, &direction_path] {
                let _ = fs::remove_file(partial);
                let _ = fs::remove_file(partial.with_extension("prj"));
            }
            warn!(dir = %dir.display(), stem, error = %e, "output grids not written");
            return Err(e);
        }

        info!(
            speed = %speed_path.display(),
            direction = %direction_path.display(),
            "output grids written"
        );
        Ok((speed_path, direction_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atmosphere::Vegetation;
    use crate::grid::{terrain, MeshConfig, MeshResolution};
    use approx::assert_relative_eq;

    fn mesh() -> Mesh {
        let dem = terrain::flat(5, 5, 100.0, 300.0).unwrap();
        let config = MeshConfig {
            resolution: MeshResolution::Custom(100.0),
            vertical_layers: 10,
            ..MeshConfig::default()
        };
        Mesh::build_standard(&dem, &config).unwrap()
    }

    fn neutral_layer(mesh: &Mesh) -> BoundaryLayer {
        let speed = mesh.column_raster(5.0).unwrap();
        BoundaryLayer::neutral(&speed, &Vegetation::Grass.surface(), 10.0, 45.0).unwrap()
    }

    /// Fresh scratch directory under the system temp dir
    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("windfield-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_write_places_both_grids() {
        let mesh = mesh();
        let out = WindOutput::calm(&mesh, 10.0).unwrap();
        let dir = scratch_dir("write-ok");
        let (speed, direction) = out.write_esri_ascii(&dir, "calm").unwrap();
        assert_eq!(speed, dir.join("calm_vel.asc"));
        assert_eq!(direction, dir.join("calm_ang.asc"));
        assert!(speed.is_file());
        assert!(direction.is_file());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_failed_direction_write_leaves_no_speed_grid() {
        let mesh = mesh();
        let out = WindOutput::calm(&mesh, 10.0).unwrap();
        let dir = scratch_dir("write-fail");
        // A directory squatting on the direction path makes that write fail
        fs::create_dir_all(dir.join("blocked_ang.asc").join("inner")).unwrap();

        let result = out.write_esri_ascii(&dir, "blocked");
        assert!(matches!(result, Err(WindError::Io { .. })));
        assert!(!dir.join("blocked_vel.asc").exists());
        assert!(dir.join("blocked_ang.asc").is_dir());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_uniform_field_above_first_cell_is_exact() {
        let mesh = mesh();
        let mut wind = VectorField::zeros(mesh.dims());
        wind.u.fill(3.0);
        wind.v.fill(-4.0);
        let height = 0.5 * (mesh.agl(2, 2, 2) + mesh.agl(2, 2, 3));
        let out = WindOutput::from_field(&mesh, &wind, &neutral_layer(&mesh), &Vegetation::Grass.surface(), height)
            .unwrap();
        assert_relative_eq!(out.speed.get(2, 2), 5.0, epsilon = 1e-12);
        // Blowing toward the south-east, so from the north-west
        assert_relative_eq!(out.direction.get(2, 2), 323.130_102_354_155_96, epsilon = 1e-9);
    }

    #[test]
    fn test_linear_between_layers() {
        let mesh = mesh();
        let dims = mesh.dims();
        let mut wind = VectorField::zeros(dims);
        for idx in 0..dims.len() {
            let (i, j, k) = dims.coords(idx);
            wind.u.as_mut_slice()[idx] = mesh.agl(i, j, k);
        }
        let (h2, h3) = (mesh.agl(1, 1, 2), mesh.agl(1, 1, 3));
        let height = 0.5 * (h2 + h3);
        let out = WindOutput::from_field(&mesh, &wind, &neutral_layer(&mesh), &Vegetation::Grass.surface(), height)
            .unwrap();
        assert_relative_eq!(out.speed.get(1, 1), height, epsilon = 1e-9);
        assert_relative_eq!(out.direction.get(1, 1), 270.0, epsilon = 1e-9);
    }

    #[test]
    fn test_first_cell_uses_surface_profile() {
        let mesh = mesh();
        let first = mesh.agl(0, 0, 1);
        let mut wind = VectorField::zeros(mesh.dims());
        wind.u.fill(4.0);
        let out = WindOutput::from_field(
            &mesh,
            &wind,
            &neutral_layer(&mesh),
            &Vegetation::Grass.surface(),
            first * 0.5,
        )
        .unwrap();
        let expected = 4.0 * (0.5 * first / 0.01).ln() / (first / 0.01).ln();
        assert_relative_eq!(out.speed.get(0, 0), expected, epsilon = 1e-9);
        assert!(out.speed.get(0, 0) < 4.0);
    }

    #[test]
    fn test_height_above_domain_is_rejected() {
        let mesh = mesh();
        let wind = VectorField::zeros(mesh.dims());
        let top = mesh.domain_top() - mesh.ground(0, 0);
        let err = WindOutput::from_field(
            &mesh,
            &wind,
            &neutral_layer(&mesh),
            &Vegetation::Grass.surface(),
            top + 10.0,
        )
        .unwrap_err();
        assert!(matches!(err, WindError::InvalidInput { .. }));
    }
}
