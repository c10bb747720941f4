//! Cell-centred 2-D rasters with ESRI ASCII grid I/O
//!
//! Row 0 is the southern row and column 0 the western column; the ESRI
//! file layout (northern row first) is flipped on read and write.

use crate::error::{WindError, WindResult};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

/// Default no-data marker written to ESRI grids
pub const DEFAULT_NODATA: f64 = -9999.0;

/// Georeferencing header of a raster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterHeader {
    pub ncols: usize,
    pub nrows: usize,
    /// Easting of the lower-left corner of the lower-left cell
    pub xll_corner: f64,
    /// Northing of the lower-left corner of the lower-left cell
    pub yll_corner: f64,
    pub cell_size: f64,
    pub nodata: f64,
    /// WKT projection string, carried through untouched
    #[serde(default)]
    pub projection: Option<String>,
}

impl RasterHeader {
    pub fn new(ncols: usize, nrows: usize, xll_corner: f64, yll_corner: f64, cell_size: f64) -> Self {
        RasterHeader {
            ncols,
            nrows,
            xll_corner,
            yll_corner,
            cell_size,
            nodata: DEFAULT_NODATA,
            projection: None,
        }
    }

    /// Width of the raster extent
    pub fn x_length(&self) -> f64 {
        self.ncols as f64 * self.cell_size
    }

    /// Height of the raster extent
    pub fn y_length(&self) -> f64 {
        self.nrows as f64 * self.cell_size
    }

    /// Centre of cell (i, j) in absolute coordinates
    pub fn cell_center(&self, i: usize, j: usize) -> (f64, f64) {
        (
            self.xll_corner + (j as f64 + 0.5) * self.cell_size,
            self.yll_corner + (i as f64 + 0.5) * self.cell_size,
        )
    }

    /// Whether an absolute point falls inside the raster extent
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.xll_corner
            && y >= self.yll_corner
            && x <= self.xll_corner + self.x_length()
            && y <= self.yll_corner + self.y_length()
    }

    /// Cell containing an absolute point
    pub fn cell_of(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        if !self.contains(x, y) {
            return None;
        }
        let j = ((x - self.xll_corner) / self.cell_size).floor() as usize;
        let i = ((y - self.yll_corner) / self.cell_size).floor() as usize;
        Some((i.min(self.nrows - 1), j.min(self.ncols - 1)))
    }

    fn validate(&self) -> WindResult<()> {
        if self.ncols == 0 || self.nrows == 0 {
            return Err(WindError::invalid_input("raster has no cells"));
        }
        if !(self.cell_size.is_finite() && self.cell_size > 0.0) {
            return Err(WindError::invalid_input(format!(
                "raster cell size {} must be positive",
                self.cell_size
            )));
        }
        Ok(())
    }
}

/// Resampling/interpolation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Interpolation {
    Nearest,
    Bilinear,
}

/// A value observed at a point, used for inverse-distance filling
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointSample {
    pub x: f64,
    pub y: f64,
    pub value: f64,
    /// Samples farther than this do not contribute
    pub radius: Option<f64>,
}

/// Inverse-distance weighted estimate at (x, y)
///
/// A sample exactly at the query point returns its value; `None` means no
/// sample is within its radius.
pub fn inverse_distance_at(x: f64, y: f64, samples: &[PointSample], power: f64) -> Option<f64> {
    let mut weight_sum = 0.0;
    let mut value_sum = 0.0;
    for s in samples {
        let dist = (x - s.x).hypot(y - s.y);
        if s.radius.is_some_and(|r| r > 0.0 && dist > r) {
            continue;
        }
        if dist == 0.0 {
            return Some(s.value);
        }
        let w = 1.0 / dist.powf(power);
        weight_sum += w;
        value_sum += w * s.value;
    }
    (weight_sum > 0.0).then(|| value_sum / weight_sum)
}

/// 2-D grid of cell-centred values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Raster {
    header: RasterHeader,
    /// Row-major, row 0 = south
    data: Vec<f64>,
}

impl Raster {
    /// Raster with every cell set to `value`
    ///
    /// # Errors
    /// Returns [`WindError::InvalidInput`] for an empty grid or bad cell size.
    pub fn filled(header: RasterHeader, value: f64) -> WindResult<Self> {
        header.validate()?;
        let data = vec![value; header.ncols * header.nrows];
        Ok(Raster { header, data })
    }

    /// Raster whose cells are `f(i, j)`
    ///
    /// # Errors
    /// Returns [`WindError::InvalidInput`] for an empty grid or bad cell size.
    pub fn from_fn(header: RasterHeader, f: impl Fn(usize, usize) -> f64 + Sync) -> WindResult<Self> {
        header.validate()?;
        let ncols = header.ncols;
        let mut data = vec![0.0; ncols * header.nrows];
        data.par_chunks_mut(ncols).enumerate().for_each(|(i, row)| {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = f(i, j);
            }
        });
        Ok(Raster { header, data })
    }

    /// Same georeferencing, new values
    ///
    /// # Errors
    /// Returns [`WindError::InvalidInput`] when `data` does not match the header.
    pub fn with_data(header: RasterHeader, data: Vec<f64>) -> WindResult<Self> {
        header.validate()?;
        if data.len() != header.ncols * header.nrows {
            return Err(WindError::invalid_input(format!(
                "raster data holds {} values, header describes {}x{}",
                data.len(),
                header.nrows,
                header.ncols
            )));
        }
        Ok(Raster { header, data })
    }

    #[inline]
    pub fn header(&self) -> &RasterHeader {
        &self.header
    }

    #[inline]
    pub fn nrows(&self) -> usize {
        self.header.nrows
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        self.header.ncols
    }

    #[inline]
    pub fn cell_size(&self) -> f64 {
        self.header.cell_size
    }

    /// Value of cell (i, j)
    ///
    /// # Panics
    /// Panics if (i, j) is outside the raster.
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        assert!(
            i < self.header.nrows && j < self.header.ncols,
            "cell ({i}, {j}) outside raster of {}x{}",
            self.header.nrows,
            self.header.ncols
        );
        self.data[i * self.header.ncols + j]
    }

    /// Set cell (i, j)
    ///
    /// # Panics
    /// Panics if (i, j) is outside the raster.
    #[inline]
    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        assert!(i < self.header.nrows && j < self.header.ncols);
        self.data[i * self.header.ncols + j] = value;
    }

    #[inline]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    #[inline]
    pub fn is_nodata(&self, value: f64) -> bool {
        value == self.header.nodata || !value.is_finite()
    }

    /// Largest valid value
    pub fn max_value(&self) -> Option<f64> {
        self.valid_values().max_by(f64::total_cmp)
    }

    /// Smallest valid value
    pub fn min_value(&self) -> Option<f64> {
        self.valid_values().min_by(f64::total_cmp)
    }

    /// Mean of valid values
    pub fn mean_value(&self) -> Option<f64> {
        let (sum, count) = self
            .valid_values()
            .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
        (count > 0).then(|| sum / count as f64)
    }

    pub fn has_nodata(&self) -> bool {
        self.data.iter().any(|v| self.is_nodata(*v))
    }

    fn valid_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.data.iter().copied().filter(|v| !self.is_nodata(*v))
    }

    /// Element-wise map preserving georeferencing
    pub fn map(&self, f: impl Fn(f64) -> f64 + Sync) -> Raster {
        Raster {
            header: self.header.clone(),
            data: self.data.par_iter().map(|v| f(*v)).collect(),
        }
    }

    /// Cell-wise combination of two rasters on the same grid
    ///
    /// # Errors
    /// Returns [`WindError::InvalidInput`] when the grids differ.
    pub fn zip_with(&self, other: &Raster, f: impl Fn(f64, f64) -> f64 + Sync) -> WindResult<Raster> {
        if self.header != other.header {
            return Err(WindError::invalid_input(format!(
                "raster grids differ: {}x{} vs {}x{}",
                self.header.nrows, self.header.ncols, other.header.nrows, other.header.ncols
            )));
        }
        Ok(Raster {
            header: self.header.clone(),
            data: self
                .data
                .par_iter()
                .zip(other.data.par_iter())
                .map(|(a, b)| f(*a, *b))
                .collect(),
        })
    }

    /// Nearest-cell value at an absolute point
    pub fn interpolate_nearest(&self, x: f64, y: f64) -> Option<f64> {
        let (i, j) = self.header.cell_of(x, y)?;
        let v = self.get(i, j);
        (!self.is_nodata(v)).then_some(v)
    }

    /// Bilinear value between cell centres at an absolute point
    ///
    /// Points in the half-cell ring outside the outermost centres are
    /// clamped to the edge. No-data neighbours are dropped and the remaining
    /// weights renormalised.
    pub fn interpolate_bilinear(&self, x: f64, y: f64) -> Option<f64> {
        if !self.header.contains(x, y) {
            return None;
        }
        let h = &self.header;
        let fx = ((x - h.xll_corner) / h.cell_size - 0.5).clamp(0.0, (h.ncols - 1) as f64);
        let fy = ((y - h.yll_corner) / h.cell_size - 0.5).clamp(0.0, (h.nrows - 1) as f64);
        let j0 = (fx.floor() as usize).min(h.ncols.saturating_sub(2));
        let i0 = (fy.floor() as usize).min(h.nrows.saturating_sub(2));
        let j1 = (j0 + 1).min(h.ncols - 1);
        let i1 = (i0 + 1).min(h.nrows - 1);
        let tx = fx - j0 as f64;
        let ty = fy - i0 as f64;

        let corners = [
            (i0, j0, (1.0 - tx) * (1.0 - ty)),
            (i0, j1, tx * (1.0 - ty)),
            (i1, j0, (1.0 - tx) * ty),
            (i1, j1, tx * ty),
        ];
        let mut weight = 0.0;
        let mut value = 0.0;
        for (i, j, w) in corners {
            let v = self.get(i, j);
            if !self.is_nodata(v) && w > 0.0 {
                weight += w;
                value += w * v;
            }
        }
        if weight > 0.0 {
            Some(value / weight)
        } else {
            self.interpolate_nearest(x, y)
        }
    }

    /// Interpolate at an absolute point with the given order
    pub fn interpolate(&self, x: f64, y: f64, method: Interpolation) -> Option<f64> {
        match method {
            Interpolation::Nearest => self.interpolate_nearest(x, y),
            Interpolation::Bilinear => self.interpolate_bilinear(x, y),
        }
    }

    /// Resample onto a new cell size covering at least the same extent
    ///
    /// # Errors
    /// Returns [`WindError::InvalidInput`] for a non-positive cell size.
    pub fn resample(&self, cell_size: f64, method: Interpolation) -> WindResult<Raster> {
        if !(cell_size.is_finite() && cell_size > 0.0) {
            return Err(WindError::invalid_input(format!(
                "resample cell size {cell_size} must be positive"
            )));
        }
        let ncols = ((self.header.x_length() / cell_size).ceil() as usize).max(2);
        let nrows = ((self.header.y_length() / cell_size).ceil() as usize).max(2);
        let header = RasterHeader {
            ncols,
            nrows,
            cell_size,
            ..self.header.clone()
        };
        let x_max = self.header.xll_corner + self.header.x_length();
        let y_max = self.header.yll_corner + self.header.y_length();
        let nodata = self.header.nodata;
        let resampled = Raster::from_fn(header.clone(), |i, j| {
            let (x, y) = header.cell_center(i, j);
            self.interpolate(x.min(x_max), y.min(y_max), method)
                .unwrap_or(nodata)
        })?;
        Ok(resampled)
    }

    /// Fill every cell by inverse-distance weighting of point samples
    ///
    /// Cells no sample reaches become no-data; the count of such cells is
    /// returned.
    pub fn fill_from_points(&mut self, samples: &[PointSample], power: f64) -> usize {
        let header = self.header.clone();
        let ncols = header.ncols;
        self.data
            .par_chunks_mut(ncols)
            .enumerate()
            .map(|(i, row)| {
                let mut unreached = 0;
                for (j, cell) in row.iter_mut().enumerate() {
                    let (x, y) = header.cell_center(i, j);
                    *cell = inverse_distance_at(x, y, samples, power).unwrap_or_else(|| {
                        unreached += 1;
                        header.nodata
                    });
                }
                unreached
            })
            .sum()
    }

    // ========================================================================
    // ESRI ASCII
    // ========================================================================

    /// Parse ESRI ASCII grid text; `origin` names the source in errors
    ///
    /// # Errors
    /// Returns [`WindError::Parse`] for malformed headers or values.
    pub fn parse_esri_ascii(text: &str, origin: &Path) -> WindResult<Raster> {
        let parse_err = |line: usize, message: String| WindError::Parse {
            path: origin.to_path_buf(),
            line,
            message,
        };

        let mut lines = text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()).peekable();
        let mut ncols = None;
        let mut nrows = None;
        let mut xll = None;
        let mut yll = None;
        let mut centered = false;
        let mut cell_size = None;
        let mut nodata = DEFAULT_NODATA;

        while let Some((line_no, line)) = lines.peek().copied() {
            let mut parts = line.split_whitespace();
            let Some(key) = parts.next() else { break };
            if key.parse::<f64>().is_ok() {
                break;
            }
            let value = parts
                .next()
                .ok_or_else(|| parse_err(line_no + 1, format!("header '{key}' has no value")))?;
            let number: f64 = value
                .parse()
                .map_err(|_| parse_err(line_no + 1, format!("header '{key}' value '{value}' is not a number")))?;
            match key.to_ascii_lowercase().as_str() {
                "ncols" => ncols = Some(number as usize),
                "nrows" => nrows = Some(number as usize),
                "xllcorner" => xll = Some(number),
                "yllcorner" => yll = Some(number),
                "xllcenter" => {
                    xll = Some(number);
                    centered = true;
                }
                "yllcenter" => {
                    yll = Some(number);
                    centered = true;
                }
                "cellsize" => cell_size = Some(number),
                "nodata_value" => nodata = number,
                other => return Err(parse_err(line_no + 1, format!("unknown header '{other}'"))),
            }
            lines.next();
        }

        let missing = |name: &str| parse_err(0, format!("missing header '{name}'"));
        let ncols = ncols.ok_or_else(|| missing("ncols"))?;
        let nrows = nrows.ok_or_else(|| missing("nrows"))?;
        let cell_size = cell_size.ok_or_else(|| missing("cellsize"))?;
        let mut xll = xll.ok_or_else(|| missing("xllcorner"))?;
        let mut yll = yll.ok_or_else(|| missing("yllcorner"))?;
        if centered {
            xll -= 0.5 * cell_size;
            yll -= 0.5 * cell_size;
        }

        let mut data = vec![nodata; ncols * nrows];
        let mut count = 0usize;
        for (line_no, line) in lines {
            for token in line.split_whitespace() {
                let value: f64 = token
                    .parse()
                    .map_err(|_| parse_err(line_no + 1, format!("value '{token}' is not a number")))?;
                if count >= ncols * nrows {
                    return Err(parse_err(line_no + 1, "more values than nrows*ncols".to_string()));
                }
                let file_row = count / ncols;
                let j = count % ncols;
                data[(nrows - 1 - file_row) * ncols + j] = value;
                count += 1;
            }
        }
        if count != ncols * nrows {
            return Err(parse_err(
                0,
                format!("expected {} values, found {count}", ncols * nrows),
            ));
        }

        let header = RasterHeader {
            ncols,
            nrows,
            xll_corner: xll,
            yll_corner: yll,
            cell_size,
            nodata,
            projection: None,
        };
        Raster::with_data(header, data)
    }

    /// Read an ESRI ASCII grid, picking up a sibling `.prj` file if present
    ///
    /// # Errors
    /// Returns [`WindError::Io`] or [`WindError::Parse`].
    pub fn read_esri_ascii(path: &Path) -> WindResult<Raster> {
        let text = fs::read_to_string(path).map_err(|e| WindError::io(path, e))?;
        let mut raster = Self::parse_esri_ascii(&text, path)?;
        let prj = path.with_extension("prj");
        if prj.is_file() {
            let wkt = fs::read_to_string(&prj).map_err(|e| WindError::io(&prj, e))?;
            raster.header.projection = Some(wkt.trim().to_string());
        }
        Ok(raster)
    }

    /// Render as ESRI ASCII grid text
    pub fn to_esri_ascii(&self, precision: usize) -> String {
        let h = &self.header;
        let mut out = String::with_capacity(h.ncols * h.nrows * (precision + 4) + 128);
        let _ = writeln!(out, "ncols        {}", h.ncols);
        let _ = writeln!(out, "nrows        {}", h.nrows);
        let _ = writeln!(out, "xllcorner    {}", h.xll_corner);
        let _ = writeln!(out, "yllcorner    {}", h.yll_corner);
        let _ = writeln!(out, "cellsize     {}", h.cell_size);
        let _ = writeln!(out, "NODATA_value {}", h.nodata);
        for i in (0..h.nrows).rev() {
            let row = &self.data[i * h.ncols..(i + 1) * h.ncols];
            for (j, v) in row.iter().enumerate() {
                if j > 0 {
                    out.push(' ');
                }
                let _ = write!(out, "{v:.precision$}");
            }
            out.push('\n');
        }
        out
    }

    /// Write an ESRI ASCII grid (and `.prj` when a projection is known)
    ///
    /// # Errors
    /// Returns [`WindError::Io`] when the file cannot be written.
    pub fn write_esri_ascii(&self, path: &Path, precision: usize) -> WindResult<()> {
        fs::write(path, self.to_esri_ascii(precision)).map_err(|e| WindError::io(path, e))?;
        if let Some(wkt) = &self.header.projection {
            let prj = path.with_extension("prj");
            fs::write(&prj, wkt).map_err(|e| WindError::io(&prj, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp() -> Raster {
        // value = 10 * i + j
        Raster::from_fn(RasterHeader::new(4, 3, 1000.0, 2000.0, 10.0), |i, j| {
            10.0 * i as f64 + j as f64
        })
        .unwrap()
    }

    #[test]
    fn test_esri_rows_flip_to_south_first() {
        let text = "ncols 2\nnrows 2\nxllcorner 0\nyllcorner 0\ncellsize 5\nNODATA_value -9999\n1 2\n3 4\n";
        let raster = Raster::parse_esri_ascii(text, Path::new("mem.asc")).unwrap();
        // First file row is the northern row
        assert_eq!(raster.get(1, 0), 1.0);
        assert_eq!(raster.get(0, 0), 3.0);
        assert_eq!(raster.get(0, 1), 4.0);

        let reparsed = Raster::parse_esri_ascii(&raster.to_esri_ascii(3), Path::new("mem.asc")).unwrap();
        assert_eq!(reparsed, raster);
    }

    #[test]
    fn test_esri_center_header_and_errors() {
        let text = "ncols 1\nnrows 1\nxllcenter 2.5\nyllcenter 2.5\ncellsize 5\n7\n";
        let raster = Raster::parse_esri_ascii(text, Path::new("c.asc")).unwrap();
        assert_relative_eq!(raster.header().xll_corner, 0.0);

        let short = "ncols 2\nnrows 2\nxllcorner 0\nyllcorner 0\ncellsize 5\n1 2 3\n";
        match Raster::parse_esri_ascii(short, Path::new("short.asc")) {
            Err(WindError::Parse { message, .. }) => assert!(message.contains("expected 4")),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_bilinear_between_centres() {
        let r = ramp();
        // Halfway between the centres of (0,0) and (1,1)
        let (x0, y0) = r.header().cell_center(0, 0);
        let v = r.interpolate_bilinear(x0 + 5.0, y0 + 5.0).unwrap();
        assert_relative_eq!(v, 5.5, epsilon = 1e-12);
        // Exactly on a centre
        let (x, y) = r.header().cell_center(2, 3);
        assert_relative_eq!(r.interpolate_bilinear(x, y).unwrap(), 23.0, epsilon = 1e-12);
        // Outside the extent
        assert!(r.interpolate_bilinear(999.0, 2010.0).is_none());
    }

    #[test]
    fn test_nearest_and_stats() {
        let r = ramp();
        assert_eq!(r.interpolate_nearest(1012.0, 2021.0), Some(21.0));
        assert_eq!(r.max_value(), Some(23.0));
        assert_eq!(r.min_value(), Some(0.0));
    }

    #[test]
    fn test_idw_respects_radius_and_exact_hits() {
        let samples = [
            PointSample { x: 0.0, y: 0.0, value: 2.0, radius: None },
            PointSample { x: 10.0, y: 0.0, value: 4.0, radius: Some(3.0) },
        ];
        assert_eq!(inverse_distance_at(0.0, 0.0, &samples, 1.0), Some(2.0));
        // Second sample out of reach
        assert_eq!(inverse_distance_at(5.0, 0.0, &samples, 1.0), Some(2.0));
        let near = inverse_distance_at(8.0, 0.0, &samples, 1.0).unwrap();
        assert!(near > 3.0 && near < 4.0);

        let bounded = [PointSample { x: 0.0, y: 0.0, value: 1.0, radius: Some(1.0) }];
        assert_eq!(inverse_distance_at(5.0, 5.0, &bounded, 1.0), None);
    }

    #[test]
    fn test_fill_from_points_counts_unreached() {
        let mut r = Raster::filled(RasterHeader::new(5, 5, 0.0, 0.0, 10.0), 0.0).unwrap();
        let samples = [PointSample { x: 5.0, y: 5.0, value: 3.0, radius: Some(1.0) }];
        let unreached = r.fill_from_points(&samples, 1.0);
        assert_eq!(unreached, 24);
        assert_eq!(r.get(0, 0), 3.0);
        assert!(r.is_nodata(r.get(4, 4)));
    }

    #[test]
    fn test_resample_coarser_covers_extent() {
        let r = ramp();
        let coarse = r.resample(20.0, Interpolation::Nearest).unwrap();
        assert_eq!(coarse.ncols(), 2);
        assert_eq!(coarse.nrows(), 2);
        assert!(!coarse.has_nodata());
    }
}
