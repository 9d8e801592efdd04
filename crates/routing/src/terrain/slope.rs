//! Slope from a DEM
//!
//! Rate of change of elevation by the Horn (1981) method, computed over
//! each cell's 3x3 neighborhood.

use crate::maybe_rayon::*;
use ndarray::Array2;
use routedem_core::raster::Raster;
use routedem_core::{Algorithm, Error, Result};

/// Units for slope output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlopeUnits {
    /// Degrees (0-90)
    #[default]
    Degrees,
    /// Percent rise (100 at 45 degrees)
    Percent,
    /// Radians (0-π/2)
    Radians,
}

/// Parameters for slope calculation
#[derive(Debug, Clone)]
pub struct SlopeParams {
    /// Output units
    pub units: SlopeUnits,
    /// Horizontal unit scale (use ~111320 for lat/lon DEMs with meter
    /// elevations)
    pub z_factor: f64,
}

impl Default for SlopeParams {
    fn default() -> Self {
        Self {
            units: SlopeUnits::Degrees,
            z_factor: 1.0,
        }
    }
}

/// Slope algorithm
#[derive(Debug, Clone, Default)]
pub struct Slope;

impl Algorithm for Slope {
    type Input = Raster<f64>;
    type Output = Raster<f64>;
    type Params = SlopeParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Slope"
    }

    fn description(&self) -> &'static str {
        "Calculate slope (rate of change of elevation) from a DEM using Horn's method"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        slope(&input, params)
    }
}

/// Calculate slope from a DEM.
///
/// Horn's method weights the 3x3 neighborhood
/// ```text
/// a b c
/// d e f
/// g h i
/// ```
/// as dz/dx = ((c + 2f + i) - (a + 2d + g)) / (8 * cellsize) and
/// dz/dy = ((g + 2h + i) - (a + 2b + c)) / (8 * cellsize), with
/// slope = atan(sqrt(dz/dx² + dz/dy²)).
///
/// Grid edges and cells with nodata anywhere in the neighborhood come out
/// as NaN.
pub fn slope(dem: &Raster<f64>, params: SlopeParams) -> Result<Raster<f64>> {
    let (rows, cols) = dem.shape();
    let nodata = dem.nodata();
    let eight_cell_size = 8.0 * dem.cell_size() * params.z_factor;

    let is_nodata =
        |v: f64| v.is_nan() || nodata.map_or(false, |nd| (v - nd).abs() < f64::EPSILON);

    let output_data: Vec<f64> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![f64::NAN; cols];

            // Edge rows have no full neighborhood
            if row == 0 || row + 1 == rows {
                return row_data;
            }

            for col in 1..cols.saturating_sub(1) {
                let center = unsafe { dem.get_unchecked(row, col) };
                if is_nodata(center) {
                    continue;
                }

                let window = [
                    unsafe { dem.get_unchecked(row - 1, col - 1) }, // a
                    unsafe { dem.get_unchecked(row - 1, col) },     // b
                    unsafe { dem.get_unchecked(row - 1, col + 1) }, // c
                    unsafe { dem.get_unchecked(row, col - 1) },     // d
                    unsafe { dem.get_unchecked(row, col + 1) },     // f
                    unsafe { dem.get_unchecked(row + 1, col - 1) }, // g
                    unsafe { dem.get_unchecked(row + 1, col) },     // h
                    unsafe { dem.get_unchecked(row + 1, col + 1) }, // i
                ];
                if window.iter().any(|&v| is_nodata(v)) {
                    continue;
                }
                let [a, b, c, d, f, g, h, i] = window;

                let dz_dx = ((c + 2.0 * f + i) - (a + 2.0 * d + g)) / eight_cell_size;
                let dz_dy = ((g + 2.0 * h + i) - (a + 2.0 * b + c)) / eight_cell_size;
                let slope_rad = (dz_dx * dz_dx + dz_dy * dz_dy).sqrt().atan();

                row_data[col] = match params.units {
                    SlopeUnits::Degrees => slope_rad.to_degrees(),
                    SlopeUnits::Percent => slope_rad.tan() * 100.0,
                    SlopeUnits::Radians => slope_rad,
                };
            }

            row_data
        })
        .collect();

    let mut output = dem.with_same_meta::<f64>(rows, cols);
    output.set_nodata(Some(f64::NAN));
    *output.data_mut() = Array2::from_shape_vec((rows, cols), output_data)
        .map_err(|e| Error::Other(e.to_string()))?;

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use routedem_core::GeoTransform;

    /// Tilted plane z = row + col: both partials are exactly 1
    fn tilted_dem() -> Raster<f64> {
        let mut dem = Raster::new(10, 10);
        dem.set_transform(GeoTransform::new(0.0, 10.0, 1.0, -1.0));
        for row in 0..10 {
            for col in 0..10 {
                dem.set(row, col, (row + col) as f64).unwrap();
            }
        }
        dem
    }

    #[test]
    fn test_slope_flat() {
        let mut dem: Raster<f64> = Raster::filled(10, 10, 100.0);
        dem.set_transform(GeoTransform::new(0.0, 10.0, 1.0, -1.0));

        let result = slope(&dem, SlopeParams::default()).unwrap();

        let val = result.get(5, 5).unwrap();
        assert!(val.abs() < 1e-9, "Expected zero slope on a flat surface, got {}", val);
    }

    #[test]
    fn test_slope_tilted_exact() {
        let dem = tilted_dem();

        let pct = slope(&dem, SlopeParams { units: SlopeUnits::Percent, z_factor: 1.0 })
            .unwrap();
        let deg = slope(&dem, SlopeParams::default()).unwrap();

        // Gradient magnitude is sqrt(1^2 + 1^2)
        assert_relative_eq!(pct.get(4, 6).unwrap(), 100.0 * 2f64.sqrt(), epsilon = 1e-9);
        assert_relative_eq!(
            deg.get(4, 6).unwrap(),
            2f64.sqrt().atan().to_degrees(),
            epsilon = 1e-9
        );

        // Constant gradient means uniform slope everywhere inside
        assert_relative_eq!(
            pct.get(1, 1).unwrap(),
            pct.get(8, 8).unwrap(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_slope_unit_conversions() {
        let dem = tilted_dem();

        let deg = slope(&dem, SlopeParams { units: SlopeUnits::Degrees, z_factor: 1.0 }).unwrap();
        let rad = slope(&dem, SlopeParams { units: SlopeUnits::Radians, z_factor: 1.0 }).unwrap();
        let pct = slope(&dem, SlopeParams { units: SlopeUnits::Percent, z_factor: 1.0 }).unwrap();

        let rad_val = rad.get(5, 5).unwrap();
        assert_relative_eq!(deg.get(5, 5).unwrap(), rad_val.to_degrees(), epsilon = 1e-9);
        assert_relative_eq!(pct.get(5, 5).unwrap(), rad_val.tan() * 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_slope_z_factor_scales_gradient() {
        let dem = tilted_dem();

        let pct = slope(&dem, SlopeParams { units: SlopeUnits::Percent, z_factor: 2.0 })
            .unwrap();

        assert_relative_eq!(pct.get(5, 5).unwrap(), 50.0 * 2f64.sqrt(), epsilon = 1e-9);
    }

    #[test]
    fn test_slope_edges_and_nodata_are_nan() {
        let mut dem = tilted_dem();
        dem.set_nodata(Some(-9999.0));
        dem.set(5, 5, -9999.0).unwrap();

        let result = slope(&dem, SlopeParams::default()).unwrap();

        assert!(result.get(0, 4).unwrap().is_nan(), "Edge cells have no slope");
        assert!(result.get(4, 9).unwrap().is_nan(), "Edge cells have no slope");
        assert!(result.get(5, 5).unwrap().is_nan(), "Nodata cell has no slope");
        assert!(
            result.get(5, 6).unwrap().is_nan(),
            "Nodata in the neighborhood poisons the cell"
        );
        assert!(
            !result.get(3, 3).unwrap().is_nan(),
            "Cells away from nodata still get a slope"
        );
    }
}
