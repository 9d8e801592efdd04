//! Priority-Flood pit filling
//!
//! Removes depressions from a DEM so that every cell has a monotone
//! downhill path to the raster edge. Cells inside a depression are raised
//! exactly to the level of the depression's lowest outlet; everything else
//! is returned untouched, so a depression-free DEM
//! comes back value-identical.
//!
//! Uses a priority queue (min-heap) seeded from the DEM boundary and
//! processes cells in elevation order, visiting each cell at most once.
//!
//! Reference:
//! Barnes, R., Lehman, C., & Mulla, D. (2014). Priority-Flood: An optimal
//! depression-filling and watershed-labeling algorithm for digital elevation
//! models. *Computers & Geosciences*, 62, 117–127.

use ndarray::Array2;
use routedem_core::raster::Raster;
use routedem_core::{Algorithm, Error, Result};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A cell in the priority queue, ordered by elevation (min-heap via Reverse).
#[derive(Debug, Clone)]
struct Cell {
    elevation: f64,
    row: usize,
    col: usize,
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.elevation == other.elevation
    }
}

impl Eq for Cell {}

// Reverse ordering so BinaryHeap (max-heap) acts as a min-heap
impl PartialOrd for Cell {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cell {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse: lower elevation has higher priority
        other
            .elevation
            .partial_cmp(&self.elevation)
            .unwrap_or(Ordering::Equal)
    }
}

/// D8 neighbor offsets
const D8_OFFSETS: [(isize, isize); 8] = [
    (-1, -1), (-1, 0), (-1, 1),
    (0, -1),           (0, 1),
    (1, -1),  (1, 0),  (1, 1),
];

/// Parameters for pit filling
#[derive(Debug, Clone)]
pub struct FillPitsParams {
    /// Minimum elevation increment to enforce between cells.
    /// 0.0 fills depressions to perfectly flat pools at the outlet level.
    /// A small positive value (e.g. 1e-5) imposes a drainage gradient
    /// across filled areas instead.
    pub epsilon: f64,
}

impl Default for FillPitsParams {
    fn default() -> Self {
        Self { epsilon: 0.0 }
    }
}

/// Pit filling algorithm
#[derive(Debug, Clone, Default)]
pub struct FillPits;

impl Algorithm for FillPits {
    type Input = Raster<f64>;
    type Output = Raster<f64>;
    type Params = FillPitsParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Fill Pits"
    }

    fn description(&self) -> &'static str {
        "Fill depressions using Priority-Flood (Barnes 2014)"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        fill_pits(&input, params)
    }
}

/// Fill depressions in a DEM using the Priority-Flood algorithm.
///
/// # Algorithm
/// 1. Mark nodata cells visited and copy them through unchanged
/// 2. Seed a min-heap with all border cells
/// 3. Pop the lowest cell; raise each unvisited neighbor to at least
///    the popped elevation plus epsilon, push it
/// 4. Repeat until the heap is empty
///
/// With the default `epsilon = 0.0` a depression rises exactly to its
/// lowest outlet level and nothing else changes.
///
/// # Arguments
/// * `dem` - Input DEM raster
/// * `params` - Fill parameters (epsilon for gradient enforcement)
///
/// # Returns
/// A new raster with all depressions filled
pub fn fill_pits(dem: &Raster<f64>, params: FillPitsParams) -> Result<Raster<f64>> {
    let (rows, cols) = dem.shape();
    let nodata = dem.nodata();
    let epsilon = params.epsilon;

    let mut output = Array2::<f64>::from_elem((rows, cols), f64::NAN);
    let mut visited = Array2::<bool>::from_elem((rows, cols), false);
    let mut heap = BinaryHeap::new();

    // Seed the priority queue with border cells; nodata anywhere passes through
    for row in 0..rows {
        for col in 0..cols {
            let val = unsafe { dem.get_unchecked(row, col) };

            let is_nd = val.is_nan()
                || nodata.map_or(false, |nd| (val - nd).abs() < f64::EPSILON);

            if is_nd {
                visited[(row, col)] = true;
                output[(row, col)] = val;
                continue;
            }

            if row == 0 || row == rows - 1 || col == 0 || col == cols - 1 {
                heap.push(Cell { elevation: val, row, col });
                visited[(row, col)] = true;
                output[(row, col)] = val;
            }
        }
    }

    // Process cells in order of increasing elevation
    while let Some(cell) = heap.pop() {
        for &(dr, dc) in &D8_OFFSETS {
            let nr = cell.row as isize + dr;
            let nc = cell.col as isize + dc;

            if nr < 0 || nc < 0 || (nr as usize) >= rows || (nc as usize) >= cols {
                continue;
            }

            let nr = nr as usize;
            let nc = nc as usize;

            if visited[(nr, nc)] {
                continue;
            }

            visited[(nr, nc)] = true;

            let neighbor_elev = unsafe { dem.get_unchecked(nr, nc) };

            let is_nd = neighbor_elev.is_nan()
                || nodata.map_or(false, |nd| (neighbor_elev - nd).abs() < f64::EPSILON);

            if is_nd {
                output[(nr, nc)] = neighbor_elev;
                continue;
            }

            // A neighbor below the spill level gets raised to it,
            // anything higher keeps its own elevation
            let filled_elev = if neighbor_elev < cell.elevation + epsilon {
                cell.elevation + epsilon
            } else {
                neighbor_elev
            };

            output[(nr, nc)] = filled_elev;
            heap.push(Cell {
                elevation: filled_elev,
                row: nr,
                col: nc,
            });
        }
    }

    let mut result = dem.with_same_meta::<f64>(rows, cols);
    result.set_nodata(dem.nodata());
    *result.data_mut() = output;

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use routedem_core::GeoTransform;

    fn create_dem_with_sink() -> Raster<f64> {
        // 7x7 DEM with a depression in the center
        let mut dem = Raster::new(7, 7);
        dem.set_transform(GeoTransform::new(0.0, 7.0, 1.0, -1.0));

        let values = [
            9.0, 9.0, 9.0, 9.0, 9.0, 9.0, 9.0,
            9.0, 8.0, 8.0, 8.0, 8.0, 8.0, 9.0,
            9.0, 8.0, 7.0, 7.0, 7.0, 8.0, 9.0,
            9.0, 8.0, 7.0, 3.0, 7.0, 8.0, 9.0,
            9.0, 8.0, 7.0, 7.0, 7.0, 8.0, 9.0,
            9.0, 8.0, 8.0, 8.0, 8.0, 8.0, 9.0,
            9.0, 9.0, 9.0, 9.0, 9.0, 9.0, 9.0,
        ];

        for (idx, &val) in values.iter().enumerate() {
            dem.set(idx / 7, idx % 7, val).unwrap();
        }

        dem
    }

    #[test]
    fn test_fill_pits_raises_sink_to_outlet_level() {
        let dem = create_dem_with_sink();
        let filled = fill_pits(&dem, FillPitsParams::default()).unwrap();

        // The center cell (3,3) had value 3.0 inside a ring at 7.0.
        // Flat filling raises it exactly to the spill level.
        let center = filled.get(3, 3).unwrap();
        assert_eq!(center, 7.0, "Sink at (3,3) should fill to 7.0, got {}", center);
    }

    #[test]
    fn test_fill_pits_preserves_border() {
        let dem = create_dem_with_sink();
        let filled = fill_pits(&dem, FillPitsParams::default()).unwrap();

        assert_eq!(filled.get(0, 0).unwrap(), 9.0);
        assert_eq!(filled.get(0, 3).unwrap(), 9.0);
        assert_eq!(filled.get(6, 6).unwrap(), 9.0);
    }

    #[test]
    fn test_fill_pits_identity_on_clean_dem() {
        // Sloped plane: no sinks, output must equal input exactly
        let mut dem = Raster::new(10, 10);
        dem.set_transform(GeoTransform::new(0.0, 10.0, 1.0, -1.0));

        for row in 0..10 {
            for col in 0..10 {
                dem.set(row, col, (row + col) as f64).unwrap();
            }
        }

        let filled = fill_pits(&dem, FillPitsParams::default()).unwrap();

        for row in 0..10 {
            for col in 0..10 {
                let orig = dem.get(row, col).unwrap();
                let fill = filled.get(row, col).unwrap();
                assert_eq!(
                    fill, orig,
                    "Clean DEM must be unchanged at ({}, {}): orig={}, fill={}",
                    row, col, orig, fill
                );
            }
        }
    }

    #[test]
    fn test_fill_pits_with_epsilon_creates_gradient() {
        let dem = create_dem_with_sink();
        let filled = fill_pits(&dem, FillPitsParams { epsilon: 0.01 }).unwrap();

        // With epsilon > 0 the filled pool drains: the deeper cell ends up
        // slightly above the rim cells it fills through
        let center = filled.get(3, 3).unwrap();
        assert!(
            center > 7.0,
            "Epsilon fill should raise the sink above the rim, got {}",
            center
        );
    }

    #[test]
    fn test_fill_pits_never_lowers_elevation() {
        let dem = create_dem_with_sink();
        let filled = fill_pits(&dem, FillPitsParams::default()).unwrap();

        let (rows, cols) = dem.shape();
        for row in 0..rows {
            for col in 0..cols {
                let orig = dem.get(row, col).unwrap();
                let fill = filled.get(row, col).unwrap();
                if !orig.is_nan() && !fill.is_nan() {
                    assert!(
                        fill >= orig,
                        "Filling must never lower elevation at ({}, {}): orig={}, fill={}",
                        row, col, orig, fill
                    );
                }
            }
        }
    }

    #[test]
    fn test_fill_pits_outlet_respects_low_saddle() {
        // 5x5 DEM: border=10 except outlet at (4,2)=2, interior=5, sink at (2,2)=1.
        // The lowest escape path crosses the interior at 5.0 before reaching
        // the low outlet, so the sink fills exactly to 5.0.
        let mut dem = Raster::new(5, 5);
        dem.set_transform(GeoTransform::new(0.0, 5.0, 1.0, -1.0));

        for row in 0..5 {
            for col in 0..5 {
                let is_border = row == 0 || row == 4 || col == 0 || col == 4;
                dem.set(row, col, if is_border { 10.0 } else { 5.0 }).unwrap();
            }
        }
        dem.set(2, 2, 1.0).unwrap(); // Sink
        dem.set(4, 2, 2.0).unwrap(); // Low outlet on border

        let filled = fill_pits(&dem, FillPitsParams::default()).unwrap();

        let center = filled.get(2, 2).unwrap();
        assert_eq!(
            center, 5.0,
            "Sink should fill to the saddle level 5.0, got {}",
            center
        );
    }

    #[test]
    fn test_fill_pits_passes_nodata_through() {
        let mut dem = create_dem_with_sink();
        dem.set_nodata(Some(-1.0));
        dem.set(1, 1, -1.0).unwrap();
        dem.set(5, 5, f64::NAN).unwrap();

        let filled = fill_pits(&dem, FillPitsParams::default()).unwrap();

        assert_eq!(filled.get(1, 1).unwrap(), -1.0, "Nodata value must be preserved");
        assert!(filled.get(5, 5).unwrap().is_nan(), "NaN cell must be preserved");
        assert_eq!(filled.nodata(), Some(-1.0), "Nodata marker must carry over");
    }
}
