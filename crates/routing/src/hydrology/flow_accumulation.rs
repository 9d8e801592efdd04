//! D8 flow accumulation
//!
//! Counts the upstream cells draining through each cell of a D8 flow
//! direction grid. The count is the upstream contributing area in cells;
//! headwater cells carry 0.

use ndarray::Array2;
use routedem_core::raster::Raster;
use routedem_core::{Algorithm, Error, Result};

/// D8 neighbor offsets matching flow direction encoding (1=E, 2=NE, ..., 8=SE)
const D8_OFFSETS: [(isize, isize); 8] = [
    (0, 1),   // 1: E
    (-1, 1),  // 2: NE
    (-1, 0),  // 3: N
    (-1, -1), // 4: NW
    (0, -1),  // 5: W
    (1, -1),  // 6: SW
    (1, 0),   // 7: S
    (1, 1),   // 8: SE
];

/// D8 flow accumulation algorithm
#[derive(Debug, Clone, Default)]
pub struct FlowAccumulationD8;

impl Algorithm for FlowAccumulationD8 {
    type Input = Raster<u8>;
    type Output = Raster<f64>;
    type Params = ();
    type Error = Error;

    fn name(&self) -> &'static str {
        "Flow Accumulation (D8)"
    }

    fn description(&self) -> &'static str {
        "Count upstream contributing cells from D8 flow direction"
    }

    fn execute(&self, input: Self::Input, _params: Self::Params) -> Result<Self::Output> {
        flow_accumulation_d8(&input)
    }
}

/// Calculate flow accumulation from a D8 flow direction raster.
///
/// Each cell receives a count of all upstream cells that flow into it.
/// Headwater cells (no upstream neighbors) have accumulation = 0.
///
/// # Algorithm
/// 1. Count incoming flows for each cell (in-degree)
/// 2. Start from cells with in-degree 0 (headwaters)
/// 3. Propagate downstream, accumulating counts
///
/// # Arguments
/// * `flow_dir` - D8 flow direction raster (output from `flow_direction_d8`)
///
/// # Returns
/// Raster<f64> with flow accumulation values
pub fn flow_accumulation_d8(flow_dir: &Raster<u8>) -> Result<Raster<f64>> {
    let (rows, cols) = flow_dir.shape();

    // Build in-degree count (how many cells flow INTO each cell)
    let mut in_degree = Array2::<u32>::zeros((rows, cols));

    for row in 0..rows {
        for col in 0..cols {
            let dir = unsafe { flow_dir.get_unchecked(row, col) };

            if dir == 0 {
                continue; // Pit or nodata
            }

            let dir_idx = (dir - 1) as usize;
            if dir_idx >= D8_OFFSETS.len() {
                continue;
            }

            let (dr, dc) = D8_OFFSETS[dir_idx];
            let nr = row as isize + dr;
            let nc = col as isize + dc;

            if nr >= 0 && nc >= 0 && (nr as usize) < rows && (nc as usize) < cols {
                in_degree[(nr as usize, nc as usize)] += 1;
            }
        }
    }

    // Initialize queue with headwater cells (in-degree = 0).
    // Direction 0 means pit/flat/outlet, NOT nodata. All cells participate.
    let mut queue: Vec<(usize, usize)> = Vec::new();
    let mut accumulation = Array2::<f64>::zeros((rows, cols));

    for row in 0..rows {
        for col in 0..cols {
            if in_degree[(row, col)] == 0 {
                queue.push((row, col));
            }
        }
    }

    // Process queue (topological sort).
    // Each cell passes its accumulation + 1 to its downstream cell
    while let Some((row, col)) = queue.pop() {
        let dir = unsafe { flow_dir.get_unchecked(row, col) };

        if dir == 0 {
            continue; // Pit
        }

        let dir_idx = (dir - 1) as usize;
        if dir_idx >= D8_OFFSETS.len() {
            continue;
        }

        let (dr, dc) = D8_OFFSETS[dir_idx];
        let nr = row as isize + dr;
        let nc = col as isize + dc;

        if nr < 0 || nc < 0 || (nr as usize) >= rows || (nc as usize) >= cols {
            continue;
        }

        let nr = nr as usize;
        let nc = nc as usize;

        // Pass accumulation downstream: this cell + all its upstream
        accumulation[(nr, nc)] += accumulation[(row, col)] + 1.0;

        in_degree[(nr, nc)] = in_degree[(nr, nc)].saturating_sub(1);

        // Once all upstream cells have been processed, add to queue
        if in_degree[(nr, nc)] == 0 {
            queue.push((nr, nc));
        }
    }

    let mut output = flow_dir.with_same_meta::<f64>(rows, cols);
    *output.data_mut() = accumulation;

    Ok(output)
}
