//! MFD flow accumulation
//!
//! Accumulates fractional upstream contributing area over the packed
//! MFD direction words. Flow splits at every cell according to the
//! quantized shares, so accumulation values are fractional cell counts;
//! headwater cells carry 0, matching the D8 convention.

use ndarray::Array2;
use routedem_core::raster::Raster;
use routedem_core::{Algorithm, Error, Result};

use super::flow_direction_mfd::mfd_shares;

/// D8 neighbor offsets matching direction encoding (1=E, 2=NE, ..., 8=SE)
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

/// MFD flow accumulation algorithm
#[derive(Debug, Clone, Default)]
pub struct FlowAccumulationMfd;

impl Algorithm for FlowAccumulationMfd {
    type Input = Raster<i32>;
    type Output = Raster<f64>;
    type Params = ();
    type Error = Error;

    fn name(&self) -> &'static str {
        "Flow Accumulation (MFD)"
    }

    fn description(&self) -> &'static str {
        "Accumulate fractional upstream area from MFD direction words"
    }

    fn execute(&self, input: Self::Input, _params: Self::Params) -> Result<Self::Output> {
        flow_accumulation_mfd(&input)
    }
}

/// Calculate flow accumulation from an MFD direction raster.
///
/// Works like the D8 version, except each cell forwards
/// `(accumulation + 1) * fraction` along every positive-share link
/// instead of passing everything to a single neighbor. Shares always
/// point strictly downslope, so the link graph is acyclic and in-degree
/// propagation visits every cell once.
///
/// # Arguments
/// * `flow_dir` - MFD direction raster (output from `flow_direction_mfd`)
///
/// # Returns
/// Raster<f64> with fractional flow accumulation values
pub fn flow_accumulation_mfd(flow_dir: &Raster<i32>) -> Result<Raster<f64>> {
    let (rows, cols) = flow_dir.shape();

    // Build in-degree count over positive-share links
    let mut in_degree = Array2::<u32>::zeros((rows, cols));

    for row in 0..rows {
        for col in 0..cols {
            let word = unsafe { flow_dir.get_unchecked(row, col) };
            if word == 0 {
                continue; // Pit or nodata
            }

            for (idx, &share) in mfd_shares(word).iter().enumerate() {
                if share == 0 {
                    continue;
                }
                let (dr, dc) = D8_OFFSETS[idx];
                let nr = row as isize + dr;
                let nc = col as isize + dc;
                if nr >= 0 && nc >= 0 && (nr as usize) < rows && (nc as usize) < cols {
                    in_degree[(nr as usize, nc as usize)] += 1;
                }
            }
        }
    }

    let mut queue: Vec<(usize, usize)> = Vec::new();
    let mut accumulation = Array2::<f64>::zeros((rows, cols));

    for row in 0..rows {
        for col in 0..cols {
            if in_degree[(row, col)] == 0 {
                queue.push((row, col));
            }
        }
    }

    // Topological propagation: split this cell's outflow by share fractions
    while let Some((row, col)) = queue.pop() {
        let word = unsafe { flow_dir.get_unchecked(row, col) };
        if word == 0 {
            continue; // Pit
        }

        let shares = mfd_shares(word);
        let total: f64 = shares.iter().map(|&s| s as f64).sum();
        if total <= 0.0 {
            continue;
        }

        let outflow = accumulation[(row, col)] + 1.0;

        for (idx, &share) in shares.iter().enumerate() {
            if share == 0 {
                continue;
            }
            let (dr, dc) = D8_OFFSETS[idx];
            let nr = row as isize + dr;
            let nc = col as isize + dc;
            if nr < 0 || nc < 0 || (nr as usize) >= rows || (nc as usize) >= cols {
                continue;
            }

            let nr = nr as usize;
            let nc = nc as usize;

            accumulation[(nr, nc)] += outflow * (share as f64 / total);

            in_degree[(nr, nc)] = in_degree[(nr, nc)].saturating_sub(1);
            if in_degree[(nr, nc)] == 0 {
                queue.push((nr, nc));
            }
        }
    }

    let mut output = flow_dir.with_same_meta::<f64>(rows, cols);
    *output.data_mut() = accumulation;

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hydrology::{
        fill_pits, flow_accumulation_d8, flow_direction_d8, flow_direction_mfd, FillPitsParams,
        MfdParams,
    };
    use routedem_core::GeoTransform;

    #[test]
    fn test_mfd_accumulation_linear() {
        // 1x5 strip sloping east: single path, accumulation is exact
        let mut dem = Raster::new(1, 5);
        dem.set_transform(GeoTransform::new(0.0, 1.0, 1.0, -1.0));
        for col in 0..5 {
            dem.set(0, col, (5 - col) as f64).unwrap();
        }

        let fdir = flow_direction_mfd(&dem, MfdParams::default()).unwrap();
        let acc = flow_accumulation_mfd(&fdir).unwrap();

        assert_eq!(acc.get(0, 0).unwrap(), 0.0); // Headwater
        assert_eq!(acc.get(0, 2).unwrap(), 2.0);
        assert_eq!(acc.get(0, 4).unwrap(), 4.0); // Outlet
    }

    #[test]
    fn test_mfd_accumulation_convergent_pit() {
        // 3x3 with center lowest: every neighbor sends its full unit there
        let mut dem = Raster::new(3, 3);
        dem.set_transform(GeoTransform::new(0.0, 3.0, 1.0, -1.0));
        for row in 0..3 {
            for col in 0..3 {
                dem.set(row, col, 5.0).unwrap();
            }
        }
        dem.set(1, 1, 1.0).unwrap();

        let fdir = flow_direction_mfd(&dem, MfdParams::default()).unwrap();
        let acc = flow_accumulation_mfd(&fdir).unwrap();

        let center = acc.get(1, 1).unwrap();
        assert_eq!(
            center, 8.0,
            "Center pit should accumulate all 8 neighbors, got {}",
            center
        );
    }

    #[test]
    fn test_mfd_accumulation_headwaters_zero() {
        let mut dem = Raster::new(5, 5);
        dem.set_transform(GeoTransform::new(0.0, 5.0, 1.0, -1.0));
        for row in 0..5 {
            for col in 0..5 {
                dem.set(row, col, (5 - row) as f64 * 10.0).unwrap();
            }
        }

        let fdir = flow_direction_mfd(&dem, MfdParams::default()).unwrap();
        let acc = flow_accumulation_mfd(&fdir).unwrap();

        for col in 0..5 {
            assert_eq!(
                acc.get(0, col).unwrap(),
                0.0,
                "Top row must be headwater at col {}",
                col
            );
        }

        let bottom = acc.get(4, 2).unwrap();
        assert!(bottom > 1.0, "Bottom center should gather flow, got {}", bottom);
    }

    #[test]
    fn test_mfd_spreads_wider_than_d8() {
        // V-shaped valley: MFD should wet at least as many outlet cells as D8
        let rows = 11;
        let cols = 11;
        let mut dem = Raster::new(rows, cols);
        dem.set_transform(GeoTransform::new(0.0, cols as f64, 1.0, -1.0));
        for row in 0..rows {
            for col in 0..cols {
                let cross = (col as f64 - 5.0).abs();
                let along = (rows - 1 - row) as f64 * 0.5;
                dem.set(row, col, cross + along).unwrap();
            }
        }

        let filled = fill_pits(&dem, FillPitsParams::default()).unwrap();

        let d8_acc = flow_accumulation_d8(&flow_direction_d8(&filled).unwrap()).unwrap();
        let mfd_acc =
            flow_accumulation_mfd(&flow_direction_mfd(&filled, MfdParams::default()).unwrap())
                .unwrap();

        let d8_nonzero = (0..cols)
            .filter(|&c| d8_acc.get(rows - 1, c).unwrap() > 1.0)
            .count();
        let mfd_nonzero = (0..cols)
            .filter(|&c| mfd_acc.get(rows - 1, c).unwrap() > 1.0)
            .count();

        assert!(
            mfd_nonzero >= d8_nonzero,
            "MFD should put flow in at least as many cells: d8={}, mfd={}",
            d8_nonzero, mfd_nonzero
        );
    }
}
